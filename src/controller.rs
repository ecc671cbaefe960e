use crate::config::ControllerConfig;
use crate::db::{Database, DatabaseWriter, RowChangeEvent, TransactionObserver};
use crate::diff::{ItemChange, compute_changes};
use crate::error::LivedbError;
use crate::events::FetchedRecordsDelegate;
use crate::identity::{RecordIdentity, primary_key_identity};
use crate::item::Item;
use crate::queue::SerialQueue;
use crate::record::{FetchableRecord, PersistableRecord};
use crate::source::QuerySource;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

type IdentityBuilder<R> =
    Box<dyn Fn(&Database) -> Result<RecordIdentity<R>, LivedbError> + Send + Sync>;

/// Maintains an ordered in-memory projection of a query's result set and,
/// after every committed transaction touching the query's tables, delivers a
/// minimal edit script to its delegate.
///
/// Three serial contexts are involved: the database's writer thread (where
/// the transaction observer runs), a controller-owned diff worker (where edit
/// scripts are computed against the previous snapshot), and the caller's
/// consumer queue (where the delegate runs and the read API is valid).
pub struct FetchedRecordsController<R> {
    inner: Arc<ControllerInner<R>>,
}

struct ControllerInner<R> {
    writer: DatabaseWriter,
    source: QuerySource<R>,
    consumer: SerialQueue,
    diff_tx: Sender<DiffJob<R>>,
    identity_builder: IdentityBuilder<R>,
    /// Built on first fetch; read by `index_of` on the consumer queue.
    identity: Mutex<Option<RecordIdentity<R>>>,
    /// The consumer-visible snapshot. Written from the blocking fetch and
    /// from delivery jobs on the consumer queue.
    main_items: Mutex<Option<Vec<Item<R>>>>,
    delegate: Mutex<Option<Weak<dyn FetchedRecordsDelegate<R>>>>,
    observing: AtomicBool,
    errored: AtomicBool,
}

enum DiffJob<R> {
    /// First fetch: install the baseline and identity, emit nothing.
    Seed {
        items: Vec<Item<R>>,
        identity: RecordIdentity<R>,
    },
    /// Explicit refetch: replace the baseline, emit nothing.
    Reset { items: Vec<Item<R>> },
    /// Commit-time refetch: diff against the baseline and deliver.
    Recompute { items: Vec<Item<R>> },
}

impl<R> FetchedRecordsController<R>
where
    R: FetchableRecord + Send + Sync + 'static,
{
    /// A controller with the default identity: every record is distinct, so
    /// all changes surface as deletions and insertions.
    pub fn new(writer: DatabaseWriter, source: QuerySource<R>, consumer: SerialQueue) -> Self {
        Self::build(
            writer,
            source,
            consumer,
            Box::new(|_| Ok(RecordIdentity::never())),
            ControllerConfig::default(),
        )
    }

    pub fn with_config(
        writer: DatabaseWriter,
        source: QuerySource<R>,
        consumer: SerialQueue,
        config: ControllerConfig,
    ) -> Self {
        Self::build(
            writer,
            source,
            consumer,
            Box::new(|_| Ok(RecordIdentity::never())),
            config,
        )
    }

    /// A controller with an explicit identity predicate.
    pub fn with_identity(
        writer: DatabaseWriter,
        source: QuerySource<R>,
        consumer: SerialQueue,
        is_same: impl Fn(&R, &R) -> bool + Send + Sync + 'static,
    ) -> Self {
        let identity = RecordIdentity::new(is_same);
        Self::build(
            writer,
            source,
            consumer,
            Box::new(move |_| Ok(identity.clone())),
            ControllerConfig::default(),
        )
    }

    /// A controller comparing records by the primary key of `R`'s table.
    /// The comparator needs the schema, so it is built inside the first
    /// `perform_fetch`.
    pub fn by_primary_key(
        writer: DatabaseWriter,
        source: QuerySource<R>,
        consumer: SerialQueue,
    ) -> Self
    where
        R: PersistableRecord,
    {
        Self::build(
            writer,
            source,
            consumer,
            Box::new(|db| primary_key_identity::<R>(db)),
            ControllerConfig::default(),
        )
    }

    fn build(
        writer: DatabaseWriter,
        source: QuerySource<R>,
        consumer: SerialQueue,
        identity_builder: IdentityBuilder<R>,
        config: ControllerConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ControllerInner<R>>| {
            let diff_tx = spawn_diff_worker(&config, consumer.clone(), weak.clone());
            ControllerInner {
                writer,
                source,
                consumer,
                diff_tx,
                identity_builder,
                identity: Mutex::new(None),
                main_items: Mutex::new(None),
                delegate: Mutex::new(None),
                observing: AtomicBool::new(false),
                errored: AtomicBool::new(false),
            }
        });
        Self { inner }
    }

    /// Fetches the projection on the writer context and, on the first call,
    /// attaches the transaction observer. Later calls reset the projection
    /// and the diff baseline without emitting events.
    ///
    /// Must be called on the consumer queue. Configuration errors (bad SQL,
    /// argument arity) surface here and leave the controller unattached.
    pub fn perform_fetch(&self) -> Result<(), LivedbError> {
        self.assert_consumer("perform_fetch");
        let inner = Arc::clone(&self.inner);
        self.inner.writer.write(move |db| {
            let statement = inner.source.prepare(db)?;
            let rows = statement.fetch(db)?;
            let items: Vec<Item<R>> = rows.iter().map(Item::new).collect();

            if !inner.observing.load(Ordering::Relaxed) {
                let identity = (inner.identity_builder)(db)?;
                *inner.identity.lock() = Some(identity.clone());
                let _ = inner.diff_tx.send(DiffJob::Seed {
                    items: items.clone(),
                    identity,
                });
                let observed_tables = statement.source_tables();
                info!(tables = ?observed_tables, rows = items.len(), "attaching fetched records controller");
                db.add_transaction_observer(Box::new(RecordsObserver {
                    observed_tables,
                    dirty: false,
                    source: inner.source.clone(),
                    diff_tx: Some(inner.diff_tx.clone()),
                    controller: Arc::downgrade(&inner),
                    consumer: inner.consumer.clone(),
                }));
                inner.observing.store(true, Ordering::Relaxed);
            } else {
                debug!(rows = items.len(), "refetch resets the projection");
                let _ = inner.diff_tx.send(DiffJob::Reset {
                    items: items.clone(),
                });
            }

            *inner.main_items.lock() = Some(items);
            Ok(())
        })
    }

    /// The current projection's records, or `None` before the first fetch.
    pub fn fetched_records(&self) -> Option<Vec<R>>
    where
        R: Clone,
    {
        self.assert_consumer("fetched_records");
        self.inner
            .main_items
            .lock()
            .as_ref()
            .map(|items| items.iter().map(|item| item.record().clone()).collect())
    }

    /// The record at `index`. Out-of-range indexes and calls before the
    /// first fetch are programmer errors.
    pub fn record_at(&self, index: usize) -> R
    where
        R: Clone,
    {
        self.assert_consumer("record_at");
        let guard = self.inner.main_items.lock();
        let items = guard
            .as_ref()
            .expect("record_at called before perform_fetch");
        match items.get(index) {
            Some(item) => item.record().clone(),
            None => panic!(
                "record index {index} out of range ({} records fetched)",
                items.len()
            ),
        }
    }

    /// First index whose record has the same identity as `record`, or
    /// `None`. With the default identity nothing ever matches.
    pub fn index_of(&self, record: &R) -> Option<usize> {
        self.assert_consumer("index_of");
        let identity = self.inner.identity.lock().clone()?;
        let guard = self.inner.main_items.lock();
        let items = guard.as_ref()?;
        items
            .iter()
            .position(|item| identity.same(item.record(), record))
    }

    /// The single-section view over the projection; empty before the first
    /// fetch.
    pub fn sections(&self) -> Vec<FetchedRecordsSection<R>>
    where
        R: Clone,
    {
        self.assert_consumer("sections");
        match self.fetched_records() {
            Some(records) => vec![FetchedRecordsSection { records }],
            None => Vec::new(),
        }
    }

    /// Registers the delegate. Held weakly: the controller never keeps its
    /// delegate alive.
    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: FetchedRecordsDelegate<R> + 'static,
    {
        self.assert_consumer("set_delegate");
        let weak: Weak<D> = Arc::downgrade(delegate);
        let weak: Weak<dyn FetchedRecordsDelegate<R>> = weak;
        *self.inner.delegate.lock() = Some(weak);
    }

    pub fn clear_delegate(&self) {
        self.assert_consumer("clear_delegate");
        *self.inner.delegate.lock() = None;
    }

    /// True when the most recent commit-time refetch failed and no later
    /// refetch has succeeded; the projection is stale while this holds.
    pub fn last_fetch_errored(&self) -> bool {
        self.inner.errored.load(Ordering::Relaxed)
    }

    fn assert_consumer(&self, operation: &str) {
        assert!(
            self.inner.consumer.is_current(),
            "FetchedRecordsController::{operation} must be called on its consumer queue \
             ('{}')",
            self.inner.consumer.label()
        );
    }
}

/// Read-only view over one section of the projection. The projection always
/// has exactly one section.
pub struct FetchedRecordsSection<R> {
    records: Vec<R>,
}

impl<R> FetchedRecordsSection<R> {
    pub fn number_of_records(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }
}

fn spawn_diff_worker<R>(
    config: &ControllerConfig,
    consumer: SerialQueue,
    weak: Weak<ControllerInner<R>>,
) -> Sender<DiffJob<R>>
where
    R: FetchableRecord + Send + Sync + 'static,
{
    let (tx, rx) = channel::<DiffJob<R>>();
    let coalesce = config.coalesce_refetches;
    std::thread::Builder::new()
        .name(config.diff_queue_label.clone())
        .spawn(move || diff_loop(rx, coalesce, consumer, weak))
        .expect("spawn diff worker thread");
    tx
}

fn diff_loop<R>(
    rx: Receiver<DiffJob<R>>,
    coalesce: bool,
    consumer: SerialQueue,
    weak: Weak<ControllerInner<R>>,
) where
    R: FetchableRecord + Send + Sync + 'static,
{
    let mut baseline: Option<(Vec<Item<R>>, RecordIdentity<R>)> = None;
    let mut carried: Option<DiffJob<R>> = None;

    loop {
        let mut job = match carried.take() {
            Some(job) => job,
            None => match rx.recv() {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        if coalesce && matches!(job, DiffJob::Recompute { .. }) {
            let mut skipped = 0usize;
            while let Ok(next) = rx.try_recv() {
                match next {
                    DiffJob::Recompute { items } => {
                        skipped += 1;
                        job = DiffJob::Recompute { items };
                    }
                    other => {
                        carried = Some(other);
                        break;
                    }
                }
            }
            if skipped > 0 {
                debug!(skipped, "coalesced pending refetches");
            }
        }

        match job {
            DiffJob::Seed { items, identity } => {
                baseline = Some((items, identity));
            }
            DiffJob::Reset { items } => {
                if let Some((snapshot, _)) = baseline.as_mut() {
                    *snapshot = items;
                }
            }
            DiffJob::Recompute { items } => {
                if weak.strong_count() == 0 {
                    return;
                }
                let Some((snapshot, identity)) = baseline.as_mut() else {
                    continue;
                };
                let changes = compute_changes(snapshot, &items, identity);
                *snapshot = items.clone();
                debug!(changes = changes.len(), rows = items.len(), "diff computed");
                if changes.is_empty() {
                    continue;
                }
                let weak_inner = weak.clone();
                consumer.dispatch(move || deliver(weak_inner, items, changes));
            }
        }
    }
}

/// Runs on the consumer queue: swaps the visible snapshot and walks the
/// delegate through the script. Dropped whole if the controller is gone.
fn deliver<R>(weak: Weak<ControllerInner<R>>, items: Vec<Item<R>>, changes: Vec<ItemChange<R>>)
where
    R: FetchableRecord + Send + Sync + 'static,
{
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let controller = FetchedRecordsController {
        inner: Arc::clone(&inner),
    };
    let delegate = inner.delegate.lock().as_ref().and_then(Weak::upgrade);

    if let Some(delegate) = &delegate {
        delegate.will_change_records(&controller);
    }
    *inner.main_items.lock() = Some(items);
    if let Some(delegate) = &delegate {
        for change in &changes {
            delegate.did_change_record(&controller, change.item().record(), &change.event());
        }
        delegate.did_change_records(&controller);
    }
}

/// The controller's transaction observer. Lives inside the database on the
/// writer context; holds the controller weakly so a dispatched pipeline
/// never keeps it alive.
struct RecordsObserver<R> {
    observed_tables: HashSet<String>,
    dirty: bool,
    source: QuerySource<R>,
    diff_tx: Option<Sender<DiffJob<R>>>,
    controller: Weak<ControllerInner<R>>,
    consumer: SerialQueue,
}

impl<R> TransactionObserver for RecordsObserver<R>
where
    R: FetchableRecord + Send + Sync + 'static,
{
    fn on_row_change(&mut self, event: &RowChangeEvent) {
        if self.observed_tables.contains(&event.table) {
            self.dirty = true;
        }
    }

    fn on_commit(&mut self, db: &Database) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        let Some(inner) = self.controller.upgrade() else {
            // Controller is gone; stop feeding the diff worker so it can
            // shut down.
            self.diff_tx = None;
            return;
        };
        let Some(diff_tx) = self.diff_tx.as_ref() else {
            return;
        };

        match self.source.fetch_items(db) {
            Ok(items) => {
                inner.errored.store(false, Ordering::Relaxed);
                debug!(rows = items.len(), "refetched after relevant commit");
                let _ = diff_tx.send(DiffJob::Recompute { items });
            }
            Err(fetch_error) => {
                // Must not raise into the commit; the next relevant
                // transaction retries.
                inner.errored.store(true, Ordering::Relaxed);
                error!(%fetch_error, "commit-time refetch failed; projection is stale");
                let weak = self.controller.clone();
                self.consumer.dispatch(move || {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let controller = FetchedRecordsController {
                        inner: Arc::clone(&inner),
                    };
                    let delegate = inner.delegate.lock().as_ref().and_then(Weak::upgrade);
                    if let Some(delegate) = delegate {
                        delegate.did_fail_fetch(&controller, &fetch_error);
                    }
                });
            }
        }
    }

    fn on_rollback(&mut self) {
        self.dirty = false;
    }
}
