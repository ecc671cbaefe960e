use crate::db::Database;
use crate::error::LivedbError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Sender};
use tracing::{debug, error};

type WriteJob = Box<dyn FnOnce(&mut Database) + Send + 'static>;

/// Serialized access to a [`Database`] owned by a dedicated writer thread.
///
/// Handles are cheap to clone; the thread (and the database with it) shuts
/// down once the last handle is dropped.
#[derive(Clone)]
pub struct DatabaseWriter {
    tx: Sender<WriteJob>,
}

impl DatabaseWriter {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<WriteJob>();
        std::thread::Builder::new()
            .name("livedb-writer".into())
            .spawn(move || {
                let mut db = Database::new();
                while let Ok(job) = rx.recv() {
                    if catch_unwind(AssertUnwindSafe(|| job(&mut db))).is_err() {
                        rollback_after_panic(&mut db);
                    }
                }
                debug!("database writer thread exiting");
            })
            .expect("spawn database writer thread");
        Self { tx }
    }

    /// Runs `job` on the writer thread inside a transaction and blocks until
    /// it completes. On `Ok` the transaction commits and observers see the
    /// row-change / will-commit / commit hook sequence; on `Err` the journal
    /// is rolled back and observers see the rollback hook.
    pub fn write<T, F>(&self, job: F) -> Result<T, LivedbError>
    where
        F: FnOnce(&mut Database) -> Result<T, LivedbError> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        let wrapped: WriteJob = Box::new(move |db| {
            let result = run_transaction(db, job);
            let _ = result_tx.send(result);
        });
        self.tx
            .send(wrapped)
            .map_err(|_| LivedbError::Unavailable("writer thread is gone".into()))?;
        result_rx
            .recv()
            .map_err(|_| LivedbError::Unavailable("writer thread dropped the job".into()))?
    }

    /// Runs a read-only job on the writer thread, outside any transaction.
    pub fn read<T, F>(&self, job: F) -> Result<T, LivedbError>
    where
        F: FnOnce(&Database) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        let wrapped: WriteJob = Box::new(move |db| {
            let _ = result_tx.send(job(db));
        });
        self.tx
            .send(wrapped)
            .map_err(|_| LivedbError::Unavailable("writer thread is gone".into()))?;
        result_rx
            .recv()
            .map_err(|_| LivedbError::Unavailable("writer thread dropped the job".into()))
    }
}

impl Default for DatabaseWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn run_transaction<T, F>(db: &mut Database, job: F) -> Result<T, LivedbError>
where
    F: FnOnce(&mut Database) -> Result<T, LivedbError>,
{
    match job(db) {
        Ok(value) => {
            let events = db.take_pending_events();
            let mut observers = db.take_observers();
            for event in &events {
                for observer in observers.iter_mut() {
                    observer.on_row_change(event);
                }
            }
            for observer in observers.iter_mut() {
                observer.on_will_commit();
            }
            db.clear_journal();
            for observer in observers.iter_mut() {
                observer.on_commit(db);
            }
            db.restore_observers(observers);
            Ok(value)
        }
        Err(err) => {
            db.rollback_journal();
            let mut observers = db.take_observers();
            for observer in observers.iter_mut() {
                observer.on_rollback();
            }
            db.restore_observers(observers);
            Err(err)
        }
    }
}

fn rollback_after_panic(db: &mut Database) {
    error!("write job panicked; rolling the transaction back");
    db.rollback_journal();
    let mut observers = db.take_observers();
    for observer in observers.iter_mut() {
        observer.on_rollback();
    }
    db.restore_observers(observers);
}
