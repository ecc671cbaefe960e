#![allow(dead_code)]

use livedb::{
    ColumnDef, ColumnType, DatabaseWriter, FetchableRecord, FetchedRecordsController,
    FetchedRecordsDelegate, FetchedRecordsEvent, LivedbError, PersistableRecord, Row, SerialQueue,
    TableSchema, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub score: i64,
}

impl FetchableRecord for Player {
    fn from_row(row: &Row) -> Self {
        let Some(Value::Integer(id)) = row.get("id") else {
            panic!("players row without id: {row:?}");
        };
        let Some(Value::Text(name)) = row.get("name") else {
            panic!("players row without name: {row:?}");
        };
        let Some(Value::Integer(score)) = row.get("score") else {
            panic!("players row without score: {row:?}");
        };
        Self {
            id: *id,
            name: name.to_string(),
            score: *score,
        }
    }
}

impl PersistableRecord for Player {
    fn table_name() -> &'static str {
        "players"
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::Integer(self.id)),
            "name" => Some(Value::Text(self.name.as_str().into())),
            "score" => Some(Value::Integer(self.score)),
            _ => None,
        }
    }
}

pub fn players_schema() -> TableSchema {
    TableSchema {
        table_name: "players".into(),
        columns: vec![
            ColumnDef {
                name: "id".into(),
                col_type: ColumnType::Integer,
                nullable: false,
            },
            ColumnDef {
                name: "name".into(),
                col_type: ColumnType::Text,
                nullable: false,
            },
            ColumnDef {
                name: "score".into(),
                col_type: ColumnType::Integer,
                nullable: false,
            },
        ],
        primary_key: vec!["id".into()],
    }
}

pub fn player_row(id: i64, name: &str, score: i64) -> Row {
    Row::from_pairs([
        ("id", Value::Integer(id)),
        ("name", Value::Text(name.into())),
        ("score", Value::Integer(score)),
    ])
}

/// A writer with an empty `players` table.
pub fn players_writer() -> DatabaseWriter {
    let writer = DatabaseWriter::new();
    writer
        .write(|db| db.create_table(players_schema()))
        .expect("create players table");
    writer
}

#[derive(Debug, Clone)]
pub enum Callback {
    Will,
    Change(Player, FetchedRecordsEvent),
    Did,
    Failed(String),
}

/// Records delegate callbacks and signals once per completed script (or
/// failure), so tests can block on pipeline delivery.
pub struct Recorder {
    callbacks: Mutex<Vec<Callback>>,
    notify: Mutex<Sender<()>>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Receiver<()>) {
        let (tx, rx) = channel();
        (
            Arc::new(Self {
                callbacks: Mutex::new(Vec::new()),
                notify: Mutex::new(tx),
            }),
            rx,
        )
    }

    pub fn drain(&self) -> Vec<Callback> {
        std::mem::take(&mut *self.callbacks.lock())
    }

    /// Drains the recorded callbacks grouped into complete edit scripts,
    /// asserting the will/change*/did bracketing held.
    pub fn drain_scripts(&self) -> Vec<Vec<(Player, FetchedRecordsEvent)>> {
        let mut scripts = Vec::new();
        let mut current: Option<Vec<(Player, FetchedRecordsEvent)>> = None;
        for callback in self.drain() {
            match callback {
                Callback::Will => {
                    assert!(current.is_none(), "nested will_change_records");
                    current = Some(Vec::new());
                }
                Callback::Change(record, event) => current
                    .as_mut()
                    .expect("did_change_record outside a script")
                    .push((record, event)),
                Callback::Did => {
                    scripts.push(current.take().expect("did_change_records without will"));
                }
                Callback::Failed(message) => panic!("unexpected fetch failure: {message}"),
            }
        }
        assert!(current.is_none(), "unterminated script");
        scripts
    }

    pub fn drain_failures(&self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|callback| match callback {
                Callback::Failed(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl FetchedRecordsDelegate<Player> for Recorder {
    fn will_change_records(&self, _controller: &FetchedRecordsController<Player>) {
        self.callbacks.lock().push(Callback::Will);
    }

    fn did_change_record(
        &self,
        _controller: &FetchedRecordsController<Player>,
        record: &Player,
        event: &FetchedRecordsEvent,
    ) {
        self.callbacks
            .lock()
            .push(Callback::Change(record.clone(), event.clone()));
    }

    fn did_change_records(&self, _controller: &FetchedRecordsController<Player>) {
        self.callbacks.lock().push(Callback::Did);
        let _ = self.notify.lock().send(());
    }

    fn did_fail_fetch(
        &self,
        _controller: &FetchedRecordsController<Player>,
        error: &LivedbError,
    ) {
        self.callbacks.lock().push(Callback::Failed(error.to_string()));
        let _ = self.notify.lock().send(());
    }
}

/// Registers the delegate and performs the first fetch, both on the
/// consumer queue.
pub fn attach(
    queue: &SerialQueue,
    controller: &Arc<FetchedRecordsController<Player>>,
    recorder: &Arc<Recorder>,
) {
    let controller = Arc::clone(controller);
    let recorder = Arc::clone(recorder);
    queue
        .run(move || {
            controller.set_delegate(&recorder);
            controller.perform_fetch()
        })
        .expect("perform_fetch");
}

pub fn wait_for_delivery(rx: &Receiver<()>) {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("pipeline delivery timed out");
}

pub fn assert_no_delivery(rx: &Receiver<()>) {
    assert!(
        rx.recv_timeout(Duration::from_millis(300)).is_err(),
        "unexpected pipeline delivery"
    );
}

/// Applies one delivered script to a model list with batch list-edit
/// semantics: deletions and move sources at old indices, insertions and move
/// targets at new indices, then in-place updates.
pub fn apply_script(model: &mut Vec<Player>, script: &[(Player, FetchedRecordsEvent)]) {
    let mut deletions: Vec<usize> = Vec::new();
    let mut insertions: Vec<(usize, Player)> = Vec::new();
    let mut updates: Vec<(usize, Player)> = Vec::new();
    for (record, event) in script {
        match event {
            FetchedRecordsEvent::Deletion { index_path } => deletions.push(index_path.row),
            FetchedRecordsEvent::Insertion { index_path } => {
                insertions.push((index_path.row, record.clone()));
            }
            FetchedRecordsEvent::Move {
                index_path,
                new_index_path,
                ..
            } => {
                deletions.push(index_path.row);
                insertions.push((new_index_path.row, record.clone()));
            }
            FetchedRecordsEvent::Update { index_path, .. } => {
                updates.push((index_path.row, record.clone()));
            }
        }
    }
    deletions.sort_unstable();
    for index in deletions.iter().rev() {
        model.remove(*index);
    }
    insertions.sort_by_key(|(index, _)| *index);
    for (index, record) in insertions {
        model.insert(index, record);
    }
    for (index, record) in updates {
        model[index] = record;
    }
}
