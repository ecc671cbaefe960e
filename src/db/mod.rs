pub mod statement;
mod store;
mod writer;

pub use self::statement::SelectStatement;
pub use self::writer::DatabaseWriter;

use crate::error::LivedbError;
use crate::query::Expr;
use crate::row::Row;
use crate::schema::TableSchema;
use crate::types::Value;
use self::store::{TableStore, UndoOp, format_key};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChangeKind {
    Insert,
    Update,
    Delete,
}

/// Fine-grained notification of one row mutation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChangeEvent {
    pub kind: RowChangeKind,
    pub table: String,
    pub primary_key: Vec<Value>,
}

/// Per-transaction hooks, invoked on the writer context in registration
/// order. Observers are owned by the database and never removed.
pub trait TransactionObserver: Send + 'static {
    fn on_row_change(&mut self, event: &RowChangeEvent);

    fn on_will_commit(&mut self) {}

    fn on_commit(&mut self, db: &Database);

    fn on_rollback(&mut self);
}

/// An in-memory, single-writer table store. All mutation happens through
/// [`DatabaseWriter::write`], which wraps each job in a transaction and
/// drives the observer hooks.
#[derive(Default)]
pub struct Database {
    tables: BTreeMap<String, TableStore>,
    observers: Vec<Box<dyn TransactionObserver>>,
    pending_events: Vec<RowChangeEvent>,
    journal: Vec<UndoOp>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<(), LivedbError> {
        schema.validate()?;
        if self.tables.contains_key(&schema.table_name) {
            return Err(LivedbError::TableAlreadyExists {
                table: schema.table_name,
            });
        }
        let name = schema.table_name.clone();
        self.tables.insert(name.clone(), TableStore::new(schema));
        self.journal.push(UndoOp::CreateTable { table: name });
        Ok(())
    }

    /// Removes a table. Remaining rows surface as `Delete` events so that
    /// observers reading the table treat the transaction as relevant.
    pub fn drop_table(&mut self, name: &str) -> Result<(), LivedbError> {
        let store = self
            .tables
            .remove(name)
            .ok_or_else(|| LivedbError::TableNotFound {
                table: name.to_string(),
            })?;
        for key in store.rows.keys() {
            self.pending_events.push(RowChangeEvent {
                kind: RowChangeKind::Delete,
                table: name.to_string(),
                primary_key: key.clone(),
            });
        }
        self.journal.push(UndoOp::DropTable {
            table: name.to_string(),
            store: Box::new(store),
        });
        Ok(())
    }

    pub fn schema(&self, table: &str) -> Result<&TableSchema, LivedbError> {
        self.table(table).map(|store| &store.schema)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub(crate) fn table(&self, name: &str) -> Result<&TableStore, LivedbError> {
        self.tables
            .get(name)
            .ok_or_else(|| LivedbError::TableNotFound {
                table: name.to_string(),
            })
    }

    pub fn prepare(&self, sql: &str) -> Result<SelectStatement, LivedbError> {
        let statement = SelectStatement::parse(sql)?;
        statement.validate(self)?;
        Ok(statement)
    }

    pub fn insert(&mut self, table: &str, row: Row) -> Result<(), LivedbError> {
        let store = self
            .tables
            .get_mut(table)
            .ok_or_else(|| LivedbError::TableNotFound {
                table: table.to_string(),
            })?;

        // Normalize into schema column order so fetched rows compare stably.
        let mut values = Vec::with_capacity(store.schema.columns.len());
        for column in &store.schema.columns {
            let value = row.get(&column.name).cloned().unwrap_or(Value::Null);
            check_value(table, column, &value)?;
            values.push(value);
        }
        for name in row.columns() {
            if store.schema.column(name).is_none() {
                return Err(LivedbError::UnknownColumn {
                    table: table.to_string(),
                    column: name.clone(),
                });
            }
        }

        let normalized = Row::from_parts(store.header.clone(), values);
        let key = store.primary_key_of(&normalized);
        if store.rows.contains_key(&key) {
            return Err(LivedbError::DuplicatePrimaryKey {
                table: table.to_string(),
                key: format_key(&key),
            });
        }
        store.rows.insert(key.clone(), normalized);

        self.journal.push(UndoOp::Insert {
            table: table.to_string(),
            key: key.clone(),
        });
        self.pending_events.push(RowChangeEvent {
            kind: RowChangeKind::Insert,
            table: table.to_string(),
            primary_key: key,
        });
        Ok(())
    }

    /// Applies assignments to every row matching the predicate. Primary-key
    /// columns cannot be reassigned.
    pub fn update_where(
        &mut self,
        table: &str,
        predicate: &Expr,
        assignments: &[(String, Value)],
    ) -> Result<usize, LivedbError> {
        predicate.validate_depth()?;
        let store = self
            .tables
            .get_mut(table)
            .ok_or_else(|| LivedbError::TableNotFound {
                table: table.to_string(),
            })?;

        for (column, _) in assignments {
            if store.schema.primary_key.contains(column) {
                return Err(LivedbError::Validation(format!(
                    "cannot reassign primary key column '{column}' of table '{table}'"
                )));
            }
        }

        let matching: Vec<Vec<Value>> = store
            .rows
            .iter()
            .filter(|(_, row)| predicate.eval(row))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matching {
            let previous = store.rows.get(key).cloned().expect("key just collected");
            let mut values = previous.values().to_vec();
            for (column, value) in assignments {
                let index = store.column_index(column)?;
                let def = &store.schema.columns[index];
                check_value(table, def, value)?;
                values[index] = value.clone();
            }
            store
                .rows
                .insert(key.clone(), Row::from_parts(store.header.clone(), values));

            self.journal.push(UndoOp::Update {
                table: table.to_string(),
                key: key.clone(),
                previous,
            });
            self.pending_events.push(RowChangeEvent {
                kind: RowChangeKind::Update,
                table: table.to_string(),
                primary_key: key.clone(),
            });
        }
        Ok(matching.len())
    }

    pub fn delete_where(&mut self, table: &str, predicate: &Expr) -> Result<usize, LivedbError> {
        predicate.validate_depth()?;
        let store = self
            .tables
            .get_mut(table)
            .ok_or_else(|| LivedbError::TableNotFound {
                table: table.to_string(),
            })?;

        let matching: Vec<Vec<Value>> = store
            .rows
            .iter()
            .filter(|(_, row)| predicate.eval(row))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matching {
            let previous = store.rows.remove(key).expect("key just collected");
            self.journal.push(UndoOp::Delete {
                table: table.to_string(),
                key: key.clone(),
                previous,
            });
            self.pending_events.push(RowChangeEvent {
                kind: RowChangeKind::Delete,
                table: table.to_string(),
                primary_key: key.clone(),
            });
        }
        Ok(matching.len())
    }

    pub fn add_transaction_observer(&mut self, observer: Box<dyn TransactionObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn take_observers(&mut self) -> Vec<Box<dyn TransactionObserver>> {
        std::mem::take(&mut self.observers)
    }

    pub(crate) fn restore_observers(&mut self, mut observers: Vec<Box<dyn TransactionObserver>>) {
        // Observers registered while hooks ran (rare) stay behind them.
        observers.append(&mut self.observers);
        self.observers = observers;
    }

    pub(crate) fn take_pending_events(&mut self) -> Vec<RowChangeEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub(crate) fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub(crate) fn rollback_journal(&mut self) {
        while let Some(op) = self.journal.pop() {
            match op {
                UndoOp::Insert { table, key } => {
                    if let Some(store) = self.tables.get_mut(&table) {
                        store.rows.remove(&key);
                    }
                }
                UndoOp::Update {
                    table,
                    key,
                    previous,
                }
                | UndoOp::Delete {
                    table,
                    key,
                    previous,
                } => {
                    if let Some(store) = self.tables.get_mut(&table) {
                        store.rows.insert(key, previous);
                    }
                }
                UndoOp::CreateTable { table } => {
                    self.tables.remove(&table);
                }
                UndoOp::DropTable { table, store } => {
                    self.tables.insert(table, *store);
                }
            }
        }
        self.pending_events.clear();
    }
}

fn check_value(
    table: &str,
    column: &crate::schema::ColumnDef,
    value: &Value,
) -> Result<(), LivedbError> {
    match value.column_type() {
        None => {
            if column.nullable {
                Ok(())
            } else {
                Err(LivedbError::NotNullViolation {
                    table: table.to_string(),
                    column: column.name.clone(),
                })
            }
        }
        Some(actual) if actual == column.col_type => Ok(()),
        Some(actual) => Err(LivedbError::TypeMismatch {
            table: table.to_string(),
            column: column.name.clone(),
            expected: column.col_type.to_string(),
            actual: actual.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{Database, RowChangeKind};
    use crate::error::LivedbError;
    use crate::query::Expr;
    use crate::row::Row;
    use crate::schema::{ColumnDef, TableSchema};
    use crate::types::{ColumnType, Value};

    fn players_schema() -> TableSchema {
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
            ],
            primary_key: vec!["id".into()],
        }
    }

    fn player(id: i64, name: &str) -> Row {
        Row::from_pairs([
            ("id", Value::Integer(id)),
            ("name", Value::Text(name.into())),
        ])
    }

    #[test]
    fn insert_normalizes_column_order() {
        let mut db = Database::new();
        db.create_table(players_schema()).expect("create");
        db.insert(
            "players",
            Row::from_pairs([
                ("name", Value::Text("alice".into())),
                ("id", Value::Integer(1)),
            ]),
        )
        .expect("insert");
        let rows = db
            .prepare("SELECT * FROM players")
            .and_then(|s| s.fetch(&db))
            .expect("fetch");
        assert_eq!(rows[0].columns(), &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let mut db = Database::new();
        db.create_table(players_schema()).expect("create");
        db.insert("players", player(1, "alice")).expect("insert");
        assert!(matches!(
            db.insert("players", player(1, "bob")),
            Err(LivedbError::DuplicatePrimaryKey { .. })
        ));
    }

    #[test]
    fn type_and_null_checks() {
        let mut db = Database::new();
        db.create_table(players_schema()).expect("create");
        let err = db
            .insert(
                "players",
                Row::from_pairs([
                    ("id", Value::Integer(1)),
                    ("name", Value::Integer(5)),
                ]),
            )
            .expect_err("type mismatch");
        assert!(matches!(err, LivedbError::TypeMismatch { .. }));

        let err = db
            .insert("players", Row::from_pairs([("id", Value::Integer(1))]))
            .expect_err("missing name");
        assert!(matches!(err, LivedbError::NotNullViolation { .. }));
    }

    #[test]
    fn update_where_and_delete_where_report_counts_and_events() {
        let mut db = Database::new();
        db.create_table(players_schema()).expect("create");
        db.insert("players", player(1, "alice")).expect("insert");
        db.insert("players", player(2, "bob")).expect("insert");
        db.take_pending_events();

        let updated = db
            .update_where(
                "players",
                &Expr::Eq("name".into(), Value::Text("bob".into())),
                &[("name".into(), Value::Text("robert".into()))],
            )
            .expect("update");
        assert_eq!(updated, 1);

        let deleted = db
            .delete_where("players", &Expr::Eq("id".into(), Value::Integer(1)))
            .expect("delete");
        assert_eq!(deleted, 1);

        let events = db.take_pending_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, RowChangeKind::Update);
        assert_eq!(events[0].primary_key, vec![Value::Integer(2)]);
        assert_eq!(events[1].kind, RowChangeKind::Delete);
    }

    #[test]
    fn primary_key_reassignment_is_rejected() {
        let mut db = Database::new();
        db.create_table(players_schema()).expect("create");
        db.insert("players", player(1, "alice")).expect("insert");
        assert!(matches!(
            db.update_where(
                "players",
                &Expr::Eq("id".into(), Value::Integer(1)),
                &[("id".into(), Value::Integer(9))],
            ),
            Err(LivedbError::Validation(_))
        ));
    }

    #[test]
    fn rollback_journal_restores_rows_and_tables() {
        let mut db = Database::new();
        db.create_table(players_schema()).expect("create");
        db.insert("players", player(1, "alice")).expect("insert");
        db.clear_journal();
        db.take_pending_events();

        db.insert("players", player(2, "bob")).expect("insert");
        db.update_where(
            "players",
            &Expr::Eq("id".into(), Value::Integer(1)),
            &[("name".into(), Value::Text("alya".into()))],
        )
        .expect("update");
        db.delete_where("players", &Expr::Eq("id".into(), Value::Integer(1)))
            .expect("delete");
        db.drop_table("players").expect("drop");
        db.create_table(TableSchema {
            table_name: "ghosts".into(),
            columns: vec![ColumnDef {
                name: "id".into(),
                col_type: ColumnType::Integer,
                nullable: false,
            }],
            primary_key: vec!["id".into()],
        })
        .expect("create");

        db.rollback_journal();

        assert!(db.schema("ghosts").is_err());
        let rows = db
            .prepare("SELECT * FROM players")
            .and_then(|s| s.fetch(&db))
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::Text("alice".into())));
    }

    #[test]
    fn drop_table_emits_delete_events() {
        let mut db = Database::new();
        db.create_table(players_schema()).expect("create");
        db.insert("players", player(1, "alice")).expect("insert");
        db.insert("players", player(2, "bob")).expect("insert");
        db.take_pending_events();

        db.drop_table("players").expect("drop");
        let events = db.take_pending_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == RowChangeKind::Delete));
        assert!(events.iter().all(|e| e.table == "players"));
    }
}
