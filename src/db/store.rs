use crate::error::LivedbError;
use crate::row::Row;
use crate::schema::TableSchema;
use crate::types::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One table's rows, keyed by primary-key values. Iteration order (and thus
/// the default result order of unsorted fetches) is primary-key order.
#[derive(Debug, Clone)]
pub(crate) struct TableStore {
    pub(crate) schema: TableSchema,
    pub(crate) header: Arc<[String]>,
    pub(crate) rows: BTreeMap<Vec<Value>, Row>,
}

impl TableStore {
    pub(crate) fn new(schema: TableSchema) -> Self {
        let header: Arc<[String]> = schema
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>()
            .into();
        Self {
            schema,
            header,
            rows: BTreeMap::new(),
        }
    }

    pub(crate) fn primary_key_of(&self, row: &Row) -> Vec<Value> {
        self.schema
            .primary_key
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub(crate) fn column_index(&self, column: &str) -> Result<usize, LivedbError> {
        self.header
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| LivedbError::UnknownColumn {
                table: self.schema.table_name.clone(),
                column: column.to_string(),
            })
    }
}

pub(crate) fn format_key(key: &[Value]) -> String {
    key.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Journal entry reverting one mutation; replayed in reverse on rollback.
#[derive(Debug)]
pub(crate) enum UndoOp {
    Insert {
        table: String,
        key: Vec<Value>,
    },
    Update {
        table: String,
        key: Vec<Value>,
        previous: Row,
    },
    Delete {
        table: String,
        key: Vec<Value>,
        previous: Row,
    },
    CreateTable {
        table: String,
    },
    DropTable {
        table: String,
        store: Box<TableStore>,
    },
}
