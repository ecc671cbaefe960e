use crate::error::LivedbError;
use crate::types::ColumnType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub(crate) fn validate(&self) -> Result<(), LivedbError> {
        if self.table_name.is_empty() {
            return Err(LivedbError::Validation("table name must not be empty".into()));
        }
        if self.columns.is_empty() {
            return Err(LivedbError::Validation(format!(
                "table '{}' must declare at least one column",
                self.table_name
            )));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(LivedbError::Validation(format!(
                    "table '{}' declares column '{}' twice",
                    self.table_name, column.name
                )));
            }
        }
        for key_column in &self.primary_key {
            let Some(def) = self.column(key_column) else {
                return Err(LivedbError::UnknownColumn {
                    table: self.table_name.clone(),
                    column: key_column.clone(),
                });
            };
            if def.nullable {
                return Err(LivedbError::Validation(format!(
                    "primary key column '{}' of table '{}' must not be nullable",
                    key_column, self.table_name
                )));
            }
        }
        Ok(())
    }
}
