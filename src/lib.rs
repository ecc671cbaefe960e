pub mod config;
pub mod controller;
pub mod db;
pub mod diff;
pub mod error;
pub mod events;
pub mod identity;
pub mod item;
pub mod query;
pub mod queue;
pub mod record;
pub mod row;
pub mod schema;
pub mod source;
pub mod types;

pub use config::ControllerConfig;
pub use controller::{FetchedRecordsController, FetchedRecordsSection};
pub use db::{
    Database, DatabaseWriter, RowChangeEvent, RowChangeKind, SelectStatement, TransactionObserver,
};
pub use diff::edit_script;
pub use error::{LivedbError, LivedbErrorCode};
pub use events::{FetchedRecordsDelegate, FetchedRecordsEvent, IndexPath};
pub use identity::{RecordIdentity, primary_key_identity};
pub use item::Item;
pub use query::{Expr, Order, Query};
pub use queue::SerialQueue;
pub use record::{FetchableRecord, PersistableRecord};
pub use row::Row;
pub use schema::{ColumnDef, TableSchema};
pub use source::QuerySource;
pub use types::{ColumnType, Value};
