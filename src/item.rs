use crate::record::FetchableRecord;
use crate::row::Row;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A fetched row paired with its lazily decoded record.
///
/// The row is copied at construction so the item survives the statement
/// cursor that produced it. The record materializes on first access and is
/// shared by every clone of the item; equality is by row contents.
pub struct Item<R> {
    core: Arc<ItemCore<R>>,
}

struct ItemCore<R> {
    row: Row,
    record: OnceLock<R>,
}

impl<R: FetchableRecord> Item<R> {
    pub fn new(row: &Row) -> Self {
        Self {
            core: Arc::new(ItemCore {
                row: row.clone(),
                record: OnceLock::new(),
            }),
        }
    }

    /// The decoded record, materialized at most once.
    pub fn record(&self) -> &R {
        self.core.record.get_or_init(|| {
            let mut record = R::from_row(&self.core.row);
            record.did_fetch();
            record
        })
    }

    pub fn row(&self) -> &Row {
        &self.core.row
    }
}

impl<R> Clone for Item<R> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<R> PartialEq for Item<R> {
    fn eq(&self, other: &Self) -> bool {
        self.core.row == other.core.row
    }
}

impl<R> Eq for Item<R> {}

impl<R> fmt::Debug for Item<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item").field("row", &self.core.row).finish()
    }
}
