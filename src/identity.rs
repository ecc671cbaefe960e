use crate::db::Database;
use crate::error::LivedbError;
use crate::record::PersistableRecord;
use std::sync::Arc;

/// Decides whether two decoded records denote the same logical entity.
///
/// Identity is what lets the diff engine merge a deletion/insertion pair of
/// the same record into a move or an update. The default,
/// [`RecordIdentity::never`], treats every record as distinct: correct, but
/// every change then surfaces as a deletion plus an insertion.
pub struct RecordIdentity<R>(Arc<dyn Fn(&R, &R) -> bool + Send + Sync>);

impl<R> RecordIdentity<R> {
    pub fn new(is_same: impl Fn(&R, &R) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(is_same))
    }

    pub fn never() -> Self {
        Self::new(|_, _| false)
    }

    pub fn same(&self, a: &R, b: &R) -> bool {
        (self.0)(a, b)
    }
}

impl<R> Clone for RecordIdentity<R> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Builds a primary-key identity predicate from the schema of `R`'s table.
/// Needs a database handle, which is why controllers defer this to the first
/// fetch. An empty primary key degrades to [`RecordIdentity::never`].
pub fn primary_key_identity<R: PersistableRecord>(
    db: &Database,
) -> Result<RecordIdentity<R>, LivedbError> {
    let schema = db.schema(R::table_name())?;
    let key_columns = schema.primary_key.clone();
    if key_columns.is_empty() {
        return Ok(RecordIdentity::never());
    }
    Ok(RecordIdentity::new(move |a: &R, b: &R| {
        key_columns.iter().all(|column| {
            match (a.column_value(column), b.column_value(column)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        })
    }))
}
