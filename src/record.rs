use crate::row::Row;
use crate::types::Value;

/// A type that can be decoded from a fetched row.
///
/// Decoding is infallible by contract: a row that does not match the expected
/// shape is a programmer error and implementations may panic. `did_fetch`
/// runs exactly once per materialized record, after decoding; fields that
/// participate in record identity should not depend on it.
pub trait FetchableRecord: Sized {
    fn from_row(row: &Row) -> Self;

    fn did_fetch(&mut self) {}
}

/// A fetchable record tied to a table, able to report its column values.
/// This is what schema-driven primary-key identity is built from.
pub trait PersistableRecord: FetchableRecord {
    fn table_name() -> &'static str;

    fn column_value(&self, column: &str) -> Option<Value>;
}
