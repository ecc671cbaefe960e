use crate::db::{Database, SelectStatement};
use crate::error::LivedbError;
use crate::item::Item;
use crate::query::Query;
use crate::record::FetchableRecord;
use crate::types::Value;
use std::marker::PhantomData;

/// Where a controller's rows come from: raw SQL with positional arguments,
/// or a builder-side [`Query`]. Either prepares into a [`SelectStatement`]
/// and, through it, yields the set of observed tables.
#[derive(Debug)]
pub enum QuerySource<R> {
    Sql {
        sql: String,
        arguments: Vec<Value>,
        marker: PhantomData<fn() -> R>,
    },
    Request {
        query: Query,
        marker: PhantomData<fn() -> R>,
    },
}

impl<R> QuerySource<R> {
    pub fn sql(sql: impl Into<String>, arguments: Vec<Value>) -> Self {
        QuerySource::Sql {
            sql: sql.into(),
            arguments,
            marker: PhantomData,
        }
    }

    pub fn request(query: Query) -> Self {
        QuerySource::Request {
            query,
            marker: PhantomData,
        }
    }

    pub(crate) fn prepare(&self, db: &Database) -> Result<SelectStatement, LivedbError> {
        match self {
            QuerySource::Sql { sql, arguments, .. } => {
                let mut statement = db.prepare(sql)?;
                statement.bind(arguments.clone())?;
                Ok(statement)
            }
            QuerySource::Request { query, .. } => SelectStatement::from_query(query, db),
        }
    }
}

impl<R: FetchableRecord> QuerySource<R> {
    pub(crate) fn fetch_items(&self, db: &Database) -> Result<Vec<Item<R>>, LivedbError> {
        let statement = self.prepare(db)?;
        let rows = statement.fetch(db)?;
        Ok(rows.iter().map(Item::new).collect())
    }
}

impl<R> Clone for QuerySource<R> {
    fn clone(&self) -> Self {
        match self {
            QuerySource::Sql { sql, arguments, .. } => QuerySource::Sql {
                sql: sql.clone(),
                arguments: arguments.clone(),
                marker: PhantomData,
            },
            QuerySource::Request { query, .. } => QuerySource::Request {
                query: query.clone(),
                marker: PhantomData,
            },
        }
    }
}
