use crate::controller::FetchedRecordsController;
use crate::error::LivedbError;
use crate::types::Value;
use serde::Serialize;
use std::collections::HashMap;

/// Position of a record in the projection. The projection is a single
/// section, so `section` is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }

    pub(crate) fn row(row: usize) -> Self {
        Self { section: 0, row }
    }
}

/// Public form of one edit-script entry. Deletions carry old positions,
/// insertions new positions; moves and updates carry the map from each
/// changed column to its old value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchedRecordsEvent {
    Insertion {
        index_path: IndexPath,
    },
    Deletion {
        index_path: IndexPath,
    },
    Move {
        index_path: IndexPath,
        new_index_path: IndexPath,
        changes: HashMap<String, Value>,
    },
    Update {
        index_path: IndexPath,
        changes: HashMap<String, Value>,
    },
}

/// Callbacks a controller delivers on its consumer context, in commit order.
/// Held weakly; all methods default to no-ops.
pub trait FetchedRecordsDelegate<R>: Send + Sync {
    fn will_change_records(&self, _controller: &FetchedRecordsController<R>) {}

    /// Called once per edit-script entry, in script order.
    fn did_change_record(
        &self,
        _controller: &FetchedRecordsController<R>,
        _record: &R,
        _event: &FetchedRecordsEvent,
    ) {
    }

    fn did_change_records(&self, _controller: &FetchedRecordsController<R>) {}

    /// A commit-time refetch failed; the projection is stale until a later
    /// relevant transaction fetches successfully.
    fn did_fail_fetch(&self, _controller: &FetchedRecordsController<R>, _error: &LivedbError) {}
}

#[cfg(test)]
mod tests {
    use super::{FetchedRecordsEvent, IndexPath};
    use crate::types::Value;
    use std::collections::HashMap;

    #[test]
    fn events_serialize_with_kind_tags() {
        let event = FetchedRecordsEvent::Update {
            index_path: IndexPath::new(0, 2),
            changes: HashMap::from([("name".to_string(), Value::Text("old".into()))]),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "update");
        assert_eq!(json["index_path"]["row"], 2);
        assert_eq!(json["changes"]["name"]["Text"], "old");

        let event = FetchedRecordsEvent::Move {
            index_path: IndexPath::new(0, 1),
            new_index_path: IndexPath::new(0, 0),
            changes: HashMap::new(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "move");
        assert_eq!(json["new_index_path"]["row"], 0);
    }
}
