use crate::events::{FetchedRecordsEvent, IndexPath};
use crate::identity::RecordIdentity;
use crate::item::Item;
use crate::record::FetchableRecord;
use crate::row::Row;
use crate::types::Value;
use std::collections::HashMap;
use std::fmt;

/// One edit-script entry, still carrying its item. The public projection of
/// this is [`FetchedRecordsEvent`].
pub(crate) enum ItemChange<R> {
    Insertion {
        item: Item<R>,
        at: usize,
    },
    Deletion {
        item: Item<R>,
        from: usize,
    },
    Move {
        item: Item<R>,
        from: usize,
        to: usize,
        changes: HashMap<String, Value>,
    },
    Update {
        item: Item<R>,
        at: usize,
        changes: HashMap<String, Value>,
    },
}

impl<R> ItemChange<R> {
    pub(crate) fn item(&self) -> &Item<R> {
        match self {
            ItemChange::Insertion { item, .. }
            | ItemChange::Deletion { item, .. }
            | ItemChange::Move { item, .. }
            | ItemChange::Update { item, .. } => item,
        }
    }

    pub(crate) fn event(&self) -> FetchedRecordsEvent {
        match self {
            ItemChange::Insertion { at, .. } => FetchedRecordsEvent::Insertion {
                index_path: IndexPath::row(*at),
            },
            ItemChange::Deletion { from, .. } => FetchedRecordsEvent::Deletion {
                index_path: IndexPath::row(*from),
            },
            ItemChange::Move {
                from, to, changes, ..
            } => FetchedRecordsEvent::Move {
                index_path: IndexPath::row(*from),
                new_index_path: IndexPath::row(*to),
                changes: changes.clone(),
            },
            ItemChange::Update { at, changes, .. } => FetchedRecordsEvent::Update {
                index_path: IndexPath::row(*at),
                changes: changes.clone(),
            },
        }
    }
}

impl<R> Clone for ItemChange<R> {
    fn clone(&self) -> Self {
        match self {
            ItemChange::Insertion { item, at } => ItemChange::Insertion {
                item: item.clone(),
                at: *at,
            },
            ItemChange::Deletion { item, from } => ItemChange::Deletion {
                item: item.clone(),
                from: *from,
            },
            ItemChange::Move {
                item,
                from,
                to,
                changes,
            } => ItemChange::Move {
                item: item.clone(),
                from: *from,
                to: *to,
                changes: changes.clone(),
            },
            ItemChange::Update { item, at, changes } => ItemChange::Update {
                item: item.clone(),
                at: *at,
                changes: changes.clone(),
            },
        }
    }
}

impl<R: FetchableRecord> fmt::Debug for ItemChange<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemChange::Insertion { item, at } => {
                write!(f, "Insertion(at={at}, row={:?})", item.row())
            }
            ItemChange::Deletion { item, from } => {
                write!(f, "Deletion(from={from}, row={:?})", item.row())
            }
            ItemChange::Move {
                item,
                from,
                to,
                changes,
            } => write!(
                f,
                "Move(from={from}, to={to}, changes={changes:?}, row={:?})",
                item.row()
            ),
            ItemChange::Update { item, at, changes } => write!(
                f,
                "Update(at={at}, changes={changes:?}, row={:?})",
                item.row()
            ),
        }
    }
}

/// Computes the standardized edit script transforming `old` into `new`.
///
/// Entries come out with structural changes first (in discovery order) and
/// updates appended at the end. Applying the script as batch list edits
/// (deletions and move sources at old indices, insertions and move targets
/// at new indices, then in-place updates) yields `new`.
pub(crate) fn compute_changes<R: FetchableRecord>(
    old: &[Item<R>],
    new: &[Item<R>],
    identity: &RecordIdentity<R>,
) -> Vec<ItemChange<R>> {
    standardize(edit_distance_script(old, new), identity)
}

/// Row-level entry point: diff two fetched row sequences into public events.
pub fn edit_script<R: FetchableRecord>(
    old_rows: &[Row],
    new_rows: &[Row],
    identity: &RecordIdentity<R>,
) -> Vec<FetchedRecordsEvent> {
    let old: Vec<Item<R>> = old_rows.iter().map(Item::new).collect();
    let new: Vec<Item<R>> = new_rows.iter().map(Item::new).collect();
    compute_changes(&old, &new, identity)
        .iter()
        .map(ItemChange::event)
        .collect()
}

/// Wagner–Fischer over item sequences, each matrix cell holding the minimum-
/// length script for the corresponding prefixes. On equal length the
/// deletion-extended script wins over the insertion-extended one, which wins
/// over the substitution; tests pin this order.
fn edit_distance_script<R: FetchableRecord>(s: &[Item<R>], t: &[Item<R>]) -> Vec<ItemChange<R>> {
    let m = s.len();
    let n = t.len();
    let mut d: Vec<Vec<Vec<ItemChange<R>>>> = vec![vec![Vec::new(); n + 1]; m + 1];

    for i in 1..=m {
        let mut script = d[i - 1][0].clone();
        script.push(ItemChange::Deletion {
            item: s[i - 1].clone(),
            from: i - 1,
        });
        d[i][0] = script;
    }
    for j in 1..=n {
        let mut script = d[0][j - 1].clone();
        script.push(ItemChange::Insertion {
            item: t[j - 1].clone(),
            at: j - 1,
        });
        d[0][j] = script;
    }

    for i in 1..=m {
        for j in 1..=n {
            let cell = if s[i - 1] == t[j - 1] {
                d[i - 1][j - 1].clone()
            } else {
                let deletion_len = d[i - 1][j].len() + 1;
                let insertion_len = d[i][j - 1].len() + 1;
                let substitution_len = d[i - 1][j - 1].len() + 2;
                let best = deletion_len.min(insertion_len).min(substitution_len);

                if deletion_len == best {
                    let mut script = d[i - 1][j].clone();
                    script.push(ItemChange::Deletion {
                        item: s[i - 1].clone(),
                        from: i - 1,
                    });
                    script
                } else if insertion_len == best {
                    let mut script = d[i][j - 1].clone();
                    script.push(ItemChange::Insertion {
                        item: t[j - 1].clone(),
                        at: j - 1,
                    });
                    script
                } else {
                    let mut script = d[i - 1][j - 1].clone();
                    script.push(ItemChange::Deletion {
                        item: s[i - 1].clone(),
                        from: i - 1,
                    });
                    script.push(ItemChange::Insertion {
                        item: t[j - 1].clone(),
                        at: j - 1,
                    });
                    script
                }
            };
            d[i][j] = cell;
        }
    }

    std::mem::take(&mut d[m][n])
}

/// Merges deletion/insertion pairs of the same record into moves or updates.
/// Updates are buffered and appended after all structural changes.
fn standardize<R: FetchableRecord>(
    raw: Vec<ItemChange<R>>,
    identity: &RecordIdentity<R>,
) -> Vec<ItemChange<R>> {
    let mut merged: Vec<ItemChange<R>> = Vec::new();
    let mut updates: Vec<ItemChange<R>> = Vec::new();

    for change in raw {
        let Some((index, changes)) = merge_candidate(&change, &merged, identity) else {
            merged.push(change);
            continue;
        };
        let counterpart = merged.remove(index);
        let (old_from, new_item, new_at) = match (&change, &counterpart) {
            (ItemChange::Deletion { from, .. }, ItemChange::Insertion { item, at }) => {
                (*from, item.clone(), *at)
            }
            (ItemChange::Insertion { item, at }, ItemChange::Deletion { from, .. }) => {
                (*from, item.clone(), *at)
            }
            _ => unreachable!("merge candidates are inverse deletion/insertion pairs"),
        };
        if settled_index(old_from, &merged) == new_at {
            updates.push(ItemChange::Update {
                item: new_item,
                at: new_at,
                changes,
            });
        } else {
            merged.push(ItemChange::Move {
                item: new_item,
                from: old_from,
                to: new_at,
                changes,
            });
        }
    }

    merged.extend(updates);
    merged
}

/// Finds, for a deletion or insertion, the inverse entry in the accumulator
/// denoting the same record. Pairs whose rows do not share a column set are
/// never merged.
fn merge_candidate<R: FetchableRecord>(
    change: &ItemChange<R>,
    merged: &[ItemChange<R>],
    identity: &RecordIdentity<R>,
) -> Option<(usize, HashMap<String, Value>)> {
    match change {
        ItemChange::Insertion { item: new_item, .. } => {
            for (index, other) in merged.iter().enumerate() {
                if let ItemChange::Deletion { item: old_item, .. } = other {
                    if identity.same(old_item.record(), new_item.record()) {
                        if let Some(changes) = changed_values(old_item.row(), new_item.row()) {
                            return Some((index, changes));
                        }
                    }
                }
            }
            None
        }
        ItemChange::Deletion { item: old_item, .. } => {
            for (index, other) in merged.iter().enumerate() {
                if let ItemChange::Insertion { item: new_item, .. } = other {
                    if identity.same(old_item.record(), new_item.record()) {
                        if let Some(changes) = changed_values(old_item.row(), new_item.row()) {
                            return Some((index, changes));
                        }
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Map from each column whose value changed to its old value, or `None` when
/// the rows do not expose the same column set (incompatible schemas).
fn changed_values(old: &Row, new: &Row) -> Option<HashMap<String, Value>> {
    if !old.same_column_set(new) {
        return None;
    }
    let mut changes = HashMap::new();
    for (column, new_value) in new.iter() {
        match old.get(column) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => {
                changes.insert(column.to_string(), old_value.clone());
            }
            None => return None,
        }
    }
    Some(changes)
}

/// Where the deleted item would sit once the structural entries still in the
/// accumulator are applied as batch edits: deletions below it shift it left,
/// then insertions are replayed in ascending target order and shift it right
/// when they land at or below it. A pair whose settled index equals the
/// insertion index is an in-place update, not a move.
fn settled_index<R>(from: usize, merged: &[ItemChange<R>]) -> usize {
    let mut removed_below = 0;
    let mut insertion_targets = Vec::new();
    for change in merged {
        match change {
            ItemChange::Deletion { from: other, .. } => {
                if *other < from {
                    removed_below += 1;
                }
            }
            ItemChange::Insertion { at, .. } => insertion_targets.push(*at),
            ItemChange::Move {
                from: other, to, ..
            } => {
                if *other < from {
                    removed_below += 1;
                }
                insertion_targets.push(*to);
            }
            ItemChange::Update { .. } => {}
        }
    }

    let mut index = from - removed_below;
    insertion_targets.sort_unstable();
    for at in insertion_targets {
        if at <= index {
            index += 1;
        }
    }
    index
}
