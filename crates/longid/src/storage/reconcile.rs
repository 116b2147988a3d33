use std::collections::{BTreeMap, BTreeSet, HashMap};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Error, LongId, Result, TypeRow};

/// The writes needed to bring the backing table in line with an incoming
/// value set.
///
/// Inserts, updates and deletes address disjoint rows (keyed by type), so a
/// backend may apply them in any order as long as it applies all of them as
/// one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Values whose type has no persisted row yet.
    pub inserts: Vec<LongId>,
    /// Values whose persisted row holds a different identifier.
    pub updates: Vec<LongId>,
    /// Types whose rows must be removed.
    pub deletes: Vec<u16>,
}

impl ChangeSet {
    /// Returns true if no write is needed.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of row writes.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

/// Rejects `values` if two of them share a type.
///
/// # Errors
///
/// Returns [`Error::DuplicateType`] naming the first repeated type and the
/// identifier that collided.
pub fn ensure_unique_types(values: &[LongId]) -> Result<()> {
    let mut seen = HashMap::with_capacity(values.len());
    for &id in values {
        if seen.insert(id.type_id(), id).is_some() {
            return Err(Error::DuplicateType {
                type_id: id.type_id(),
                id,
            });
        }
    }
    Ok(())
}

/// Diffs `incoming` against the `persisted` rows (keyed by type).
///
/// 1. Incoming types are validated for uniqueness before anything else.
/// 2. Each incoming value updates the row of its type (when the value
///    differs) or becomes an insert. Matched rows are never deleted.
/// 3. With `remove_unmatched`, every persisted row whose type was not in
///    `incoming` is deleted.
///
/// Incoming values are processed in the order supplied, so inserts and
/// updates keep that order; deletes are ordered by type.
///
/// # Errors
///
/// Returns [`Error::DuplicateType`] if `incoming` repeats a type.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "trace", skip_all, fields(persisted = persisted.len(), incoming = incoming.len()))
)]
pub fn reconcile(
    persisted: &BTreeMap<u16, TypeRow>,
    incoming: &[LongId],
    remove_unmatched: bool,
) -> Result<ChangeSet> {
    ensure_unique_types(incoming)?;

    let mut unmatched: BTreeSet<u16> = persisted.keys().copied().collect();
    let mut changes = ChangeSet::default();

    for &id in incoming {
        match persisted.get(&id.type_id()) {
            Some(row) => {
                unmatched.remove(&id.type_id());
                if row.id != id {
                    changes.updates.push(id);
                }
            }
            None => changes.inserts.push(id),
        }
    }

    if remove_unmatched {
        changes.deletes = unmatched.into_iter().collect();
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(type_id: u16, sequence: u32) -> LongId {
        LongId::from_components(type_id, 0xCC, 0xBB, sequence)
    }

    fn persisted(ids: &[LongId]) -> BTreeMap<u16, TypeRow> {
        ids.iter().map(|&id| (id.type_id(), TypeRow::new(id))).collect()
    }

    #[test]
    fn diff_updates_inserts_and_deletes() {
        let rows = persisted(&[id(1, 10), id(2, 20), id(3, 30)]);

        let changes = reconcile(&rows, &[id(1, 11), id(4, 1)], true).unwrap();

        assert_eq!(changes.updates, vec![id(1, 11)]);
        assert_eq!(changes.inserts, vec![id(4, 1)]);
        assert_eq!(changes.deletes, vec![2, 3]);
        assert_eq!(changes.len(), 4);
    }

    #[test]
    fn unmatched_rows_survive_without_removal() {
        let rows = persisted(&[id(1, 10), id(2, 20), id(3, 30)]);

        let changes = reconcile(&rows, &[id(1, 11), id(4, 1)], false).unwrap();

        assert_eq!(changes.updates, vec![id(1, 11)]);
        assert_eq!(changes.inserts, vec![id(4, 1)]);
        assert!(changes.deletes.is_empty());
    }

    #[test]
    fn unchanged_values_produce_no_writes() {
        let rows = persisted(&[id(1, 10), id(2, 20)]);

        let changes = reconcile(&rows, &[id(1, 10), id(2, 20)], true).unwrap();

        assert!(changes.is_empty());
        assert_eq!(changes.len(), 0);
    }

    #[test]
    fn duplicate_types_are_rejected_before_diffing() {
        let rows = persisted(&[id(1, 10)]);
        let values = [
            LongId::from_raw(0x1FEE_CCBB_4433_2211 + 1),
            LongId::from_raw(0x3FEE_CCBB_4433_2211 + 2),
            LongId::from_raw(0x1FEE_CCBB_4433_2211 + 3),
        ];

        let err = reconcile(&rows, &values, true).unwrap_err();

        match err {
            Error::DuplicateType { type_id, id } => {
                assert_eq!(type_id, 0x1FEE);
                assert_eq!(id, values[2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_incoming_deletes_everything_when_requested() {
        let rows = persisted(&[id(5, 1), id(6, 1)]);

        assert_eq!(reconcile(&rows, &[], true).unwrap().deletes, vec![5, 6]);
        assert!(reconcile(&rows, &[], false).unwrap().is_empty());
    }

    #[test]
    fn inserts_keep_incoming_order() {
        let changes = reconcile(&BTreeMap::new(), &[id(9, 0), id(3, 0), id(7, 0)], true).unwrap();
        assert_eq!(changes.inserts, vec![id(9, 0), id(3, 0), id(7, 0)]);
    }
}
