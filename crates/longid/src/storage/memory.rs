use std::collections::{BTreeMap, HashMap};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    BootstrapScanner, ConfiguredTable, Error, LongId, LongIdStorage, MaxKeySource, Result,
    TypeRow, reconcile,
    storage::{Mutex, lock},
};

/// A [`LongIdStorage`] kept entirely in process memory.
///
/// Rows are keyed by type exactly like the database-backed table, and the
/// same reconciliation rules apply on [`LongIdStorage::save`]. "Real" data
/// tables can be registered with [`MemoryStorage::insert_data_table`] so the
/// bootstrap path works without a database.
///
/// # Example
///
/// ```
/// use longid::{LongId, LongIdAllocator, LongIdStorage, MemoryStorage};
///
/// let storage = MemoryStorage::with_values([LongId::from_components(1, 0, 0, 41)])?;
/// let allocator = LongIdAllocator::new(storage)?;
/// assert_eq!(allocator.create(1)?.sequence(), 42);
/// # Ok::<(), longid::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rows: Mutex<BTreeMap<u16, TypeRow>>,
    data_tables: Mutex<HashMap<String, Vec<i64>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one synthetic row per value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateType`] if two values share a type.
    pub fn with_values(values: impl IntoIterator<Item = LongId>) -> Result<Self> {
        Self::with_rows(values.into_iter().map(TypeRow::new))
    }

    /// Seeds the given rows. Rows are not validated here; an inconsistent
    /// row surfaces on [`LongIdStorage::load`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateType`] if two rows share a type column.
    pub fn with_rows(rows: impl IntoIterator<Item = TypeRow>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for row in rows {
            let (type_id, id) = (row.type_id, row.id);
            if map.insert(type_id, row).is_some() {
                return Err(Error::DuplicateType { type_id, id });
            }
        }
        Ok(Self {
            rows: Mutex::new(map),
            data_tables: Mutex::default(),
        })
    }

    /// Maps `table` onto a backing row, seeding it with the zero-sequence
    /// identifier if the type has no row yet. An existing row keeps its
    /// value.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingKeyColumn`] if the table has no key column
    /// - [`Error::LockPoisoned`] if the storage lock is poisoned
    pub fn configure_table(&self, table: &ConfiguredTable) -> Result<()> {
        let key_column = table.key_column().ok_or_else(|| Error::MissingKeyColumn {
            table: table.full_name(),
        })?;
        let seed = TypeRow::from_table(table, key_column);
        let mut rows = lock(&self.rows)?;
        rows.entry(table.type_id())
            .and_modify(|row| {
                row.table_name.clone_from(&seed.table_name);
                row.key_name.clone_from(&seed.key_name);
                row.shard = seed.shard;
            })
            .or_insert(seed);
        Ok(())
    }

    /// Registers (or replaces) an in-memory data table holding `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] if the storage lock is poisoned.
    pub fn insert_data_table(
        &self,
        table_name: impl Into<String>,
        keys: impl IntoIterator<Item = LongId>,
    ) -> Result<()> {
        let keys = keys.into_iter().map(|id| id.to_i64()).collect();
        lock(&self.data_tables)?.insert(table_name.into(), keys);
        Ok(())
    }

    /// All rows, ordered by type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] if the storage lock is poisoned.
    pub fn rows(&self) -> Result<Vec<TypeRow>> {
        Ok(lock(&self.rows)?.values().cloned().collect())
    }

    /// All persisted identifiers, ordered by type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] if the storage lock is poisoned.
    pub fn values(&self) -> Result<Vec<LongId>> {
        Ok(lock(&self.rows)?.values().map(|row| row.id).collect())
    }
}

impl MaxKeySource for MemoryStorage {
    fn max_key(&self, table: &ConfiguredTable, _key_column: &str) -> Result<Option<i64>> {
        let tables = lock(&self.data_tables)?;
        let keys = tables
            .get(table.table_name())
            .ok_or_else(|| Error::storage(format!("no such table: {}", table.full_name())))?;
        // Signed comparison, the same as MAX() over a BIGINT column.
        Ok(keys.iter().copied().max())
    }
}

impl LongIdStorage for MemoryStorage {
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    fn load(&self, bootstrap: bool) -> Result<Vec<LongId>> {
        let rows = self.rows()?;

        if bootstrap {
            let rebuild = BootstrapScanner::new(self).rebuild(&rows)?;
            self.save(&rebuild.scanned, false)?;
            return Ok(rebuild.values);
        }

        rows.iter()
            .map(|row| {
                row.validate()?;
                Ok(row.id)
            })
            .collect()
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, values), fields(values = values.len()))
    )]
    fn save(&self, values: &[LongId], remove_unmatched: bool) -> Result<()> {
        let mut rows = lock(&self.rows)?;
        let changes = reconcile(&rows, values, remove_unmatched)?;

        for id in changes.updates {
            if let Some(row) = rows.get_mut(&id.type_id()) {
                row.id = id;
            }
        }
        for id in changes.inserts {
            rows.insert(id.type_id(), TypeRow::new(id));
        }
        for type_id in changes.deletes {
            rows.remove(&type_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(type_id: u16, sequence: u32) -> LongId {
        LongId::from_components(type_id, 0xCC, 0xBB, sequence)
    }

    #[test]
    fn values_round_trip_through_load() {
        let storage = MemoryStorage::with_values([id(1, 10), id(2, 20)]).unwrap();
        assert_eq!(storage.load(false).unwrap(), vec![id(1, 10), id(2, 20)]);
    }

    #[test]
    fn save_updates_inserts_and_removes() {
        let storage = MemoryStorage::with_values([id(1, 10), id(2, 20), id(3, 30)]).unwrap();

        storage.save(&[id(1, 11), id(4, 1)], true).unwrap();

        assert_eq!(storage.values().unwrap(), vec![id(1, 11), id(4, 1)]);
    }

    #[test]
    fn duplicate_save_leaves_rows_untouched() {
        let storage = MemoryStorage::with_values([id(1, 10), id(2, 20)]).unwrap();
        let before = storage.rows().unwrap();

        let err = storage.save(&[id(1, 5), id(1, 9)], true).unwrap_err();

        assert!(matches!(err, Error::DuplicateType { type_id: 1, .. }));
        assert_eq!(storage.rows().unwrap(), before);
    }

    #[test]
    fn save_one_keeps_other_rows() {
        let storage = MemoryStorage::with_values([id(1, 10), id(2, 20)]).unwrap();

        storage.save_one(id(2, 21)).unwrap();

        assert_eq!(storage.values().unwrap(), vec![id(1, 10), id(2, 21)]);
    }

    #[test]
    fn update_preserves_table_mapping() {
        let storage = MemoryStorage::new();
        let table = ConfiguredTable::new(7, "orders")
            .unwrap()
            .with_key_column("order_id");
        storage.configure_table(&table).unwrap();

        storage.save(&[LongId::from_components(7, 0, 0, 3)], true).unwrap();

        let rows = storage.rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id.sequence(), 3);
        assert_eq!(rows[0].table_name.as_deref(), Some("orders"));
        assert_eq!(rows[0].key_name.as_deref(), Some("order_id"));
    }

    #[test]
    fn inconsistent_row_fails_load() {
        let row = TypeRow {
            type_id: 2,
            ..TypeRow::new(id(1, 0))
        };
        let storage = MemoryStorage::with_rows([row]).unwrap();

        assert!(matches!(
            storage.load(false).unwrap_err(),
            Error::InconsistentRow {
                expected: 1,
                stored: 2,
                ..
            }
        ));
    }

    #[test]
    fn bootstrap_recomputes_and_persists() {
        let storage = MemoryStorage::with_values([id(9, 3)]).unwrap();
        let orders = ConfiguredTable::new(1, "orders")
            .unwrap()
            .with_key_column("id")
            .with_shard(0xCC)
            .with_reserved(0xBB);
        let users = ConfiguredTable::new(2, "users")
            .unwrap()
            .with_key_column("id")
            .with_shard(0xCC)
            .with_reserved(0xBB);
        storage.configure_table(&orders).unwrap();
        storage.configure_table(&users).unwrap();
        storage
            .insert_data_table("orders", [id(1, 4), id(1, 57), id(1, 12)])
            .unwrap();
        storage.insert_data_table("users", []).unwrap();

        let values = storage.load(true).unwrap();

        assert_eq!(values, vec![id(1, 57), id(2, 0), id(9, 3)]);
        // Persisted as a side effect, so a plain load agrees.
        assert_eq!(storage.load(false).unwrap(), values);
    }

    #[test]
    fn bootstrap_type_mismatch_persists_nothing() {
        let storage = MemoryStorage::new();
        let orders = ConfiguredTable::new(1, "orders")
            .unwrap()
            .with_key_column("id");
        storage.configure_table(&orders).unwrap();
        storage.insert_data_table("orders", [id(5, 1)]).unwrap();
        let before = storage.rows().unwrap();

        let err = storage.load(true).unwrap_err();

        assert!(matches!(
            err,
            Error::TypeMismatch {
                found: 5,
                expected: 1,
                ..
            }
        ));
        assert_eq!(storage.rows().unwrap(), before);
    }
}
