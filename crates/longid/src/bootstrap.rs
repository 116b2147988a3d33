//! Recovery of last issued values from the real data tables.
//!
//! Instead of trusting the backing table, the scanner asks each configured
//! table for `MAX(key)` and checks that the recovered identifier carries the
//! expected type.

use std::collections::BTreeSet;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{ConfiguredTable, Error, LongId, Result, TypeRow};

/// Executes `SELECT MAX(key_column) FROM table` against a backend.
pub trait MaxKeySource {
    /// Returns the largest key in `table`, or `None` when the table is
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] (or another backend error) if the query
    /// cannot be executed.
    fn max_key(&self, table: &ConfiguredTable, key_column: &str) -> Result<Option<i64>>;
}

impl<Q: MaxKeySource + ?Sized> MaxKeySource for &Q {
    fn max_key(&self, table: &ConfiguredTable, key_column: &str) -> Result<Option<i64>> {
        (**self).max_key(table, key_column)
    }
}

/// Output of [`BootstrapScanner::rebuild`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rebuild {
    /// Values recomputed from real tables. These are what a storage persists
    /// (with `remove_unmatched = false`).
    pub scanned: Vec<LongId>,
    /// `scanned` plus the persisted values of types without a real-table
    /// mapping: the full set an allocator should be seeded with.
    pub values: Vec<LongId>,
}

/// Recomputes last values by scanning real tables.
pub struct BootstrapScanner<Q> {
    source: Q,
}

impl<Q: MaxKeySource> BootstrapScanner<Q> {
    pub fn new(source: Q) -> Self {
        Self { source }
    }

    /// Recovers the last value of a single table.
    ///
    /// An empty table yields the zero-sequence identifier for the table's
    /// `(type, shard, reserved)`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingKeyColumn`] if the table has no key column
    /// - [`Error::TypeMismatch`] if `MAX(key)` decodes to another type
    /// - any error of the [`MaxKeySource`]
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(table = %table.full_name()))
    )]
    pub fn scan_table(&self, table: &ConfiguredTable) -> Result<LongId> {
        let key_column = table.key_column().ok_or_else(|| Error::MissingKeyColumn {
            table: table.full_name(),
        })?;

        let Some(max) = self.source.max_key(table, key_column)? else {
            #[cfg(feature = "tracing")]
            tracing::debug!("table is empty, starting from sequence 0");
            return Ok(table.initial_id());
        };

        let id = LongId::from_i64(max);
        if id.type_id() != table.type_id() {
            return Err(Error::TypeMismatch {
                table: table.full_name(),
                found: id.type_id(),
                expected: table.type_id(),
            });
        }
        Ok(id)
    }

    /// Recovers the last value of every table, in order.
    ///
    /// # Errors
    ///
    /// Fails on the first table that [`Self::scan_table`] rejects.
    pub fn scan(&self, tables: &[ConfiguredTable]) -> Result<Vec<LongId>> {
        tables.iter().map(|table| self.scan_table(table)).collect()
    }

    /// Scans every persisted row that maps to a real table and merges the
    /// results with the rows that do not.
    ///
    /// # Errors
    ///
    /// - [`Error::InconsistentRow`] if a row fails validation
    /// - any error of [`Self::scan_table`]
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(rows = rows.len()))
    )]
    pub fn rebuild(&self, rows: &[TypeRow]) -> Result<Rebuild> {
        let mut tables = Vec::new();
        let mut unmapped = Vec::new();
        for row in rows {
            row.validate()?;
            match row.configured_table()? {
                Some(table) => tables.push(table),
                None => unmapped.push(row.id),
            }
        }

        let scanned = self.scan(&tables)?;
        let scanned_types: BTreeSet<u16> = scanned.iter().map(LongId::type_id).collect();

        let mut values = scanned.clone();
        values.extend(
            unmapped
                .into_iter()
                .filter(|id| !scanned_types.contains(&id.type_id())),
        );

        #[cfg(feature = "tracing")]
        tracing::info!(
            scanned = scanned.len(),
            total = values.len(),
            "recomputed last values from real tables"
        );

        Ok(Rebuild { scanned, values })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct Tables(HashMap<&'static str, Vec<i64>>);

    impl MaxKeySource for Tables {
        fn max_key(&self, table: &ConfiguredTable, _key_column: &str) -> Result<Option<i64>> {
            self.0
                .get(table.table_name())
                .map(|keys| keys.iter().copied().max())
                .ok_or_else(|| Error::storage(format!("no such table: {}", table.table_name())))
        }
    }

    fn table(type_id: u16, name: &str) -> ConfiguredTable {
        ConfiguredTable::new(type_id, name)
            .unwrap()
            .with_key_column("id")
            .with_shard(0xCC)
            .with_reserved(0xBB)
    }

    #[test]
    fn empty_table_yields_zero_sequence() {
        let scanner = BootstrapScanner::new(Tables(HashMap::from([("orders", vec![])])));

        let id = scanner.scan_table(&table(0x1FEE, "orders")).unwrap();

        assert_eq!(id, LongId::from_components(0x1FEE, 0xCC, 0xBB, 0));
    }

    #[test]
    fn max_key_is_recovered() {
        let keys = vec![
            LongId::from_components(0x1FEE, 0xCC, 0xBB, 5).to_i64(),
            LongId::from_components(0x1FEE, 0xCC, 0xBB, 41).to_i64(),
            LongId::from_components(0x1FEE, 0xCC, 0xBB, 17).to_i64(),
        ];
        let scanner = BootstrapScanner::new(Tables(HashMap::from([("orders", keys)])));

        let id = scanner.scan_table(&table(0x1FEE, "orders")).unwrap();

        assert_eq!(id.sequence(), 41);
    }

    #[test]
    fn foreign_type_in_table_is_a_mismatch() {
        let keys = vec![LongId::from_components(0x2FEE, 0, 0, 3).to_i64()];
        let scanner = BootstrapScanner::new(Tables(HashMap::from([("orders", keys)])));

        let err = scanner.scan_table(&table(0x1FEE, "orders")).unwrap_err();

        match err {
            Error::TypeMismatch {
                table,
                found,
                expected,
            } => {
                assert_eq!(table, "orders");
                assert_eq!(found, 0x2FEE);
                assert_eq!(expected, 0x1FEE);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_key_column_is_reported() {
        let scanner = BootstrapScanner::new(Tables(HashMap::new()));
        let table = ConfiguredTable::new(1, "orders").unwrap();

        assert!(matches!(
            scanner.scan_table(&table).unwrap_err(),
            Error::MissingKeyColumn { table } if table == "orders"
        ));
    }

    #[test]
    fn rebuild_merges_unmapped_rows() {
        let keys = vec![LongId::from_components(1, 0, 0, 99).to_i64()];
        let scanner = BootstrapScanner::new(Tables(HashMap::from([("orders", keys)])));

        let mapped = TypeRow {
            table_name: Some("orders".into()),
            key_name: Some("id".into()),
            ..TypeRow::new(LongId::from_components(1, 0, 0, 4))
        };
        let synthetic = TypeRow::new(LongId::from_components(2, 0, 0, 7));

        let rebuild = scanner.rebuild(&[mapped, synthetic]).unwrap();

        assert_eq!(rebuild.scanned, vec![LongId::from_components(1, 0, 0, 99)]);
        assert_eq!(
            rebuild.values,
            vec![
                LongId::from_components(1, 0, 0, 99),
                LongId::from_components(2, 0, 0, 7)
            ]
        );
    }

    #[test]
    fn rebuild_rejects_inconsistent_rows() {
        let scanner = BootstrapScanner::new(Tables(HashMap::new()));
        let row = TypeRow {
            type_id: 3,
            ..TypeRow::new(LongId::from_components(4, 0, 0, 0))
        };
        assert!(matches!(
            scanner.rebuild(&[row]).unwrap_err(),
            Error::InconsistentRow { .. }
        ));
    }
}
