use std::collections::HashMap;

use longid::{ConfiguredTable, LongId, TypeRow};
use rusqlite::{Connection, params};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    DEFAULT_SCHEMA, InstallError, InstallResult, SqliteMetadata, SqliteStorage, UniqueKey,
    storage::{ID_COLUMN, KEY_NAME_COLUMN, SHARD_COLUMN, SYS_NAME_SIZE, TABLE_NAME_COLUMN, TYPE_COLUMN},
};

/// Creates and seeds the backing table of a [`SqliteStorage`].
pub struct Installer<'a> {
    storage: &'a SqliteStorage,
}

impl<'a> Installer<'a> {
    pub fn new(storage: &'a SqliteStorage) -> Self {
        Self { storage }
    }

    /// Creates the backing table if it does not exist. Returns whether it was
    /// created.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Sqlite`] if the DDL fails.
    pub fn create_table(&self) -> InstallResult<bool> {
        let conn = self.storage.connection();
        self.create_table_with(&conn)
    }

    fn create_table_with(&self, conn: &Connection) -> InstallResult<bool> {
        if SqliteMetadata::new(conn).table_exists(self.storage.table_name())? {
            return Ok(false);
        }
        conn.execute_batch(&format!(
            "CREATE TABLE {} (\
                {TYPE_COLUMN} SMALLINT NOT NULL PRIMARY KEY, \
                {ID_COLUMN} BIGINT NOT NULL, \
                {TABLE_NAME_COLUMN} VARCHAR({SYS_NAME_SIZE}) NULL, \
                {KEY_NAME_COLUMN} VARCHAR({SYS_NAME_SIZE}) NULL, \
                {SHARD_COLUMN} SMALLINT NULL)",
            self.storage.quoted_table_name()
        ))?;

        #[cfg(feature = "tracing")]
        tracing::info!(table = %self.storage.table_name(), "created backing table");

        Ok(true)
    }

    /// Creates the backing table if needed and maps every table in `tables`
    /// onto a row carrying its zero-sequence identifier for `shard` and
    /// `reserved`.
    ///
    /// The key column of each table is resolved from its single-column
    /// integer keys. Unique keys other than the primary key are only
    /// considered when `use_unique_if_primary_key_not_match` is set. A
    /// configured key column must name one of those keys; otherwise the only
    /// candidate, or the primary key, wins.
    ///
    /// Tables are looked up in their configured schema, `main` when none is
    /// set. Re-installing a type refreshes its mapping and keeps its current
    /// identifier; the returned rows carry the identifiers as stored. Nothing
    /// is written unless every table resolves.
    ///
    /// # Errors
    ///
    /// - [`InstallError::NoKeyConstraint`] if a table has no eligible key
    /// - [`InstallError::KeyColumnNotFound`] if the configured key column is
    ///   not eligible
    /// - [`InstallError::AmbiguousKey`] if several keys are eligible and none
    ///   is the primary key
    /// - [`InstallError::Sqlite`] on database failure
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, tables), fields(tables = tables.len()))
    )]
    pub fn install(
        &self,
        shard: u8,
        reserved: u8,
        use_unique_if_primary_key_not_match: bool,
        tables: &[ConfiguredTable],
    ) -> InstallResult<Vec<TypeRow>> {
        let mut conn = self.storage.connection();
        let tx = conn.transaction()?;

        let mut keys: HashMap<String, Vec<UniqueKey>> = HashMap::new();
        for key in SqliteMetadata::new(&tx).unique_keys()? {
            if key.is_primary_key || use_unique_if_primary_key_not_match {
                keys.entry(key.full_table_name().to_lowercase())
                    .or_default()
                    .push(key);
            }
        }

        self.create_table_with(&tx)?;

        let mut rows = tables
            .iter()
            .map(|table| {
                let table = table.clone().with_shard(shard).with_reserved(reserved);
                let candidates = keys
                    .get(&lookup_name(&table))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let key_column = resolve_key_column(&table, candidates)?;
                Ok(TypeRow::from_table(&table, key_column))
            })
            .collect::<InstallResult<Vec<_>>>()?;

        {
            let mut upsert = tx.prepare(&format!(
                "INSERT INTO {} ({TYPE_COLUMN}, {ID_COLUMN}, {TABLE_NAME_COLUMN}, {KEY_NAME_COLUMN}, {SHARD_COLUMN}) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT ({TYPE_COLUMN}) DO UPDATE SET \
                 {TABLE_NAME_COLUMN} = excluded.{TABLE_NAME_COLUMN}, \
                 {KEY_NAME_COLUMN} = excluded.{KEY_NAME_COLUMN}, \
                 {SHARD_COLUMN} = excluded.{SHARD_COLUMN} \
                 RETURNING {ID_COLUMN}",
                self.storage.quoted_table_name()
            ))?;
            for row in &mut rows {
                let stored: i64 = upsert.query_row(
                    params![
                        row.type_id,
                        row.id.to_i64(),
                        row.table_name,
                        row.key_name,
                        row.shard,
                    ],
                    |stored| stored.get(0),
                )?;
                row.id = LongId::from_i64(stored);

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    type_id = row.type_id,
                    table = ?row.table_name,
                    key = ?row.key_name,
                    "configured table"
                );
            }
        }

        tx.commit()?;
        Ok(rows)
    }
}

/// Lowercased `schema.table` of a configured table.
fn lookup_name(table: &ConfiguredTable) -> String {
    format!(
        "{}.{}",
        table.schema().unwrap_or(DEFAULT_SCHEMA),
        table.table_name()
    )
    .to_lowercase()
}

/// Picks the key column of `table` among its eligible `keys`.
fn resolve_key_column(table: &ConfiguredTable, keys: &[UniqueKey]) -> InstallResult<String> {
    let mut eligible: Vec<&UniqueKey> = keys.iter().filter(|key| key.is_integer()).collect();
    if eligible.is_empty() {
        return Err(InstallError::NoKeyConstraint {
            table: table.full_name(),
        });
    }
    // Primary key first.
    eligible.sort_by_key(|key| !key.is_primary_key);

    if let Some(column) = table.key_column() {
        return eligible
            .iter()
            .find(|key| key.column_name.eq_ignore_ascii_case(column))
            .map(|key| key.column_name.clone())
            .ok_or_else(|| InstallError::KeyColumnNotFound {
                table: table.full_name(),
                column: column.to_owned(),
            });
    }

    match eligible.as_slice() {
        [only] => Ok(only.column_name.clone()),
        [first, ..] if first.is_primary_key => Ok(first.column_name.clone()),
        _ => Err(InstallError::AmbiguousKey {
            table: table.full_name(),
            candidates: eligible.iter().map(|key| key.column_name.clone()).collect(),
        }),
    }
}
