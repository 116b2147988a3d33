use std::{collections::BTreeMap, path::Path};

use longid::{
    BootstrapScanner, ConfiguredTable, Error, LongId, LongIdStorage, MaxKeySource, Result, TypeRow,
    reconcile,
};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Backing table used when none is configured.
pub const DEFAULT_TABLE_NAME: &str = "_longIds";

/// Width of the string columns of the backing table.
pub const SYS_NAME_SIZE: usize = 128;

pub(crate) const TYPE_COLUMN: &str = "TypeId";
pub(crate) const ID_COLUMN: &str = "Id";
pub(crate) const TABLE_NAME_COLUMN: &str = "TableName";
pub(crate) const KEY_NAME_COLUMN: &str = "KeyName";
pub(crate) const SHARD_COLUMN: &str = "Shard";

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`, or `"table"` when the table has no schema.
pub fn quoted_table_name(table: &ConfiguredTable) -> String {
    match table.schema() {
        Some(schema) => format!(
            "{}.{}",
            quote_identifier(schema),
            quote_identifier(table.table_name())
        ),
        None => quote_identifier(table.table_name()),
    }
}

/// A [`LongIdStorage`] keeping one row per type in a SQLite table.
///
/// The backing table is created by [`crate::Installer`]. Every
/// [`LongIdStorage::save`] runs in a single transaction: either all inserts,
/// updates and deletes land, or none do.
///
/// # Example
/// ```
/// use longid::{LongId, LongIdAllocator, LongIdStorage};
/// use longid_sqlite::{Installer, SqliteStorage};
///
/// let storage = SqliteStorage::in_memory()?;
/// Installer::new(&storage).create_table()?;
/// storage.save(&[LongId::from_components(1, 0, 0, 9)], false)?;
///
/// let allocator = LongIdAllocator::new(storage)?;
/// assert_eq!(allocator.create(1)?.sequence(), 10);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    table_name: String,
    quoted_table_name: String,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path`, using `table_name` as the
    /// backing table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, table_name: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::storage)?;
        Self::from_connection(conn, table_name)
    }

    /// An in-memory database with the default backing table name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if SQLite cannot allocate the database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::storage)?;
        Self::from_connection(conn, DEFAULT_TABLE_NAME)
    }

    /// Wraps an already open connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTable`] if `table_name` is blank or longer
    /// than [`SYS_NAME_SIZE`].
    pub fn from_connection(conn: Connection, table_name: impl Into<String>) -> Result<Self> {
        let table_name = table_name.into();
        if table_name.trim().is_empty() || table_name.chars().count() > SYS_NAME_SIZE {
            return Err(Error::InvalidTable {
                reason: format!("backing table name {table_name:?} must be 1 to {SYS_NAME_SIZE} characters"),
            });
        }
        Ok(Self {
            conn: Mutex::new(conn),
            quoted_table_name: quote_identifier(&table_name),
            table_name,
        })
    }

    /// Unquoted name of the backing table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub(crate) fn quoted_table_name(&self) -> &str {
        &self.quoted_table_name
    }

    /// Locks the underlying connection, e.g. to create or fill data tables.
    ///
    /// Do not call back into this storage while holding the guard.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Every row of the backing table, ordered by type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the query fails or a column holds a
    /// value outside its field width.
    pub fn rows(&self) -> Result<Vec<TypeRow>> {
        let conn = self.conn.lock();
        self.read_rows(&conn)
    }

    fn read_rows(&self, conn: &Connection) -> Result<Vec<TypeRow>> {
        let sql = format!(
            "SELECT {TYPE_COLUMN}, {ID_COLUMN}, {TABLE_NAME_COLUMN}, {KEY_NAME_COLUMN}, {SHARD_COLUMN} \
             FROM {} ORDER BY {TYPE_COLUMN}",
            self.quoted_table_name
        );
        let mut stmt = conn.prepare(&sql).map_err(Error::storage)?;
        let columns = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })
            .map_err(Error::storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::storage)?;

        columns
            .into_iter()
            .map(|(type_id, id, table_name, key_name, shard)| {
                Ok(TypeRow {
                    type_id: narrow(TYPE_COLUMN, type_id)?,
                    id: LongId::from_i64(id),
                    table_name,
                    key_name,
                    shard: shard.map(|s| narrow(SHARD_COLUMN, s)).transpose()?,
                })
            })
            .collect()
    }

    fn apply(&self, tx: &Transaction<'_>, values: &[LongId], remove_unmatched: bool) -> Result<usize> {
        let persisted: BTreeMap<u16, TypeRow> = self
            .read_rows(tx)?
            .into_iter()
            .map(|row| (row.type_id, row))
            .collect();
        let changes = reconcile(&persisted, values, remove_unmatched)?;

        let table = &self.quoted_table_name;
        if !changes.updates.is_empty() {
            let mut update = tx
                .prepare_cached(&format!(
                    "UPDATE {table} SET {ID_COLUMN} = ?1 WHERE {TYPE_COLUMN} = ?2"
                ))
                .map_err(Error::storage)?;
            for id in &changes.updates {
                update
                    .execute(params![id.to_i64(), id.type_id()])
                    .map_err(Error::storage)?;
            }
        }
        if !changes.inserts.is_empty() {
            let mut insert = tx
                .prepare_cached(&format!(
                    "INSERT INTO {table} ({TYPE_COLUMN}, {ID_COLUMN}) VALUES (?1, ?2)"
                ))
                .map_err(Error::storage)?;
            for id in &changes.inserts {
                insert
                    .execute(params![id.type_id(), id.to_i64()])
                    .map_err(Error::storage)?;
            }
        }
        if !changes.deletes.is_empty() {
            let mut delete = tx
                .prepare_cached(&format!("DELETE FROM {table} WHERE {TYPE_COLUMN} = ?1"))
                .map_err(Error::storage)?;
            for type_id in &changes.deletes {
                delete.execute(params![type_id]).map_err(Error::storage)?;
            }
        }

        Ok(changes.len())
    }
}

fn narrow<T: TryFrom<i64>>(column: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| Error::storage(format!("column {column} holds out of range value {value}")))
}

impl MaxKeySource for SqliteStorage {
    fn max_key(&self, table: &ConfiguredTable, key_column: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            quote_identifier(key_column),
            quoted_table_name(table)
        );
        let conn = self.conn.lock();
        conn.query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))
            .optional()
            .map(Option::flatten)
            .map_err(Error::storage)
    }
}

impl LongIdStorage for SqliteStorage {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(table = %self.table_name))
    )]
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
        instrument(
            level = "debug",
            skip(self, values),
            fields(table = %self.table_name, values = values.len())
        )
    )]
    fn save(&self, values: &[LongId], remove_unmatched: bool) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(Error::storage)?;
        let _changed = self.apply(&tx, values, remove_unmatched)?;
        tx.commit().map_err(Error::storage)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(changed = _changed, "backing table reconciled");

        Ok(())
    }
}
