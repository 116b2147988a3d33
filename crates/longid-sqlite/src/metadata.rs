use rusqlite::{Connection, Result, params};

use crate::storage::quote_identifier;

/// Schema that unqualified table names resolve to.
pub const DEFAULT_SCHEMA: &str = "main";

/// A single-column key constraint of a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueKey {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    /// Declared column type, as written in the DDL.
    pub data_type: String,
    pub is_primary_key: bool,
}

impl UniqueKey {
    /// Whether the column has integer affinity, i.e. can hold a `LongId`.
    pub fn is_integer(&self) -> bool {
        self.data_type.to_ascii_uppercase().contains("INT")
    }

    /// `schema.table`, the key under which the installer looks tables up.
    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

/// Reads table and key metadata from `sqlite_master` and the `pragma_*`
/// table-valued functions.
pub struct SqliteMetadata<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetadata<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Whether a table named `table_name` exists (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the catalog cannot be queried.
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            params![table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Names of the attached databases (`main`, `temp` and any `ATTACH`ed
    /// schema), in attach order.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the catalog cannot be queried.
    pub fn schemas(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_database_list ORDER BY seq")?;
        stmt.query_map([], |row| row.get(0))?.collect()
    }

    /// Every user table of `schema`, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the catalog cannot be queried or the
    /// schema is not attached.
    pub fn tables(&self, schema: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             ORDER BY name",
            quote_identifier(schema)
        ))?;
        stmt.query_map([], |row| row.get(0))?.collect()
    }

    /// Every single-column primary key and single-column unique index of
    /// every user table in every attached schema. Composite keys are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the catalog cannot be queried.
    pub fn unique_keys(&self) -> Result<Vec<UniqueKey>> {
        let mut keys = Vec::new();
        for schema in self.schemas()? {
            for table in self.tables(&schema)? {
                self.table_keys(&schema, &table, &mut keys)?;
            }
        }
        Ok(keys)
    }

    fn table_keys(&self, schema: &str, table: &str, keys: &mut Vec<UniqueKey>) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type, pk FROM pragma_table_info(?1, ?2) ORDER BY cid")?;
        let columns = stmt
            .query_map(params![table, schema], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>>>()?;

        let data_type = |column: &str| {
            columns
                .iter()
                .find(|(name, _, _)| name == column)
                .map(|(_, ty, _)| ty.clone())
                .unwrap_or_default()
        };
        let key = |column: &str, data_type: String, is_primary_key: bool| UniqueKey {
            schema_name: schema.to_owned(),
            table_name: table.to_owned(),
            column_name: column.to_owned(),
            data_type,
            is_primary_key,
        };

        let primary: Vec<&(String, String, i64)> =
            columns.iter().filter(|(_, _, pk)| *pk > 0).collect();
        if let [(name, ty, _)] = primary.as_slice() {
            keys.push(key(name, ty.clone(), true));
        }

        let mut stmt = self.conn.prepare(
            "SELECT name FROM pragma_index_list(?1, ?2) \
             WHERE \"unique\" = 1 AND origin <> 'pk' AND partial = 0 ORDER BY name",
        )?;
        let indexes = stmt
            .query_map(params![table, schema], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_index_info(?1, ?2) ORDER BY seqno")?;
        for index in indexes {
            // Expression columns have a NULL name.
            let index_columns = stmt
                .query_map(params![index, schema], |row| row.get::<_, Option<String>>(0))?
                .collect::<Result<Vec<_>>>()?;
            if let [Some(column)] = index_columns.as_slice() {
                keys.push(key(column, data_type(column), false));
            }
        }

        Ok(())
    }
}
