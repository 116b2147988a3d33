use crate::{ConfiguredTable, Error, LongId, Result};

/// One row of the backing table.
///
/// | column      | type               |
/// |-------------|--------------------|
/// | `TypeId`    | int16, not null, unique |
/// | `Id`        | int64, not null    |
/// | `TableName` | string, nullable   |
/// | `KeyName`   | string, nullable   |
/// | `Shard`     | int16, nullable    |
///
/// `TypeId` is redundant with the high bits of `Id` and is kept for query
/// convenience; [`TypeRow::validate`] checks that the two agree.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeRow {
    pub type_id: u16,
    pub id: LongId,
    pub table_name: Option<String>,
    pub key_name: Option<String>,
    pub shard: Option<u8>,
}

impl TypeRow {
    /// A row carrying only the counter, with no real-table mapping.
    pub fn new(id: LongId) -> Self {
        Self {
            type_id: id.type_id(),
            id,
            table_name: None,
            key_name: None,
            shard: None,
        }
    }

    /// The seed row for a configured table: its zero-sequence identifier and
    /// the resolved key column. A schema-qualified table is stored as
    /// `schema.table`.
    pub fn from_table(table: &ConfiguredTable, key_column: impl Into<String>) -> Self {
        Self {
            type_id: table.type_id(),
            id: table.initial_id(),
            table_name: Some(table.full_name()),
            key_name: Some(key_column.into()),
            shard: Some(table.shard()),
        }
    }

    /// Checks that the stored type column matches the encoded type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentRow`] on disagreement.
    pub fn validate(&self) -> Result<()> {
        if self.type_id != self.id.type_id() {
            return Err(Error::InconsistentRow {
                id: self.id,
                expected: self.id.type_id(),
                stored: self.type_id,
            });
        }
        Ok(())
    }

    /// Describes the real table behind this row, if one is mapped.
    ///
    /// The shard falls back to the one encoded in the persisted identifier
    /// when the `Shard` column is null; the reserved byte always comes from
    /// the identifier. A `schema.table` name is split at the first dot.
    ///
    /// # Errors
    ///
    /// Propagates [`ConfiguredTable::new`] validation errors.
    pub fn configured_table(&self) -> Result<Option<ConfiguredTable>> {
        let Some(table_name) = self.table_name.as_deref() else {
            return Ok(None);
        };
        let mut table = match table_name.split_once('.') {
            Some((schema, name)) => ConfiguredTable::new(self.type_id, name)?.with_schema(schema),
            None => ConfiguredTable::new(self.type_id, table_name)?,
        }
        .with_shard(self.shard.unwrap_or(self.id.shard()))
        .with_reserved(self.id.reserved());
        if let Some(key) = self.key_name.as_deref().filter(|k| !k.is_empty()) {
            table = table.with_key_column(key);
        }
        Ok(Some(table))
    }
}

impl From<LongId> for TypeRow {
    fn from(id: LongId) -> Self {
        Self::new(id)
    }
}
