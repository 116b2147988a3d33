use crate::{Error, LongId, Result};

/// Declares which real table backs a type and which column holds its
/// identifier.
///
/// Consumed by the [`crate::BootstrapScanner`] and by installers that seed
/// the backing table.
///
/// # Example
///
/// ```
/// use longid::ConfiguredTable;
///
/// let table = ConfiguredTable::new(0x0101, "orders")?
///     .with_key_column("order_id")
///     .with_shard(3);
/// assert_eq!(table.initial_id().sequence(), 0);
/// assert_eq!(table.initial_id().shard(), 3);
/// # Ok::<(), longid::Error>(())
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConfiguredTable {
    type_id: u16,
    table_name: String,
    schema: Option<String>,
    key_column: Option<String>,
    shard: u8,
    reserved: u8,
}

impl ConfiguredTable {
    /// Creates a descriptor for `table_name` (unquoted).
    ///
    /// # Errors
    ///
    /// - [`Error::ReservedType`] if `type_id` is zero
    /// - [`Error::InvalidTable`] if `table_name` is empty
    pub fn new(type_id: u16, table_name: impl Into<String>) -> Result<Self> {
        let table_name = table_name.into();
        if table_name.trim().is_empty() {
            return Err(Error::InvalidTable {
                reason: format!("empty table name for type {type_id:#06x}"),
            });
        }
        if type_id == 0 {
            return Err(Error::ReservedType { table: table_name });
        }
        Ok(Self {
            type_id,
            table_name,
            schema: None,
            key_column: None,
            shard: 0,
            reserved: 0,
        })
    }

    /// Sets the unquoted schema the table lives in.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Pins the identifier column instead of resolving it from key
    /// metadata.
    #[must_use]
    pub fn with_key_column(mut self, key_column: impl Into<String>) -> Self {
        self.key_column = Some(key_column.into());
        self
    }

    #[must_use]
    pub fn with_shard(mut self, shard: u8) -> Self {
        self.shard = shard;
        self
    }

    #[must_use]
    pub fn with_reserved(mut self, reserved: u8) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn key_column(&self) -> Option<&str> {
        self.key_column.as_deref()
    }

    pub fn shard(&self) -> u8 {
        self.shard
    }

    pub fn reserved(&self) -> u8 {
        self.reserved
    }

    /// The identifier recorded before anything has been allocated.
    pub fn initial_id(&self) -> LongId {
        LongId::from_components(self.type_id, self.shard, self.reserved, 0)
    }

    /// `schema.table`, or just `table` when no schema is set. Unquoted, for
    /// messages and lookups.
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table_name),
            None => self.table_name.clone(),
        }
    }
}
