/// A result type defaulting to [`InstallError`].
pub type InstallResult<T, E = InstallError> = core::result::Result<T, E>;

/// Errors raised while installing the backing table.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum InstallError {
    /// The table has no eligible single-column integer key.
    #[error("no key constraint with a single integer column found for {table}")]
    NoKeyConstraint { table: String },

    /// The configured key column is not an eligible key of the table.
    #[error("no key constraint with a single integer column found for {table}.{column}")]
    KeyColumnNotFound { table: String, column: String },

    /// Several eligible keys exist and none is the primary key.
    #[error(
        "multiple single-column integer keys found for {table} ({}); configure a key column",
        .candidates.join(", ")
    )]
    AmbiguousKey {
        table: String,
        candidates: Vec<String>,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Id(#[from] longid::Error),
}

impl From<InstallError> for longid::Error {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::Id(err) => err,
            other => Self::storage(other),
        }
    }
}
