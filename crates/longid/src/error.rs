//! Error types for identifier allocation and persistence.
//!
//! Every fallible operation in `longid` returns [`Error`]. Variants fall into
//! four groups:
//!
//! - **Configuration**: [`Error::InvalidState`], [`Error::ReservedType`],
//!   [`Error::InvalidTable`], [`Error::FieldOverflow`].
//! - **Validation**: [`Error::UnknownType`], [`Error::DuplicateType`],
//!   [`Error::SequenceExhausted`].
//! - **Consistency**: [`Error::TypeMismatch`], [`Error::InconsistentRow`],
//!   [`Error::MissingKeyColumn`].
//! - **I/O**: [`Error::Storage`] and [`Error::LockPoisoned`], raised by a
//!   storage backend and surfaced to the caller without retry.

use crate::LongId;

/// A result type defaulting to [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Boxed error produced by a storage collaborator (database driver, file
/// system, ...).
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// All error variants that `longid` can emit.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The allocator cannot be constructed from the state it was given.
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// `create` was called for a type that was not loaded at construction.
    #[error("unknown type {type_id:#06x}")]
    UnknownType { type_id: u16 },

    /// Two values with the same type were supplied where types must be
    /// unique.
    #[error("duplicated type {type_id:#06x} for id {id}")]
    DuplicateType { type_id: u16, id: LongId },

    /// The 32-bit sequence of a type has no room left.
    #[error("sequence exhausted for type {type_id:#06x}")]
    SequenceExhausted { type_id: u16 },

    /// A codec field does not fit its declared width.
    #[error("{field} value {value:#x} exceeds maximum {max:#x}")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// Type zero is reserved for internal use.
    #[error("type 0 is reserved for internal use (table {table})")]
    ReservedType { table: String },

    /// A configured table descriptor is malformed.
    #[error("invalid table: {reason}")]
    InvalidTable { reason: String },

    /// The maximum key of a real table decodes to another type.
    #[error("type for table {table} should be {expected:#06x} but found {found:#06x}")]
    TypeMismatch {
        table: String,
        found: u16,
        expected: u16,
    },

    /// A persisted row's type column disagrees with its encoded identifier.
    #[error("type for id {id} should be {expected:#06x} but equals to {stored:#06x}")]
    InconsistentRow {
        id: LongId,
        expected: u16,
        stored: u16,
    },

    /// A real table cannot be scanned because its key column is unknown.
    #[error("no key column configured for table {table}")]
    MissingKeyColumn { table: String },

    /// A storage lock was poisoned by a panicking thread.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),
}

impl Error {
    /// Wraps any collaborator error into [`Error::Storage`].
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Storage(err.into())
    }
}

#[cfg(not(feature = "parking-lot"))]
use std::sync::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
// Convert all poisoned lock errors to a simplified `LockPoisoned`
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
