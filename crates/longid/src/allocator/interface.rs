use std::sync::Arc;

use crate::{LongId, Result};

/// A minimal interface for issuing [`LongId`]s.
///
/// Consumers that only need fresh identifiers (request handlers, importers,
/// the periodic flush task) depend on this trait rather than on a concrete
/// allocator and its storage type.
pub trait LongIdProvider: Send + Sync {
    /// Issues the next identifier for `type_id`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::UnknownType`] if the type is not known
    /// - [`crate::Error::SequenceExhausted`] if the type has no sequence room
    fn create(&self, type_id: u16) -> Result<LongId>;

    /// Persists the last issued value of every known type.
    ///
    /// # Errors
    ///
    /// Propagates storage errors. In-memory state is left untouched, so the
    /// call can be retried as is.
    fn flush_to_storage(&self) -> Result<()>;
}

impl<P: LongIdProvider + ?Sized> LongIdProvider for Arc<P> {
    fn create(&self, type_id: u16) -> Result<LongId> {
        (**self).create(type_id)
    }

    fn flush_to_storage(&self) -> Result<()> {
        (**self).flush_to_storage()
    }
}
