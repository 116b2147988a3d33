use std::sync::Arc;

use crate::{LongId, Result};

/// Durable home of the "last issued value per type" set.
///
/// Supports two modes:
/// 1. Values are saved periodically with [`LongIdStorage::save`] and read back
///    after a restart with `load(false)`.
/// 2. After a crash, or when the persisted table cannot be trusted,
///    `load(true)` recomputes every value from the real data tables and
///    persists the result before returning it.
pub trait LongIdStorage: Send + Sync {
    /// Returns one value per known type.
    ///
    /// When `bootstrap` is true the values are recomputed from the real data
    /// tables (see [`crate::BootstrapScanner`]) and saved with
    /// `remove_unmatched = false` as a side effect.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InconsistentRow`] if a persisted row's type column
    ///   disagrees with its identifier
    /// - [`crate::Error::TypeMismatch`] if a real table holds keys of another
    ///   type
    /// - [`crate::Error::Storage`] on backend I/O failure
    fn load(&self, bootstrap: bool) -> Result<Vec<LongId>>;

    /// Persists `values`, inserting rows for new types and updating existing
    /// ones. With `remove_unmatched`, rows whose type is absent from `values`
    /// are deleted.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::DuplicateType`] if two values share a type. Nothing
    ///   is written in that case.
    /// - [`crate::Error::Storage`] on backend I/O failure
    fn save(&self, values: &[LongId], remove_unmatched: bool) -> Result<()>;

    /// Persists a single value without touching any other row.
    ///
    /// # Errors
    ///
    /// See [`LongIdStorage::save`].
    fn save_one(&self, value: LongId) -> Result<()> {
        self.save(&[value], false)
    }
}

impl<S: LongIdStorage + ?Sized> LongIdStorage for Arc<S> {
    fn load(&self, bootstrap: bool) -> Result<Vec<LongId>> {
        (**self).load(bootstrap)
    }

    fn save(&self, values: &[LongId], remove_unmatched: bool) -> Result<()> {
        (**self).save(values, remove_unmatched)
    }

    fn save_one(&self, value: LongId) -> Result<()> {
        (**self).save_one(value)
    }
}

impl<S: LongIdStorage + ?Sized> LongIdStorage for Box<S> {
    fn load(&self, bootstrap: bool) -> Result<Vec<LongId>> {
        (**self).load(bootstrap)
    }

    fn save(&self, values: &[LongId], remove_unmatched: bool) -> Result<()> {
        (**self).save(values, remove_unmatched)
    }

    fn save_one(&self, value: LongId) -> Result<()> {
        (**self).save_one(value)
    }
}
