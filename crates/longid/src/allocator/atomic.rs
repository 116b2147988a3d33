use std::collections::{HashMap, hash_map::Entry};

use portable_atomic::{AtomicU64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Error, LongId, LongIdProvider, LongIdRange, LongIdStorage, Result};

/// Number of distinct types a 16-bit type field can address.
pub const TYPE_SPACE: usize = 1 << 16;

/// The counter cell of a single type.
///
/// Holds the raw value of the last issued identifier. The prefix (type, shard
/// and reserved bytes) is captured at construction and never changes; only
/// the low 32 bits move.
#[derive(Debug)]
struct Counter {
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    state: AtomicU64,
    prefix: u64,
}

impl Counter {
    fn new(last: LongId) -> Self {
        Self {
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(AtomicU64::new(last.to_raw())),
            #[cfg(not(feature = "cache-padded"))]
            state: AtomicU64::new(last.to_raw()),
            prefix: last.prefix(),
        }
    }

    /// Reserves `count` consecutive values and returns the first one.
    ///
    /// A reservation that would carry out of the sequence bits is undone and
    /// fails. A reservation that lands on top of another caller's pending
    /// overshoot is undone as well, then retried once that overshoot has
    /// been rolled back.
    fn reserve(&self, type_id: u16, count: u32) -> Result<LongId> {
        debug_assert!(count > 0);
        let count = u64::from(count);
        loop {
            let previous = self.state.fetch_add(count, Ordering::Relaxed);
            let last = previous.wrapping_add(count);

            if self.owns(previous) && self.owns(last) {
                return Ok(LongId::from_raw(previous + 1));
            }

            self.state.fetch_sub(count, Ordering::Relaxed);
            if self.owns(previous) {
                return Err(Self::cold_exhausted(type_id));
            }
            self.settle();
        }
    }

    /// The last issued value.
    ///
    /// Waits out a failed reservation that has not been undone yet, so the
    /// result is always a value that was actually issued (or loaded).
    fn load(&self) -> LongId {
        LongId::from_raw(self.settle())
    }

    /// Spins until no overshoot is pending and returns the settled state.
    /// Every overshooting caller undoes its add right after observing it.
    fn settle(&self) -> u64 {
        loop {
            let raw = self.state.load(Ordering::Relaxed);
            if self.owns(raw) {
                return raw;
            }
            core::hint::spin_loop();
        }
    }

    #[inline]
    fn owns(&self, raw: u64) -> bool {
        raw & !LongId::SEQUENCE_MASK == self.prefix
    }

    #[cold]
    #[inline(never)]
    fn cold_exhausted(type_id: u16) -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(type_id, "sequence exhausted");
        Error::SequenceExhausted { type_id }
    }
}

/// A lock-free, per-type identifier allocator backed by a
/// [`LongIdStorage`].
///
/// The set of known types is fixed when the allocator is constructed: every
/// type gets its own atomic counter, and the map holding the counters is
/// never mutated afterwards. [`Self::create`] is therefore a map lookup and a
/// single atomic add, with no lock and no I/O.
///
/// Persisting is explicit. Call [`Self::flush_to_storage`] on a timer (see
/// `spawn_periodic_flush` under the `async-tokio` feature) and at shutdown.
///
/// ## Features
/// - ✅ Thread-safe
/// - ✅ Linearizable per type
/// - ❌ New types require a new allocator
///
/// ## Caveats
/// Two allocators flushing to the same backing table overwrite each other.
/// Run a single writer per table.
///
/// # Example
/// ```
/// use longid::{LongId, LongIdAllocator, MemoryStorage};
///
/// let storage = MemoryStorage::with_values([
///     LongId::from_components(1, 0xCC, 0, 100),
///     LongId::from_components(2, 0xCC, 0, 0),
/// ])?;
/// let allocator = LongIdAllocator::new(storage)?;
///
/// let id = allocator.create(1)?;
/// assert_eq!(id.components(), (1, 0xCC, 0, 101));
///
/// allocator.flush_to_storage()?;
/// assert_eq!(allocator.storage().values()?[0], id);
/// # Ok::<(), longid::Error>(())
/// ```
#[derive(Debug)]
pub struct LongIdAllocator<S> {
    counters: HashMap<u16, Counter>,
    storage: S,
}

impl<S: LongIdStorage> LongIdAllocator<S> {
    /// Builds an allocator from the values currently persisted in `storage`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the storage returns more values than the
    ///   type space can hold
    /// - [`Error::DuplicateType`] if two loaded values share a type
    /// - any error of [`LongIdStorage::load`]
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn new(storage: S) -> Result<Self> {
        let values = storage.load(false)?;
        Self::from_values(storage, values)
    }

    /// Builds an allocator from values recomputed out of the real data
    /// tables. The storage persists the recomputed values as a side effect.
    ///
    /// # Errors
    ///
    /// See [`Self::new`], plus the bootstrap errors of
    /// [`LongIdStorage::load`].
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn with_bootstrap(storage: S) -> Result<Self> {
        let values = storage.load(true)?;
        Self::from_values(storage, values)
    }

    fn from_values(storage: S, values: Vec<LongId>) -> Result<Self> {
        if values.len() > TYPE_SPACE {
            return Err(Error::InvalidState {
                reason: format!(
                    "storage returned {} values but only {TYPE_SPACE} types exist",
                    values.len()
                ),
            });
        }

        let mut counters = HashMap::with_capacity(values.len());
        for id in values {
            match counters.entry(id.type_id()) {
                Entry::Occupied(_) => {
                    return Err(Error::DuplicateType {
                        type_id: id.type_id(),
                        id,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(Counter::new(id));
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(types = counters.len(), "allocator loaded");

        Ok(Self { counters, storage })
    }

    /// Issues the next identifier for `type_id`.
    ///
    /// Safe to call from any number of threads. Per type, the returned
    /// sequences are distinct and consistent with some total order of the
    /// calls.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if the type was not loaded at construction
    /// - [`Error::SequenceExhausted`] if the type's 32-bit sequence is full
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn create(&self, type_id: u16) -> Result<LongId> {
        self.counter(type_id)?.reserve(type_id, 1)
    }

    /// Reserves `count` consecutive identifiers for `type_id` with a single
    /// atomic add.
    ///
    /// A `count` of zero returns an empty range without touching the counter
    /// (the type must still be known).
    ///
    /// # Errors
    ///
    /// See [`Self::create`]. Nothing is reserved when the whole block does
    /// not fit in the remaining sequence space.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn create_many(&self, type_id: u16, count: u32) -> Result<LongIdRange> {
        let counter = self.counter(type_id)?;
        if count == 0 {
            return Ok(LongIdRange::empty());
        }
        let first = counter.reserve(type_id, count)?;
        Ok(LongIdRange::new(first, count))
    }

    /// The last identifier issued for `type_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownType`] if the type is not known.
    pub fn last_value(&self, type_id: u16) -> Result<LongId> {
        Ok(self.counter(type_id)?.load())
    }

    /// All known types, in ascending order.
    pub fn types(&self) -> Vec<u16> {
        let mut types: Vec<u16> = self.counters.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// The last issued value of every type, ordered by type.
    ///
    /// Not atomic across types: values issued while the snapshot is taken
    /// may or may not be included. Never reports a value that was not
    /// issued, even while a reservation is failing concurrently.
    pub fn snapshot(&self) -> Vec<LongId> {
        let mut values: Vec<LongId> = self.counters.values().map(Counter::load).collect();
        values.sort_unstable_by_key(LongId::type_id);
        values
    }

    /// Saves the snapshot through the storage, removing rows of types this
    /// allocator does not know.
    ///
    /// # Errors
    ///
    /// Propagates [`LongIdStorage::save`] errors. Counters are only read, so
    /// a failed flush can be retried.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn flush_to_storage(&self) -> Result<()> {
        let values = self.snapshot();
        self.storage.save(&values, true)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(values = values.len(), "flushed last values");

        Ok(())
    }

    /// Saves the last value of a single type, leaving every other row alone.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if the type is not known
    /// - any error of [`LongIdStorage::save_one`]
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn flush_type(&self, type_id: u16) -> Result<()> {
        let value = self.last_value(type_id)?;
        self.storage.save_one(value)
    }

    /// The storage this allocator loads from and flushes to.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn counter(&self, type_id: u16) -> Result<&Counter> {
        self.counters
            .get(&type_id)
            .ok_or(Error::UnknownType { type_id })
    }
}

impl<S: LongIdStorage> LongIdProvider for LongIdAllocator<S> {
    fn create(&self, type_id: u16) -> Result<LongId> {
        Self::create(self, type_id)
    }

    fn flush_to_storage(&self) -> Result<()> {
        Self::flush_to_storage(self)
    }
}
