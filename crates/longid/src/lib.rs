//! Compact, typed 64-bit identifiers.
//!
//! A [`LongId`] packs a 16-bit type, an 8-bit shard, an 8-bit reserved byte
//! and a 32-bit sequence into one `u64`. A [`LongIdAllocator`] hands out the
//! next sequence of each type with a single atomic add, and persists the last
//! issued values through a [`LongIdStorage`] on demand.
//!
//! After a crash the persisted values may lag behind reality. The
//! [`BootstrapScanner`] recovers them from the data tables themselves by
//! reading `MAX(key)` of every mapped table.

mod allocator;
mod bootstrap;
mod error;
mod id;
mod runtime;
mod storage;
mod table;

pub use crate::allocator::*;
pub use crate::bootstrap::*;
pub use crate::error::*;
pub use crate::id::*;
#[cfg(feature = "async-tokio")]
pub use crate::runtime::*;
pub use crate::storage::*;
pub use crate::table::*;
