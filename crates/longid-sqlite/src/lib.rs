//! SQLite backend for [`longid`].
//!
//! - [`SqliteStorage`] implements [`longid::LongIdStorage`] over a backing
//!   table (default `_longIds`) and [`longid::MaxKeySource`] over the data
//!   tables, so `load(true)` bootstraps from `MAX(key)`.
//! - [`SqliteMetadata`] lists tables and their single-column keys.
//! - [`Installer`] creates the backing table and seeds one row per
//!   configured table, resolving each table's key column.

mod error;
mod installer;
mod metadata;
mod storage;

pub use error::*;
pub use installer::*;
pub use metadata::*;
pub use storage::*;
// Public re-export so downstream crates can access `longid` via
// `longid_sqlite::longid`
pub use longid;
