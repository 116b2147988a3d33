mod interface;
mod memory;
mod mutex;
mod reconcile;
mod row;

pub use interface::*;
pub use memory::*;
pub(crate) use mutex::*;
pub use reconcile::*;
pub use row::*;
