mod atomic;
mod interface;
mod range;

pub use atomic::*;
pub use interface::*;
pub use range::*;
