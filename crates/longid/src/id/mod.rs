mod long_id;

pub use long_id::*;
