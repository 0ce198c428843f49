//! JSON referencing and manipulation

mod merge;
mod path;
mod quantity;

pub use merge::*;
pub use path::*;
pub use quantity::*;
