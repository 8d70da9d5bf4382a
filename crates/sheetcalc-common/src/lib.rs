pub mod address;
pub mod coord;
pub mod error;
pub mod format;
pub mod value;

pub use address::*;
pub use coord::*;
pub use error::*;
pub use format::*;
pub use value::*;
