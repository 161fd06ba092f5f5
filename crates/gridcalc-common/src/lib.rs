pub mod address;
pub mod criteria;
pub mod error;
pub mod host;
pub mod value;

pub use address::*;
pub use criteria::*;
pub use error::*;
pub use host::*;
pub use value::*;
