pub mod enums;
pub mod layout;
pub mod mention;

pub use enums::*;
pub use layout::*;
pub use mention::*;
