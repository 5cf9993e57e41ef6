pub mod analysis;
pub mod case;
pub mod enums;

pub use analysis::*;
pub use case::*;
pub use enums::*;
