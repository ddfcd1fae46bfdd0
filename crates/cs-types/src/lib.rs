pub mod candidate;
pub mod document;
pub mod errors;
pub mod space;

pub use candidate::*;
pub use document::*;
pub use errors::*;
pub use space::*;
