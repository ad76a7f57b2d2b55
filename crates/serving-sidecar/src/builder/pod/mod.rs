pub mod container;
pub mod security;

pub use container::*;
pub use security::*;
