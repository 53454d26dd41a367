//! Utility modules

pub mod fingerprint;
pub mod memory_storage;
pub mod validation;

pub use fingerprint::*;
pub use memory_storage::*;
pub use validation::*;
