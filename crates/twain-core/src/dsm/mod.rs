//! DSM entry point module.

pub mod link;
pub mod memory;
pub mod mock;
pub mod traits;

pub use link::Link;
pub use memory::{LockedBlock, MemoryBlock};
pub use mock::{DsmCall, MockDsm};
pub use traits::{Dsm, Handle};
