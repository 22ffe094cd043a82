//! Protocol module - TWAIN wire definitions.

pub mod condition;
pub mod constants;
pub mod records;
pub mod return_code;

pub use condition::condition_text;
pub use constants::*;
pub use records::{
    CapabilityRecord, EventRecord, HandleRecord, Identity, ImageLayoutRecord, ImageMemXfer,
    PendingXfers, SetupFileXfer, SetupMemXfer, Status, UserInterface, Version,
};
pub use return_code::{Completion, ReturnCode};
