//! Session state machine.

pub mod machine;

pub use machine::TwainState;
