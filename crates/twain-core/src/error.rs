//! Error taxonomy for the TWAIN driver.
//!
//! Protocol conditions that drive control flow (`TransferDone`, `EndOfList`)
//! normally travel as [`Completion`](crate::protocol::Completion) values and
//! only become errors when a caller did not expect them.

use thiserror::Error;

use crate::codec::ItemType;
use crate::state::TwainState;

pub type Result<T> = std::result::Result<T, TwainError>;

#[derive(Error, Debug)]
pub enum TwainError {
    // ========================================================================
    // State machine
    // ========================================================================
    #[error("Source not in state {expected} but in state {actual}")]
    WrongState {
        expected: TwainState,
        actual: TwainState,
    },

    // ========================================================================
    // Codec
    // ========================================================================
    #[error("Unknown container type {0}")]
    UnknownContainerType(u16),

    #[error("Unknown item type {0}")]
    UnknownItemType(u16),

    #[error("Could not find {0} among the container items")]
    ValueNotFound(String),

    #[error("{0} is not applicable to an array container")]
    NotApplicable(&'static str),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Cannot store {found} in a {expected:?} slot")]
    ItemTypeMismatch {
        expected: ItemType,
        found: &'static str,
    },

    #[error("Cannot set capability 0x{capability:04X} to {value}")]
    CapabilityNotSettable { capability: u16, value: String },

    // ========================================================================
    // Protocol conditions
    // ========================================================================
    #[error("Check status: the source changed some values")]
    CheckStatus,

    #[error("Operation cancelled by the data source")]
    Cancel,

    #[error("Transfer cancelled by the user")]
    UserCancel,

    #[error("Transfer done")]
    TransferDone,

    #[error("End of list")]
    EndOfList,

    #[error("Not a data source event")]
    NotDsEvent,

    #[error("Information not supported")]
    InfoNotSupported,

    #[error("Data not available")]
    DataNotAvailable,

    #[error("{message}")]
    Protocol {
        code: u16,
        condition: Option<u16>,
        message: String,
    },

    // ========================================================================
    // Session
    // ========================================================================
    #[error("Cannot find twain data source: '{0}'")]
    SourceNotFound(String),

    #[error("Selected twain source is not online: '{0}'")]
    DeviceOffline(String),

    #[error("Native memory {operation} failed ({size} bytes)")]
    Memory { operation: &'static str, size: usize },

    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Dispatcher thread is not running")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TwainError {
    /// Device condition code attached to a `FAILURE` result, if any.
    pub fn condition(&self) -> Option<u16> {
        match self {
            TwainError::Protocol { condition, .. } => *condition,
            _ => None,
        }
    }

    /// True for the recoverable protocol conditions.
    pub fn is_protocol_condition(&self) -> bool {
        matches!(
            self,
            TwainError::CheckStatus
                | TwainError::Cancel
                | TwainError::UserCancel
                | TwainError::TransferDone
                | TwainError::EndOfList
                | TwainError::NotDsEvent
                | TwainError::InfoNotSupported
                | TwainError::DataNotAvailable
        )
    }
}
