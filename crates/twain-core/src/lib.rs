//! TWAIN-Core: client-side TWAIN image acquisition in Rust.
//!
//! This crate drives a TWAIN Data Source Manager through the protocol
//! states 1 to 7: open the manager, pick a source, negotiate capabilities
//! and pull images with native, file or buffered-memory transfers.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, return and condition codes, record layouts
//! - **Codec**: Typed items and capability containers
//! - **DSM**: Entry point abstraction, memory handles, scripted mock
//! - **State**: The TWAIN state machine
//! - **Source / Capability / Transfer**: One data source and its operations
//! - **Manager**: Source manager lifecycle and selection
//! - **Events**: Observer pattern for UI decoupling
//! - **Dispatcher**: Owning thread that serializes every DSM call
//! - **Session**: Configuration and the client facade
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use twain_core::dsm::MockDsm;
//! use twain_core::events::TracingObserver;
//! use twain_core::session::{SessionConfig, TwainContext};
//!
//! let dsm = Arc::new(MockDsm::scanner(&["Flatbed"]));
//! let config = SessionConfig {
//!     show_ui: false,
//!     ..Default::default()
//! };
//!
//! let context = TwainContext::start(dsm, config).expect("DSM unavailable");
//! context.subscribe(Arc::new(TracingObserver));
//! context.select_by_name("Flatbed").expect("select failed");
//! context.acquire().expect("acquire failed");
//! context.post_event(0).expect("dispatcher gone");
//! ```

pub mod capability;
pub mod codec;
pub mod dispatcher;
pub mod dsm;
pub mod error;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod source;
pub mod state;
pub mod transfer;

// Re-exports for convenience
pub use capability::{Capability, CapabilityKind};
pub use codec::{Container, Fix32, Frame, Item, ItemType, Layout};
pub use dispatcher::{CommandKind, Dispatcher, Payload};
pub use dsm::{Dsm, Link, MockDsm};
pub use error::{Result, TwainError};
pub use events::{
    Negotiation, ObserverRegistry, SessionSnapshot, SubscriptionId, TracingObserver,
    TwainEvent, TwainObserver,
};
pub use manager::SourceManager;
pub use protocol::{Completion, Identity, ReturnCode};
pub use session::{ApplicationConfig, SessionConfig, TwainContext};
pub use source::{RegionUnit, SharedSession, Source};
pub use state::TwainState;
pub use transfer::{BitmapInfoHeader, Transfer, TransferFactory};
