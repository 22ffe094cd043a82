//! Image transfer strategies.
//!
//! One [`Transfer`] is created per image. The source's transfer loop drives
//! it through `initiate` and then `finish` or `cancel`; `cleanup` runs on
//! every path.

pub mod file;
pub mod memory;
pub mod native;

pub use file::FileTransfer;
pub use memory::MemoryTransfer;
pub use native::{BitmapInfoHeader, NativeTransfer};

use crate::error::Result;
use crate::protocol::{TWSX_FILE, TWSX_MEMORY};
use crate::source::Source;

/// One image transfer sub-protocol.
pub trait Transfer: Send {
    /// Start the transfer. Returns once the source reported transfer done.
    fn initiate(&mut self, source: &Source) -> Result<()>;

    /// Hand the transferred image to the listeners.
    fn finish(&mut self, source: &Source) -> Result<()>;

    /// Undo a transfer the source cancelled.
    fn cancel(&mut self, source: &Source) -> Result<()>;

    /// Release per-image resources.
    fn cleanup(&mut self, source: &Source);
}

/// Creates the strategy for a negotiated transfer mechanism.
pub trait TransferFactory: Send {
    fn native(&self) -> Box<dyn Transfer>;
    fn memory(&self) -> Box<dyn Transfer>;
    fn file(&self, format: u16) -> Box<dyn Transfer>;

    fn create(&self, mechanism: u16, format: u16) -> Box<dyn Transfer> {
        match mechanism {
            TWSX_MEMORY => self.memory(),
            TWSX_FILE => self.file(format),
            _ => self.native(),
        }
    }
}

/// Factory for the three standard mechanisms.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransferFactory;

impl TransferFactory for DefaultTransferFactory {
    fn native(&self) -> Box<dyn Transfer> {
        Box::new(NativeTransfer::new())
    }

    fn memory(&self) -> Box<dyn Transfer> {
        Box::new(MemoryTransfer::new())
    }

    fn file(&self, format: u16) -> Box<dyn Transfer> {
        Box::new(FileTransfer::new(format))
    }
}
