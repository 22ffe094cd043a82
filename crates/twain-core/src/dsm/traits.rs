//! Data Source Manager entry point abstraction.
//!
//! Defines the `Dsm` trait wrapping `DSM_Entry` and the DSM memory
//! primitives, allowing different implementations (native library, the
//! in-process virtual source, etc.).

/// Opaque native memory handle. `0` is the null handle.
pub type Handle = u64;

/// Abstract `DSM_Entry` plus memory management interface.
///
/// Records are passed as their packed byte layouts. An empty `data` slice
/// stands for a null payload pointer.
pub trait Dsm: Send + Sync {
    /// Invoke the protocol entry point and return the raw `TWRC_*` code.
    ///
    /// `origin` is the application identity record and may be updated by
    /// the manager (it assigns the id on `MSG_OPENDSM`).
    fn entry(
        &self,
        origin: &mut [u8],
        dest: Option<&[u8]>,
        dg: u32,
        dat: u16,
        msg: u16,
        data: &mut [u8],
    ) -> u16;

    /// Allocate a movable block of `size` bytes.
    fn alloc(&self, size: usize) -> Option<Handle>;

    /// Pin the block. Reads and writes are only legal while locked.
    fn lock(&self, handle: Handle) -> bool;

    fn unlock(&self, handle: Handle) -> bool;

    fn free(&self, handle: Handle);

    /// Size of the block in bytes, `0` for an unknown handle.
    fn block_size(&self, handle: Handle) -> usize;

    /// Copy out of a locked block.
    fn read(&self, handle: Handle, offset: usize, buf: &mut [u8]) -> bool;

    /// Copy into a locked block.
    fn write(&self, handle: Handle, offset: usize, data: &[u8]) -> bool;
}
