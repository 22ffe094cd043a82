//! Scoped ownership of DSM memory blocks.

use std::sync::Arc;

use tracing::warn;

use super::traits::{Dsm, Handle};
use crate::error::{Result, TwainError};

/// A DSM memory block freed when dropped.
pub struct MemoryBlock {
    dsm: Arc<dyn Dsm>,
    handle: Handle,
    size: usize,
}

impl MemoryBlock {
    pub fn alloc(dsm: &Arc<dyn Dsm>, size: usize) -> Result<Self> {
        let handle = dsm
            .alloc(size)
            .filter(|&h| h != 0)
            .ok_or(TwainError::Memory {
                operation: "alloc",
                size,
            })?;
        Ok(Self {
            dsm: Arc::clone(dsm),
            handle,
            size,
        })
    }

    /// Take ownership of a block the source allocated for us.
    pub fn adopt(dsm: &Arc<dyn Dsm>, handle: Handle) -> Option<Self> {
        if handle == 0 {
            return None;
        }
        Some(Self {
            dsm: Arc::clone(dsm),
            handle,
            size: dsm.block_size(handle),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn lock(&self) -> Result<LockedBlock<'_>> {
        if !self.dsm.lock(self.handle) {
            return Err(TwainError::Memory {
                operation: "lock",
                size: self.size,
            });
        }
        Ok(LockedBlock { block: self })
    }

    /// Lock, copy the whole block out and unlock.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.lock()?.read(0, self.size)
    }

    /// Lock, copy `data` in at offset 0 and unlock.
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        self.lock()?.write(0, data)
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        self.dsm.free(self.handle);
    }
}

/// A locked view of a [`MemoryBlock`], unlocked when dropped.
pub struct LockedBlock<'a> {
    block: &'a MemoryBlock,
}

impl LockedBlock<'_> {
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        if !self.block.dsm.read(self.block.handle, offset, &mut buf) {
            return Err(TwainError::Memory {
                operation: "read",
                size: len,
            });
        }
        Ok(buf)
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        if !self.block.dsm.write(self.block.handle, offset, data) {
            return Err(TwainError::Memory {
                operation: "write",
                size: data.len(),
            });
        }
        Ok(())
    }
}

impl Drop for LockedBlock<'_> {
    fn drop(&mut self) {
        if !self.block.dsm.unlock(self.block.handle) {
            warn!(handle = self.block.handle, "Memory block was not locked on unlock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsm::MockDsm;

    #[test]
    fn test_block_is_released_on_every_path() {
        let mock = Arc::new(MockDsm::new());
        let dsm: Arc<dyn Dsm> = mock.clone();
        {
            let block = MemoryBlock::alloc(&dsm, 16).unwrap();
            block.write_all(&[1, 2, 3]).unwrap();
            assert_eq!(&block.read_all().unwrap()[..3], &[1, 2, 3]);
            assert_eq!(mock.live_blocks(), 1);
            assert_eq!(mock.locked_blocks(), 0);
        }
        assert_eq!(mock.live_blocks(), 0);

        let failed: Result<()> = (|| {
            let block = MemoryBlock::alloc(&dsm, 4)?;
            let _locked = block.lock()?;
            Err(TwainError::Cancel)
        })();
        assert!(failed.is_err());
        assert_eq!(mock.live_blocks(), 0);
        assert_eq!(mock.locked_blocks(), 0);
    }

    #[test]
    fn test_unlock_of_unlocked_block_is_tolerated() {
        let mock = Arc::new(MockDsm::new());
        let dsm: Arc<dyn Dsm> = mock.clone();
        let block = MemoryBlock::alloc(&dsm, 8).unwrap();
        let locked = block.lock().unwrap();
        assert!(dsm.unlock(block.handle()));
        assert!(!dsm.unlock(block.handle()));
        drop(locked);
        assert_eq!(mock.locked_blocks(), 0);
        drop(block);
        assert_eq!(mock.live_blocks(), 0);
    }

    #[test]
    fn test_adopt_null_handle() {
        let dsm: Arc<dyn Dsm> = Arc::new(MockDsm::new());
        assert!(MemoryBlock::adopt(&dsm, 0).is_none());
    }

    #[test]
    fn test_write_past_end_fails() {
        let dsm: Arc<dyn Dsm> = Arc::new(MockDsm::new());
        let block = MemoryBlock::alloc(&dsm, 2).unwrap();
        assert!(matches!(
            block.write_all(&[0u8; 8]),
            Err(TwainError::Memory { operation: "write", .. })
        ));
    }
}
