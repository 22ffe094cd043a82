//! Buffered memory transfer: the image arrives in chunks written into one
//! application owned buffer.

use tracing::{debug, instrument};

use super::Transfer;
use crate::dsm::MemoryBlock;
use crate::error::{Result, TwainError};
use crate::events::TwainEvent;
use crate::protocol::{
    Completion, ImageMemXfer, SetupMemXfer, DAT_IMAGEMEMXFER, DAT_SETUPMEMXFER, DG_CONTROL,
    DG_IMAGE, MSG_GET,
};
use crate::source::Source;

/// Buffer size used when the source leaves every size unset.
const FALLBACK_BUFFER_SIZE: usize = 64 * 1024;

/// Memory transfer strategy.
#[derive(Default)]
pub struct MemoryTransfer {
    buffer: Option<MemoryBlock>,
    last_chunk: Option<(ImageMemXfer, Vec<u8>)>,
    chunks: usize,
}

impl MemoryTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks published so far, including the final one once finished.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    fn buffer_size(setup: &SetupMemXfer) -> usize {
        [setup.preferred, setup.max_buf_size, setup.min_buf_size]
            .into_iter()
            .find(|&size| size > 0)
            .map_or(FALLBACK_BUFFER_SIZE, |size| size as usize)
    }

    /// Copy the chunk the source just wrote out of the shared buffer.
    fn copy_chunk(buffer: &MemoryBlock, info: &ImageMemXfer) -> Result<Vec<u8>> {
        let len = info.bytes_written as usize;
        if len > buffer.size() {
            return Err(TwainError::MalformedContainer(format!(
                "source wrote {} bytes into a {} byte buffer",
                len,
                buffer.size()
            )));
        }
        buffer.lock()?.read(0, len)
    }
}

impl Transfer for MemoryTransfer {
    #[instrument(skip_all)]
    fn initiate(&mut self, source: &Source) -> Result<()> {
        source.check_cancel()?;

        let mut setup = vec![0u8; SetupMemXfer::SIZE];
        source.call(DG_CONTROL, DAT_SETUPMEMXFER, MSG_GET, &mut setup)?;
        let setup = SetupMemXfer::from_bytes(&setup)?;
        let size = Self::buffer_size(&setup);
        debug!(
            min = setup.min_buf_size,
            max = setup.max_buf_size,
            preferred = setup.preferred,
            size,
            "Memory transfer setup"
        );

        let buffer = self.buffer.insert(MemoryBlock::alloc(source.dsm(), size)?);
        loop {
            let mut record = ImageMemXfer::request(buffer.handle(), size as u32).to_bytes();
            let completion = source.call(DG_IMAGE, DAT_IMAGEMEMXFER, MSG_GET, &mut record)?;
            let info = ImageMemXfer::from_bytes(&record)?;
            let data = Self::copy_chunk(buffer, &info)?;
            match completion {
                Completion::Success => {
                    self.chunks += 1;
                    source.emit(TwainEvent::MemoryChunkReady { info, data });
                }
                Completion::TransferDone => {
                    self.last_chunk = Some((info, data));
                    return Ok(());
                }
                other => {
                    return Err(TwainError::Protocol {
                        code: 0,
                        condition: None,
                        message: format!("Unexpected memory transfer completion: {:?}", other),
                    });
                }
            }
        }
    }

    fn finish(&mut self, source: &Source) -> Result<()> {
        if let Some((info, data)) = self.last_chunk.take() {
            self.chunks += 1;
            source.emit(TwainEvent::MemoryChunkReady { info, data });
        }
        Ok(())
    }

    fn cancel(&mut self, _source: &Source) -> Result<()> {
        self.last_chunk = None;
        self.buffer = None;
        Ok(())
    }

    fn cleanup(&mut self, _source: &Source) {
        self.last_chunk = None;
        self.buffer = None;
    }
}
