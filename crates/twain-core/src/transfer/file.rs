//! File transfer: the source writes the image straight to a path we pick.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, instrument, warn};

use super::Transfer;
use crate::error::{Result, TwainError};
use crate::events::TwainEvent;
use crate::protocol::{
    Completion, SetupFileXfer, DAT_IMAGEFILEXFER, DAT_SETUPFILEXFER, DG_CONTROL, DG_IMAGE,
    FILE_FORMAT_EXTENSIONS, MSG_GET, MSG_SET,
};
use crate::source::Source;

static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File extension for a `TWFF_*` format, `"bin"` when unknown.
pub fn file_extension(format: u16) -> &'static str {
    FILE_FORMAT_EXTENSIONS
        .get(format as usize)
        .copied()
        .unwrap_or("bin")
}

/// Unique target path inside `dir`.
pub fn target_path(dir: &Path, format: u16) -> PathBuf {
    let n = FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(
        "twain-{}-{}.{}",
        std::process::id(),
        n,
        file_extension(format)
    ))
}

/// File transfer strategy.
pub struct FileTransfer {
    format: u16,
    path: Option<PathBuf>,
}

impl FileTransfer {
    pub fn new(format: u16) -> Self {
        Self { format, path: None }
    }

    pub fn format(&self) -> u16 {
        self.format
    }
}

impl Transfer for FileTransfer {
    #[instrument(skip_all, fields(format = self.format))]
    fn initiate(&mut self, source: &Source) -> Result<()> {
        source.check_cancel()?;

        let path = target_path(source.file_transfer_dir(), self.format);
        let setup = SetupFileXfer {
            file_name: path.to_string_lossy().into_owned(),
            format: self.format,
            vref_num: 0,
        };
        debug!(path = %path.display(), "File transfer setup");
        source.call(DG_CONTROL, DAT_SETUPFILEXFER, MSG_SET, &mut setup.to_bytes())?;
        self.path = Some(path);

        match source.call(DG_IMAGE, DAT_IMAGEFILEXFER, MSG_GET, &mut [])? {
            Completion::TransferDone => Ok(()),
            other => Err(TwainError::Protocol {
                code: 0,
                condition: None,
                message: format!("Unexpected file transfer completion: {:?}", other),
            }),
        }
    }

    fn finish(&mut self, source: &Source) -> Result<()> {
        if let Some(path) = self.path.clone() {
            source.emit(TwainEvent::FileReady { path });
        }
        Ok(())
    }

    fn cancel(&mut self, _source: &Source) -> Result<()> {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed partial file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove partial file"),
            }
        }
        Ok(())
    }

    fn cleanup(&mut self, _source: &Source) {
        self.path = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TWFF_BMP, TWFF_PNG, TWFF_TIFFMULTI};

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(TWFF_BMP), "bmp");
        assert_eq!(file_extension(TWFF_PNG), "png");
        assert_eq!(file_extension(TWFF_TIFFMULTI), "tiff");
        assert_eq!(file_extension(99), "bin");
    }

    #[test]
    fn test_target_paths_are_unique() {
        let dir = Path::new("/tmp");
        let a = target_path(dir, TWFF_BMP);
        let b = target_path(dir, TWFF_BMP);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with(".bmp"));
    }
}
