//! Native transfer: the source hands back one global handle holding a DIB.

use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use tracing::{debug, instrument};

use super::Transfer;
use crate::dsm::MemoryBlock;
use crate::error::{Result, TwainError};
use crate::events::TwainEvent;
use crate::protocol::{Completion, HandleRecord, DAT_IMAGENATIVEXFER, DG_IMAGE, MSG_GET};
use crate::source::Source;

pub const BI_RGB: u32 = 0;
pub const BI_RLE8: u32 = 1;
pub const BI_RLE4: u32 = 2;
pub const BI_BITFIELDS: u32 = 3;

/// `BITMAPINFOHEADER` at the start of a device independent bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: i32,
    /// Negative for top-down bitmaps.
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub size_image: u32,
    pub x_pels_per_meter: i32,
    pub y_pels_per_meter: i32,
    pub clr_used: u32,
    pub clr_important: u32,
}

impl BitmapInfoHeader {
    pub const SIZE: usize = 40;

    pub fn new(width: i32, height: i32, bit_count: u16) -> Self {
        let mut header = Self {
            size: Self::SIZE as u32,
            width,
            height,
            planes: 1,
            bit_count,
            compression: BI_RGB,
            ..Default::default()
        };
        header.size_image = (header.stride() * height.unsigned_abs() as usize) as u32;
        header
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(TwainError::UnsupportedImage(format!(
                "bitmap header needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            size: cursor.read_u32::<LittleEndian>()?,
            width: cursor.read_i32::<LittleEndian>()?,
            height: cursor.read_i32::<LittleEndian>()?,
            planes: cursor.read_u16::<LittleEndian>()?,
            bit_count: cursor.read_u16::<LittleEndian>()?,
            compression: cursor.read_u32::<LittleEndian>()?,
            size_image: cursor.read_u32::<LittleEndian>()?,
            x_pels_per_meter: cursor.read_i32::<LittleEndian>()?,
            y_pels_per_meter: cursor.read_i32::<LittleEndian>()?,
            clr_used: cursor.read_u32::<LittleEndian>()?,
            clr_important: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..], self.size);
        LittleEndian::write_i32(&mut buf[4..], self.width);
        LittleEndian::write_i32(&mut buf[8..], self.height);
        LittleEndian::write_u16(&mut buf[12..], self.planes);
        LittleEndian::write_u16(&mut buf[14..], self.bit_count);
        LittleEndian::write_u32(&mut buf[16..], self.compression);
        LittleEndian::write_u32(&mut buf[20..], self.size_image);
        LittleEndian::write_i32(&mut buf[24..], self.x_pels_per_meter);
        LittleEndian::write_i32(&mut buf[28..], self.y_pels_per_meter);
        LittleEndian::write_u32(&mut buf[32..], self.clr_used);
        LittleEndian::write_u32(&mut buf[36..], self.clr_important);
        buf
    }

    /// Bytes per pixel row, padded to 32 bits.
    pub fn stride(&self) -> usize {
        (self.width.unsigned_abs() as usize * self.bit_count as usize).div_ceil(32) * 4
    }

    /// Palette entries following the header.
    pub fn palette_len(&self) -> usize {
        match (self.clr_used, self.bit_count) {
            (0, 1 | 4 | 8) => 1 << self.bit_count,
            (0, _) => 0,
            (n, _) => n as usize,
        }
    }

    pub fn is_top_down(&self) -> bool {
        self.height < 0
    }

    pub fn is_supported(&self) -> bool {
        matches!(self.compression, BI_RGB | BI_BITFIELDS)
    }

    /// A synthetic gradient DIB (header, grey palette and pixels).
    pub fn sample_dib(width: i32, height: i32, bit_count: u16) -> Vec<u8> {
        let header = Self::new(width, height, bit_count);
        let mut dib = header.to_bytes();
        let colors = header.palette_len();
        for i in 0..colors {
            let level = (i * 255 / colors.saturating_sub(1).max(1)) as u8;
            dib.extend_from_slice(&[level, level, level, 0]);
        }
        let stride = header.stride();
        for row in 0..height.unsigned_abs() as usize {
            dib.extend((0..stride).map(|col| ((row + col) % 256) as u8));
        }
        dib
    }
}

/// Native transfer strategy.
#[derive(Default)]
pub struct NativeTransfer {
    image: Option<MemoryBlock>,
}

impl NativeTransfer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transfer for NativeTransfer {
    #[instrument(skip_all)]
    fn initiate(&mut self, source: &Source) -> Result<()> {
        source.check_cancel()?;
        let mut record = HandleRecord(0).to_bytes();
        let completion = source.call(DG_IMAGE, DAT_IMAGENATIVEXFER, MSG_GET, &mut record)?;
        let handle = HandleRecord::from_bytes(&record)?.0;
        self.image = MemoryBlock::adopt(source.dsm(), handle);
        match completion {
            Completion::TransferDone => Ok(()),
            other => Err(TwainError::Protocol {
                code: 0,
                condition: None,
                message: format!("Unexpected native transfer completion: {:?}", other),
            }),
        }
    }

    fn finish(&mut self, source: &Source) -> Result<()> {
        let Some(block) = self.image.take() else {
            return Err(TwainError::UnsupportedImage(
                "source returned a null image handle".into(),
            ));
        };
        let dib = block.read_all()?;
        drop(block);

        let header = BitmapInfoHeader::from_bytes(&dib)?;
        debug!(
            width = header.width,
            height = header.height,
            bits = header.bit_count,
            compression = header.compression,
            "Native image"
        );
        if !header.is_supported() {
            source.emit(TwainEvent::Exception {
                message: format!("Unsupported bitmap compression: {}", header.compression),
            });
            return Ok(());
        }
        source.emit(TwainEvent::ImageAcquired { header, dib });
        Ok(())
    }

    fn cancel(&mut self, _source: &Source) -> Result<()> {
        self.image = None;
        Ok(())
    }

    fn cleanup(&mut self, _source: &Source) {
        self.image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = BitmapInfoHeader::new(3, -2, 24);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), BitmapInfoHeader::SIZE);
        assert_eq!(header.stride(), 12);
        assert_eq!(header.size_image, 24);
        assert!(header.is_top_down());
        assert_eq!(BitmapInfoHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_sample_dib_includes_palette() {
        let dib = BitmapInfoHeader::sample_dib(8, 2, 8);
        // header + 256 palette entries + two 8-byte rows
        assert_eq!(dib.len(), 40 + 1024 + 16);
        let header = BitmapInfoHeader::from_bytes(&dib).unwrap();
        assert_eq!(header.palette_len(), 256);
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(matches!(
            BitmapInfoHeader::from_bytes(&[0u8; 12]),
            Err(TwainError::UnsupportedImage(_))
        ));
    }

    #[test]
    fn test_compression_support() {
        let mut header = BitmapInfoHeader::new(1, 1, 8);
        assert!(header.is_supported());
        header.compression = BI_RLE8;
        assert!(!header.is_supported());
    }
}
