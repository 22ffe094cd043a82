//! Fixed-layout records exchanged through `DSM_Entry`.
//!
//! All records are packed little-endian structures (TWAIN uses 2-byte
//! packing on Windows).

use std::fmt;
use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use super::constants::*;
use crate::codec::{Fix32, Frame, read_cstr, write_cstr};
use crate::error::{Result, TwainError};

/// Width of a `TW_STR32` field including its terminator.
const STR32: usize = 34;

fn check_len(what: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(TwainError::MalformedContainer(format!(
            "{} record too small: expected {}, got {}",
            what,
            expected,
            data.len()
        )));
    }
    Ok(())
}

// ============================================================================
// TW_IDENTITY
// ============================================================================

/// `TW_VERSION`: application or source version information.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub language: u16,
    pub country: u16,
    pub info: String,
}

/// `TW_IDENTITY` (156 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub id: u32,
    pub version: Version,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub supported_groups: u32,
    pub manufacturer: String,
    pub product_family: String,
    pub product_name: String,
}

impl Identity {
    pub const SIZE: usize = 156;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..], self.id);
        LittleEndian::write_u16(&mut buf[4..], self.version.major);
        LittleEndian::write_u16(&mut buf[6..], self.version.minor);
        LittleEndian::write_u16(&mut buf[8..], self.version.language);
        LittleEndian::write_u16(&mut buf[10..], self.version.country);
        write_cstr(&mut buf[12..12 + STR32], &self.version.info);
        LittleEndian::write_u16(&mut buf[46..], self.protocol_major);
        LittleEndian::write_u16(&mut buf[48..], self.protocol_minor);
        LittleEndian::write_u32(&mut buf[50..], self.supported_groups);
        write_cstr(&mut buf[54..54 + STR32], &self.manufacturer);
        write_cstr(&mut buf[88..88 + STR32], &self.product_family);
        write_cstr(&mut buf[122..122 + STR32], &self.product_name);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_IDENTITY", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        let id = cursor.read_u32::<LittleEndian>()?;
        let major = cursor.read_u16::<LittleEndian>()?;
        let minor = cursor.read_u16::<LittleEndian>()?;
        let language = cursor.read_u16::<LittleEndian>()?;
        let country = cursor.read_u16::<LittleEndian>()?;
        Ok(Self {
            id,
            version: Version {
                major,
                minor,
                language,
                country,
                info: read_cstr(&data[12..12 + STR32]),
            },
            protocol_major: LittleEndian::read_u16(&data[46..]),
            protocol_minor: LittleEndian::read_u16(&data[48..]),
            supported_groups: LittleEndian::read_u32(&data[50..]),
            manufacturer: read_cstr(&data[54..54 + STR32]),
            product_family: read_cstr(&data[88..88 + STR32]),
            product_name: read_cstr(&data[122..122 + STR32]),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TW_IDENTITY")?;
        writeln!(f, "  Id              : {}", self.id)?;
        writeln!(
            f,
            "  Version         : {}.{} (language {}, country {}) {}",
            self.version.major,
            self.version.minor,
            self.version.language,
            self.version.country,
            self.version.info
        )?;
        writeln!(
            f,
            "  Protocol        : {}.{}",
            self.protocol_major, self.protocol_minor
        )?;
        writeln!(f, "  SupportedGroups : 0x{:08X}", self.supported_groups)?;
        writeln!(f, "  Manufacturer    : {}", self.manufacturer)?;
        writeln!(f, "  ProductFamily   : {}", self.product_family)?;
        write!(f, "  ProductName     : {}", self.product_name)
    }
}

// ============================================================================
// TW_CAPABILITY
// ============================================================================

/// `TW_CAPABILITY`: capability id, container type and container handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityRecord {
    pub cap: u16,
    pub con_type: u16,
    pub container: u64,
}

impl CapabilityRecord {
    pub const SIZE: usize = 12;

    pub fn new(cap: u16, con_type: u16, container: u64) -> Self {
        Self {
            cap,
            con_type,
            container,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_u16(&mut buf[0..], self.cap);
        LittleEndian::write_u16(&mut buf[2..], self.con_type);
        LittleEndian::write_u64(&mut buf[4..], self.container);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_CAPABILITY", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            cap: cursor.read_u16::<LittleEndian>()?,
            con_type: cursor.read_u16::<LittleEndian>()?,
            container: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

// ============================================================================
// TW_USERINTERFACE
// ============================================================================

/// `TW_USERINTERFACE` (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserInterface {
    /// `1` shows the source UI, `0` hides it, `-1` on disable.
    pub show_ui: i16,
    pub modal_ui: bool,
    pub parent: u32,
}

impl UserInterface {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_i16(&mut buf[0..], self.show_ui);
        LittleEndian::write_u16(&mut buf[2..], self.modal_ui as u16);
        LittleEndian::write_u32(&mut buf[4..], self.parent);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_USERINTERFACE", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            show_ui: cursor.read_i16::<LittleEndian>()?,
            modal_ui: cursor.read_u16::<LittleEndian>()? != 0,
            parent: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

// ============================================================================
// TW_PENDINGXFERS / TW_STATUS / TW_EVENT
// ============================================================================

/// `TW_PENDINGXFERS` (6 bytes): count plus reserved/EOJ word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingXfers {
    pub count: i16,
    pub end_of_job: u32,
}

impl PendingXfers {
    pub const SIZE: usize = 6;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_i16(&mut buf[0..], self.count);
        LittleEndian::write_u32(&mut buf[2..], self.end_of_job);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_PENDINGXFERS", data, Self::SIZE)?;
        Ok(Self {
            count: LittleEndian::read_i16(&data[0..]),
            end_of_job: LittleEndian::read_u32(&data[2..]),
        })
    }
}

/// `TW_STATUS` (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub condition_code: u16,
    pub data: u16,
}

impl Status {
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_u16(&mut buf[0..], self.condition_code);
        LittleEndian::write_u16(&mut buf[2..], self.data);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_STATUS", data, Self::SIZE)?;
        Ok(Self {
            condition_code: LittleEndian::read_u16(&data[0..]),
            data: LittleEndian::read_u16(&data[2..]),
        })
    }
}

/// `TW_EVENT` (10 bytes): OS message pointer plus the message the source
/// extracted from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventRecord {
    pub event: u64,
    pub message: u16,
}

impl EventRecord {
    pub const SIZE: usize = 10;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_u64(&mut buf[0..], self.event);
        LittleEndian::write_u16(&mut buf[8..], self.message);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_EVENT", data, Self::SIZE)?;
        Ok(Self {
            event: LittleEndian::read_u64(&data[0..]),
            message: LittleEndian::read_u16(&data[8..]),
        })
    }
}

// ============================================================================
// Transfers
// ============================================================================

/// `TW_SETUPMEMXFER` (12 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupMemXfer {
    pub min_buf_size: i32,
    pub max_buf_size: i32,
    pub preferred: i32,
}

impl Default for SetupMemXfer {
    fn default() -> Self {
        Self {
            min_buf_size: -1,
            max_buf_size: -1,
            preferred: -1,
        }
    }
}

impl SetupMemXfer {
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_i32(&mut buf[0..], self.min_buf_size);
        LittleEndian::write_i32(&mut buf[4..], self.max_buf_size);
        LittleEndian::write_i32(&mut buf[8..], self.preferred);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_SETUPMEMXFER", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            min_buf_size: cursor.read_i32::<LittleEndian>()?,
            max_buf_size: cursor.read_i32::<LittleEndian>()?,
            preferred: cursor.read_i32::<LittleEndian>()?,
        })
    }
}

/// `TW_IMAGEMEMXFER`: 26-byte strip header followed by a `TW_MEMORY`
/// descriptor (flags, length, handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageMemXfer {
    pub compression: u16,
    pub bytes_per_row: u32,
    pub columns: u32,
    pub rows: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub bytes_written: u32,
    pub memory_flags: u32,
    pub memory_length: u32,
    pub memory: u64,
}

impl ImageMemXfer {
    pub const HEADER_SIZE: usize = 26;
    pub const SIZE: usize = 42;

    /// Fresh request pointing the source at an application-owned block.
    pub fn request(handle: u64, length: u32) -> Self {
        Self {
            compression: TWCP_NONE,
            memory_flags: TWMF_APPOWNS | TWMF_HANDLE,
            memory_length: length,
            memory: handle,
            ..Default::default()
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_u16(&mut buf[0..], self.compression);
        LittleEndian::write_u32(&mut buf[2..], self.bytes_per_row);
        LittleEndian::write_u32(&mut buf[6..], self.columns);
        LittleEndian::write_u32(&mut buf[10..], self.rows);
        LittleEndian::write_u32(&mut buf[14..], self.x_offset);
        LittleEndian::write_u32(&mut buf[18..], self.y_offset);
        LittleEndian::write_u32(&mut buf[22..], self.bytes_written);
        LittleEndian::write_u32(&mut buf[26..], self.memory_flags);
        LittleEndian::write_u32(&mut buf[30..], self.memory_length);
        LittleEndian::write_u64(&mut buf[34..], self.memory);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_IMAGEMEMXFER", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            compression: cursor.read_u16::<LittleEndian>()?,
            bytes_per_row: cursor.read_u32::<LittleEndian>()?,
            columns: cursor.read_u32::<LittleEndian>()?,
            rows: cursor.read_u32::<LittleEndian>()?,
            x_offset: cursor.read_u32::<LittleEndian>()?,
            y_offset: cursor.read_u32::<LittleEndian>()?,
            bytes_written: cursor.read_u32::<LittleEndian>()?,
            memory_flags: cursor.read_u32::<LittleEndian>()?,
            memory_length: cursor.read_u32::<LittleEndian>()?,
            memory: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// `TW_SETUPFILEXFER` (260 bytes): `TW_STR255` path, format, volume ref.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetupFileXfer {
    pub file_name: String,
    pub format: u16,
    pub vref_num: i16,
}

impl SetupFileXfer {
    pub const SIZE: usize = 260;
    const PATH_LEN: usize = 256;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        write_cstr(&mut buf[..Self::PATH_LEN], &self.file_name);
        LittleEndian::write_u16(&mut buf[256..], self.format);
        LittleEndian::write_i16(&mut buf[258..], self.vref_num);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_SETUPFILEXFER", data, Self::SIZE)?;
        Ok(Self {
            file_name: read_cstr(&data[..Self::PATH_LEN]),
            format: LittleEndian::read_u16(&data[256..]),
            vref_num: LittleEndian::read_i16(&data[258..]),
        })
    }
}

/// Handle slot filled by `DAT_IMAGENATIVEXFER` and the `MSG_OPENDSM` parent
/// window parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleRecord(pub u64);

impl HandleRecord {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("handle", data, Self::SIZE)?;
        Ok(Self(LittleEndian::read_u64(data)))
    }
}

// ============================================================================
// TW_IMAGELAYOUT
// ============================================================================

/// `TW_IMAGELAYOUT` (28 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageLayoutRecord {
    pub frame: Frame,
    pub document_number: u32,
    pub page_number: u32,
    pub frame_number: u32,
}

impl ImageLayoutRecord {
    pub const SIZE: usize = 28;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        for (i, fix) in self.frame.edges().iter().enumerate() {
            fix.write(&mut buf[i * 4..]);
        }
        LittleEndian::write_u32(&mut buf[16..], self.document_number);
        LittleEndian::write_u32(&mut buf[20..], self.page_number);
        LittleEndian::write_u32(&mut buf[24..], self.frame_number);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len("TW_IMAGELAYOUT", data, Self::SIZE)?;
        Ok(Self {
            frame: Frame {
                left: Fix32::read(&data[0..]),
                top: Fix32::read(&data[4..]),
                right: Fix32::read(&data[8..]),
                bottom: Fix32::read(&data[12..]),
            },
            document_number: LittleEndian::read_u32(&data[16..]),
            page_number: LittleEndian::read_u32(&data[20..]),
            frame_number: LittleEndian::read_u32(&data[24..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_identity() -> Identity {
        Identity {
            id: 7,
            version: Version {
                major: 1,
                minor: 9,
                language: 17,
                country: 1,
                info: "2017-01-17".into(),
            },
            protocol_major: 1,
            protocol_minor: 9,
            supported_groups: DG_CONTROL | DG_IMAGE,
            manufacturer: "Acme".into(),
            product_family: "Flatbed".into(),
            product_name: "Acme Scan 3000".into(),
        }
    }

    #[test]
    fn test_identity_layout() {
        let identity = sample_identity();
        let bytes = identity.to_bytes();
        assert_eq!(bytes.len(), Identity::SIZE);
        assert_eq!(LittleEndian::read_u16(&bytes[46..]), 1);
        assert_eq!(&bytes[122..136], b"Acme Scan 3000");
        assert_eq!(Identity::from_bytes(&bytes).unwrap(), identity);
    }

    #[test]
    fn test_identity_truncates_long_names() {
        let mut identity = sample_identity();
        identity.product_name = "X".repeat(40);
        let parsed = Identity::from_bytes(&identity.to_bytes()).unwrap();
        assert_eq!(parsed.product_name.len(), 33);
    }

    #[test]
    fn test_identity_too_small() {
        assert!(matches!(
            Identity::from_bytes(&[0u8; 20]),
            Err(TwainError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_user_interface_disable_marker() {
        let ui = UserInterface {
            show_ui: -1,
            modal_ui: false,
            parent: 0x1234,
        };
        let bytes = ui.to_bytes();
        assert_eq!(&bytes[0..2], &[0xFF, 0xFF]);
        assert_eq!(UserInterface::from_bytes(&bytes).unwrap(), ui);
    }

    #[test]
    fn test_image_mem_xfer_offsets() {
        let mut rec = ImageMemXfer::request(0xAB, 4096);
        rec.bytes_written = 1024;
        let bytes = rec.to_bytes();
        assert_eq!(LittleEndian::read_u32(&bytes[22..]), 1024);
        assert_eq!(LittleEndian::read_u32(&bytes[30..]), 4096);
        assert_eq!(LittleEndian::read_u64(&bytes[34..]), 0xAB);
        assert_eq!(ImageMemXfer::from_bytes(&bytes).unwrap(), rec);
    }

    #[test]
    fn test_setup_file_xfer_layout() {
        let rec = SetupFileXfer {
            file_name: "/tmp/scan.bmp".into(),
            format: TWFF_BMP,
            vref_num: 0,
        };
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), 260);
        assert_eq!(LittleEndian::read_u16(&bytes[256..]), TWFF_BMP);
        assert_eq!(SetupFileXfer::from_bytes(&bytes).unwrap(), rec);
    }

    #[test]
    fn test_image_layout_frame() {
        let rec = ImageLayoutRecord {
            frame: Frame::from_f64(0.5, 1.0, 8.5, 11.0),
            document_number: 1,
            page_number: 2,
            frame_number: 3,
        };
        let parsed = ImageLayoutRecord::from_bytes(&rec.to_bytes()).unwrap();
        assert_eq!(parsed, rec);
        assert_eq!(parsed.frame.width(), 8.0);
        assert_eq!(parsed.frame.height(), 10.0);
    }
}
