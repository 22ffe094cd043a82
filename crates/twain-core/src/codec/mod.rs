//! Binary codec for capability items and containers.
//!
//! Item widths come strictly from [`TYPE_SIZES`]; callers never guess them.

pub mod container;

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, TwainError};
use crate::protocol::constants::*;

pub use container::{Array, Container, Enumeration, Layout, OneValue, Range};

// ============================================================================
// Item types
// ============================================================================

/// `TWTY_*` item type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ItemType {
    Int8 = TWTY_INT8,
    Int16 = TWTY_INT16,
    Int32 = TWTY_INT32,
    UInt8 = TWTY_UINT8,
    UInt16 = TWTY_UINT16,
    UInt32 = TWTY_UINT32,
    Bool = TWTY_BOOL,
    Fix32 = TWTY_FIX32,
    Frame = TWTY_FRAME,
    Str32 = TWTY_STR32,
    Str64 = TWTY_STR64,
    Str128 = TWTY_STR128,
    Str255 = TWTY_STR255,
    Str1024 = TWTY_STR1024,
}

impl ItemType {
    pub fn from_u16(tag: u16) -> Result<Self> {
        Ok(match tag {
            TWTY_INT8 => ItemType::Int8,
            TWTY_INT16 => ItemType::Int16,
            TWTY_INT32 => ItemType::Int32,
            TWTY_UINT8 => ItemType::UInt8,
            TWTY_UINT16 => ItemType::UInt16,
            TWTY_UINT32 => ItemType::UInt32,
            TWTY_BOOL => ItemType::Bool,
            TWTY_FIX32 => ItemType::Fix32,
            TWTY_FRAME => ItemType::Frame,
            TWTY_STR32 => ItemType::Str32,
            TWTY_STR64 => ItemType::Str64,
            TWTY_STR128 => ItemType::Str128,
            TWTY_STR255 => ItemType::Str255,
            TWTY_STR1024 => ItemType::Str1024,
            other => return Err(TwainError::UnknownItemType(other)),
        })
    }

    pub fn tag(self) -> u16 {
        self as u16
    }

    /// Encoded width in bytes.
    pub fn size(self) -> usize {
        TYPE_SIZES[self as usize]
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            ItemType::Str32
                | ItemType::Str64
                | ItemType::Str128
                | ItemType::Str255
                | ItemType::Str1024
        )
    }

    /// Whether items of this type fit a 32-bit container slot.
    pub fn fits_slot(self) -> bool {
        self.size() <= 4
    }
}

// ============================================================================
// Fixed point
// ============================================================================

/// `TW_FIX32`: signed 16.16 fixed point, kept as raw parts so values
/// re-encode to the exact bytes they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fix32 {
    pub whole: i16,
    pub frac: u16,
}

impl Fix32 {
    pub const SIZE: usize = 4;

    /// Encode with rounding half away from zero.
    pub fn from_f64(value: f64) -> Self {
        let scaled = value * 65536.0;
        let v = if scaled >= 0.0 {
            (scaled + 0.5) as i32
        } else {
            (scaled - 0.5) as i32
        };
        Self::from_bits(v as u32)
    }

    pub fn to_f64(self) -> f64 {
        self.whole as f64 + self.frac as f64 / 65536.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            whole: (bits >> 16) as u16 as i16,
            frac: (bits & 0xFFFF) as u16,
        }
    }

    pub fn to_bits(self) -> u32 {
        ((self.whole as u16 as u32) << 16) | self.frac as u32
    }

    /// Read `Whole` then `Frac` at the start of `buf`.
    pub fn read(buf: &[u8]) -> Self {
        Self {
            whole: LittleEndian::read_i16(&buf[0..]),
            frac: LittleEndian::read_u16(&buf[2..]),
        }
    }

    pub fn write(self, buf: &mut [u8]) {
        LittleEndian::write_i16(&mut buf[0..], self.whole);
        LittleEndian::write_u16(&mut buf[2..], self.frac);
    }
}

impl fmt::Display for Fix32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

/// `TW_FRAME`: four fixed point edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Frame {
    pub left: Fix32,
    pub top: Fix32,
    pub right: Fix32,
    pub bottom: Fix32,
}

impl Frame {
    pub fn from_f64(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left: Fix32::from_f64(left),
            top: Fix32::from_f64(top),
            right: Fix32::from_f64(right),
            bottom: Fix32::from_f64(bottom),
        }
    }

    pub fn edges(&self) -> [Fix32; 4] {
        [self.left, self.top, self.right, self.bottom]
    }

    pub fn x(&self) -> f64 {
        self.left.to_f64()
    }

    pub fn y(&self) -> f64 {
        self.top.to_f64()
    }

    pub fn width(&self) -> f64 {
        self.right.to_f64() - self.left.to_f64()
    }

    pub fn height(&self) -> f64 {
        self.bottom.to_f64() - self.top.to_f64()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[x={}, y={}, w={}, h={}]",
            self.x(),
            self.y(),
            self.width(),
            self.height()
        )
    }
}

// ============================================================================
// Items
// ============================================================================

/// One decoded capability value.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Bool(bool),
    Fix32(Fix32),
    Frame(Frame),
    Str(String),
}

impl Item {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Item::Int8(_) => "int8",
            Item::Int16(_) => "int16",
            Item::Int32(_) => "int32",
            Item::UInt8(_) => "uint8",
            Item::UInt16(_) => "uint16",
            Item::UInt32(_) => "uint32",
            Item::Bool(_) => "bool",
            Item::Fix32(_) => "fix32",
            Item::Frame(_) => "frame",
            Item::Str(_) => "string",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Item::Int8(v) => Some(*v as i64),
            Item::Int16(v) => Some(*v as i64),
            Item::Int32(v) => Some(*v as i64),
            Item::UInt8(v) => Some(*v as i64),
            Item::UInt16(v) => Some(*v as i64),
            Item::UInt32(v) => Some(*v as i64),
            Item::Bool(v) => Some(*v as i64),
            Item::Fix32(v) => Some(v.to_f64() as i64),
            Item::Str(s) => s.trim().parse().ok(),
            Item::Frame(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Item::Fix32(v) => Some(v.to_f64()),
            Item::Str(s) => s.trim().parse().ok(),
            Item::Frame(_) => None,
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Item::Bool(v) => Some(*v),
            Item::Str(s) => s.trim().parse().ok(),
            Item::Fix32(v) => Some(v.to_f64() != 0.0),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Convert to the representation `ty` stores.
    pub fn coerce(self, ty: ItemType) -> Result<Item> {
        let mismatch = |item: &Item| TwainError::ItemTypeMismatch {
            expected: ty,
            found: item.kind_name(),
        };
        let int = |item: &Item| item.as_i64().ok_or_else(|| mismatch(item));
        Ok(match ty {
            ItemType::Int8 => Item::Int8(int(&self)? as i8),
            ItemType::Int16 => Item::Int16(int(&self)? as i16),
            ItemType::Int32 => Item::Int32(int(&self)? as i32),
            ItemType::UInt8 => Item::UInt8(int(&self)? as u8),
            ItemType::UInt16 => Item::UInt16(int(&self)? as u16),
            ItemType::UInt32 => Item::UInt32(int(&self)? as u32),
            ItemType::Bool => Item::Bool(self.as_bool().ok_or_else(|| mismatch(&self))?),
            ItemType::Fix32 => match self {
                Item::Fix32(v) => Item::Fix32(v),
                other => Item::Fix32(Fix32::from_f64(
                    other.as_f64().ok_or_else(|| mismatch(&other))?,
                )),
            },
            ItemType::Frame => match self {
                Item::Frame(frame) => Item::Frame(frame),
                other => return Err(mismatch(&other)),
            },
            _ => {
                let s = match self {
                    Item::Str(s) => s,
                    other @ Item::Frame(_) => return Err(mismatch(&other)),
                    other => other.to_string(),
                };
                // One byte of every string slot is the terminator.
                let capacity = ty.size() - 1;
                if s.len() > capacity {
                    return Err(TwainError::MalformedContainer(format!(
                        "{} byte string does not fit a {:?} slot ({} bytes)",
                        s.len(),
                        ty,
                        capacity
                    )));
                }
                Item::Str(s)
            }
        })
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Int8(v) => write!(f, "{}", v),
            Item::Int16(v) => write!(f, "{}", v),
            Item::Int32(v) => write!(f, "{}", v),
            Item::UInt8(v) => write!(f, "{}", v),
            Item::UInt16(v) => write!(f, "{}", v),
            Item::UInt32(v) => write!(f, "{}", v),
            Item::Bool(v) => write!(f, "{}", v),
            Item::Fix32(v) => write!(f, "{}", v),
            Item::Frame(v) => write!(f, "{}", v),
            Item::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Item {
    fn from(v: bool) -> Self {
        Item::Bool(v)
    }
}

impl From<i32> for Item {
    fn from(v: i32) -> Self {
        Item::Int32(v)
    }
}

impl From<u16> for Item {
    fn from(v: u16) -> Self {
        Item::UInt16(v)
    }
}

impl From<u32> for Item {
    fn from(v: u32) -> Self {
        Item::UInt32(v)
    }
}

impl From<f64> for Item {
    fn from(v: f64) -> Self {
        Item::Fix32(Fix32::from_f64(v))
    }
}

impl From<Frame> for Item {
    fn from(v: Frame) -> Self {
        Item::Frame(v)
    }
}

impl From<&str> for Item {
    fn from(v: &str) -> Self {
        Item::Str(v.to_string())
    }
}

// ============================================================================
// Primitive encode / decode
// ============================================================================

fn check_bounds(ty: ItemType, len: usize, bytes: usize, offset: usize) -> Result<()> {
    if offset + len > bytes {
        return Err(TwainError::MalformedContainer(format!(
            "{:?} item at offset {} overruns a {}-byte buffer",
            ty, offset, bytes
        )));
    }
    Ok(())
}

/// Read a zero-terminated string of at most `buf.len()` bytes.
pub fn read_cstr(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Zero `buf` and copy `s` into it, always leaving room for a terminator.
pub fn write_cstr(buf: &mut [u8], s: &str) {
    buf.fill(0);
    let n = s.len().min(buf.len().saturating_sub(1));
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
}

/// Decode one item of type `ty` at `offset`, using the full type width.
/// Strings stop one byte short of the width, where the terminator lives.
pub fn decode(ty: ItemType, bytes: &[u8], offset: usize) -> Result<Item> {
    check_bounds(ty, ty.size(), bytes.len(), offset)?;
    let b = &bytes[offset..];
    Ok(match ty {
        ItemType::Int8 => Item::Int8(b[0] as i8),
        ItemType::Int16 => Item::Int16(LittleEndian::read_i16(b)),
        ItemType::Int32 => Item::Int32(LittleEndian::read_i32(b)),
        ItemType::UInt8 => Item::UInt8(b[0]),
        ItemType::UInt16 => Item::UInt16(LittleEndian::read_u16(b)),
        ItemType::UInt32 => Item::UInt32(LittleEndian::read_u32(b)),
        ItemType::Bool => Item::Bool(LittleEndian::read_u16(b) != 0),
        ItemType::Fix32 => Item::Fix32(Fix32::read(b)),
        ItemType::Frame => Item::Frame(Frame {
            left: Fix32::read(&b[0..]),
            top: Fix32::read(&b[4..]),
            right: Fix32::read(&b[8..]),
            bottom: Fix32::read(&b[12..]),
        }),
        _ => Item::Str(read_cstr(&b[..ty.size() - 1])),
    })
}

/// Encode `item` as type `ty` at `offset`.
pub fn encode(ty: ItemType, item: &Item, bytes: &mut [u8], offset: usize) -> Result<()> {
    check_bounds(ty, ty.size(), bytes.len(), offset)?;
    let item = item.clone().coerce(ty)?;
    let b = &mut bytes[offset..];
    match item {
        Item::Int8(v) => b[0] = v as u8,
        Item::Int16(v) => LittleEndian::write_i16(b, v),
        Item::Int32(v) => LittleEndian::write_i32(b, v),
        Item::UInt8(v) => b[0] = v,
        Item::UInt16(v) => LittleEndian::write_u16(b, v),
        Item::UInt32(v) => LittleEndian::write_u32(b, v),
        Item::Bool(v) => LittleEndian::write_u16(b, v as u16),
        Item::Fix32(v) => v.write(b),
        Item::Frame(frame) => {
            for (i, edge) in frame.edges().iter().enumerate() {
                edge.write(&mut b[i * 4..]);
            }
        }
        Item::Str(s) => write_cstr(&mut b[..ty.size()], &s),
    }
    Ok(())
}

/// Decode an item stored in a 32-bit container slot (`TW_ONEVALUE`,
/// `TW_RANGE`).
pub fn decode_slot(ty: ItemType, bytes: &[u8], offset: usize) -> Result<Item> {
    if !ty.fits_slot() {
        return Err(TwainError::MalformedContainer(format!(
            "{:?} does not fit a 32-bit slot",
            ty
        )));
    }
    check_bounds(ty, 4, bytes.len(), offset)?;
    let raw = LittleEndian::read_u32(&bytes[offset..]);
    Ok(match ty {
        ItemType::Int8 => Item::Int8(raw as i8),
        ItemType::Int16 => Item::Int16(raw as i16),
        ItemType::Int32 => Item::Int32(raw as i32),
        ItemType::UInt8 => Item::UInt8(raw as u8),
        ItemType::UInt16 => Item::UInt16(raw as u16),
        ItemType::Bool => Item::Bool(raw != 0),
        ItemType::Fix32 => Item::Fix32(Fix32::read(&bytes[offset..])),
        _ => Item::UInt32(raw),
    })
}

/// Encode an item into a 32-bit container slot, sign-extending signed types.
pub fn encode_slot(ty: ItemType, item: &Item, bytes: &mut [u8], offset: usize) -> Result<()> {
    if !ty.fits_slot() {
        return Err(TwainError::MalformedContainer(format!(
            "{:?} does not fit a 32-bit slot",
            ty
        )));
    }
    check_bounds(ty, 4, bytes.len(), offset)?;
    let raw = match item.clone().coerce(ty)? {
        Item::Int8(v) => v as i32 as u32,
        Item::Int16(v) => v as i32 as u32,
        Item::Int32(v) => v as u32,
        Item::UInt8(v) => v as u32,
        Item::UInt16(v) => v as u32,
        Item::UInt32(v) => v,
        Item::Bool(v) => v as u32,
        Item::Fix32(v) => {
            v.write(&mut bytes[offset..]);
            return Ok(());
        }
        other => {
            return Err(TwainError::ItemTypeMismatch {
                expected: ty,
                found: other.kind_name(),
            });
        }
    };
    LittleEndian::write_u32(&mut bytes[offset..], raw);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_item_type() {
        assert!(matches!(
            ItemType::from_u16(14),
            Err(TwainError::UnknownItemType(14))
        ));
        assert_eq!(ItemType::from_u16(TWTY_FIX32).unwrap(), ItemType::Fix32);
    }

    #[test]
    fn test_fix32_rounds_half_away_from_zero() {
        // 1/131072 is exactly half a unit in the last place.
        let half = 1.0 / 131072.0;
        assert_eq!(Fix32::from_f64(half), Fix32 { whole: 0, frac: 1 });
        assert_eq!(Fix32::from_f64(-half).to_f64(), -1.0 / 65536.0);
        assert_eq!(Fix32::from_f64(-0.5), Fix32 { whole: -1, frac: 0x8000 });
        assert_eq!(Fix32::from_f64(300.25).to_f64(), 300.25);
    }

    #[test]
    fn test_fix32_bits() {
        let fix = Fix32 { whole: -2, frac: 0x4000 };
        assert_eq!(Fix32::from_bits(fix.to_bits()), fix);
        assert_eq!(fix.to_f64(), -1.75);
    }

    #[test]
    fn test_frame_decode_derives_size() {
        let mut buf = [0u8; 16];
        let frame = Frame::from_f64(1.0, 2.0, 9.5, 12.0);
        encode(ItemType::Frame, &Item::Frame(frame), &mut buf, 0).unwrap();
        let Item::Frame(decoded) = decode(ItemType::Frame, &buf, 0).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(decoded.width(), 8.5);
        assert_eq!(decoded.height(), 10.0);
    }

    #[test]
    fn test_string_stops_at_zero_or_terminator_slot() {
        let mut buf = [b'A'; 40];
        buf[5] = 0;
        assert_eq!(
            decode(ItemType::Str32, &buf, 0).unwrap(),
            Item::Str("AAAAA".into())
        );
        let full = [b'B'; 34];
        let Item::Str(s) = decode(ItemType::Str32, &full, 0).unwrap() else {
            panic!("expected string");
        };
        assert_eq!(s.len(), 33);
    }

    #[test]
    fn test_string_longer_than_slot_is_rejected() {
        let fits = "C".repeat(33);
        assert_eq!(
            Item::Str(fits.clone()).coerce(ItemType::Str32).unwrap(),
            Item::Str(fits)
        );
        assert!(matches!(
            Item::Str("C".repeat(34)).coerce(ItemType::Str32),
            Err(TwainError::MalformedContainer(_))
        ));
        let mut buf = [0u8; 34];
        assert!(encode(ItemType::Str32, &Item::Str("C".repeat(34)), &mut buf, 0).is_err());
    }

    #[test]
    fn test_decode_out_of_bounds_is_an_error() {
        assert!(matches!(
            decode(ItemType::Int32, &[0u8; 3], 0),
            Err(TwainError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_slot_sign_extension() {
        let mut buf = [0u8; 4];
        encode_slot(ItemType::Int16, &Item::Int16(-2), &mut buf, 0).unwrap();
        assert_eq!(buf, [0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(
            decode_slot(ItemType::Int16, &buf, 0).unwrap(),
            Item::Int16(-2)
        );
        assert!(encode_slot(ItemType::Frame, &Item::Int32(0), &mut buf, 0).is_err());
    }

    #[test]
    fn test_coercions() {
        assert_eq!(Item::Int32(1).coerce(ItemType::Bool).unwrap(), Item::Bool(true));
        assert_eq!(
            Item::from(150.0).coerce(ItemType::UInt16).unwrap(),
            Item::UInt16(150)
        );
        assert_eq!(
            Item::Str("300".into()).coerce(ItemType::Int32).unwrap(),
            Item::Int32(300)
        );
        assert!(matches!(
            Item::Int32(1).coerce(ItemType::Frame),
            Err(TwainError::ItemTypeMismatch { .. })
        ));
    }
}
