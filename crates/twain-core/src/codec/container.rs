//! Capability containers: `TW_ONEVALUE`, `TW_ARRAY`, `TW_ENUMERATION` and
//! `TW_RANGE`.

use byteorder::{ByteOrder, LittleEndian};

use super::{Item, ItemType, decode, decode_slot, encode, encode_slot};
use crate::error::{Result, TwainError};
use crate::protocol::constants::*;

/// Item stride options for array-like containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Layout {
    /// Lay out `TWTY_UINT16` items on a 4-byte stride, matching traces
    /// captured from older drivers.
    pub legacy_uint16_stride: bool,
}

impl Layout {
    pub fn stride(&self, ty: ItemType) -> usize {
        if self.legacy_uint16_stride && ty == ItemType::UInt16 {
            4
        } else {
            ty.size()
        }
    }
}

fn read_item_type(bytes: &[u8], min_len: usize) -> Result<ItemType> {
    if bytes.len() < min_len {
        return Err(TwainError::MalformedContainer(format!(
            "container header needs {} bytes, got {}",
            min_len,
            bytes.len()
        )));
    }
    ItemType::from_u16(LittleEndian::read_u16(bytes))
}

fn read_items(
    ty: ItemType,
    bytes: &[u8],
    offset: usize,
    count: usize,
    stride: usize,
) -> Result<Vec<Item>> {
    let needed = offset + count * stride;
    if bytes.len() < needed {
        return Err(TwainError::MalformedContainer(format!(
            "{} items of {:?} need {} bytes, got {}",
            count,
            ty,
            needed,
            bytes.len()
        )));
    }
    (0..count)
        .map(|i| decode(ty, bytes, offset + i * stride))
        .collect()
}

fn write_items(ty: ItemType, items: &[Item], buf: &mut [u8], offset: usize, stride: usize) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        encode(ty, item, buf, offset + i * stride)?;
    }
    Ok(())
}

fn position(items: &[Item], ty: ItemType, value: Item) -> Result<u32> {
    let shown = value.to_string();
    let wanted = value.coerce(ty)?;
    items
        .iter()
        .position(|item| *item == wanted)
        .map(|i| i as u32)
        .ok_or(TwainError::ValueNotFound(shown))
}

// ============================================================================
// TW_ONEVALUE
// ============================================================================

/// Single item. Current and default value share the one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct OneValue {
    pub item_type: ItemType,
    pub item: Item,
}

impl OneValue {
    pub fn new(item_type: ItemType, item: impl Into<Item>) -> Result<Self> {
        Ok(Self {
            item_type,
            item: item.into().coerce(item_type)?,
        })
    }

    /// Encoded size: numeric items use a 32-bit slot, wider items are inline.
    pub fn encoded_len(&self) -> usize {
        2 + self.item_type.size().max(4)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let item_type = read_item_type(bytes, 2)?;
        let item = if item_type.fits_slot() {
            decode_slot(item_type, bytes, 2)?
        } else {
            decode(item_type, bytes, 2)?
        };
        Ok(Self { item_type, item })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.encoded_len()];
        LittleEndian::write_u16(&mut buf, self.item_type.tag());
        if self.item_type.fits_slot() {
            encode_slot(self.item_type, &self.item, &mut buf, 2)?;
        } else {
            encode(self.item_type, &self.item, &mut buf, 2)?;
        }
        Ok(buf)
    }
}

// ============================================================================
// TW_ARRAY
// ============================================================================

/// List of items with no current/default notion.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub item_type: ItemType,
    pub items: Vec<Item>,
    pub layout: Layout,
}

impl Array {
    pub const HEADER_SIZE: usize = 6;

    fn decode(bytes: &[u8], layout: Layout) -> Result<Self> {
        let item_type = read_item_type(bytes, Self::HEADER_SIZE)?;
        let count = LittleEndian::read_u32(&bytes[2..]) as usize;
        let items = read_items(
            item_type,
            bytes,
            Self::HEADER_SIZE,
            count,
            layout.stride(item_type),
        )?;
        Ok(Self {
            item_type,
            items,
            layout,
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let stride = self.layout.stride(self.item_type);
        let mut buf = vec![0u8; Self::HEADER_SIZE + self.items.len() * stride];
        LittleEndian::write_u16(&mut buf[0..], self.item_type.tag());
        LittleEndian::write_u32(&mut buf[2..], self.items.len() as u32);
        write_items(self.item_type, &self.items, &mut buf, Self::HEADER_SIZE, stride)?;
        Ok(buf)
    }
}

// ============================================================================
// TW_ENUMERATION
// ============================================================================

/// Item list with current and default indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Enumeration {
    pub item_type: ItemType,
    pub items: Vec<Item>,
    pub current_index: u32,
    pub default_index: u32,
    pub layout: Layout,
}

impl Enumeration {
    pub const HEADER_SIZE: usize = 14;

    fn decode(bytes: &[u8], layout: Layout) -> Result<Self> {
        let item_type = read_item_type(bytes, Self::HEADER_SIZE)?;
        let count = LittleEndian::read_u32(&bytes[2..]) as usize;
        let items = read_items(
            item_type,
            bytes,
            Self::HEADER_SIZE,
            count,
            layout.stride(item_type),
        )?;
        Ok(Self {
            item_type,
            items,
            current_index: LittleEndian::read_u32(&bytes[6..]),
            default_index: LittleEndian::read_u32(&bytes[10..]),
            layout,
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let stride = self.layout.stride(self.item_type);
        let mut buf = vec![0u8; Self::HEADER_SIZE + self.items.len() * stride];
        LittleEndian::write_u16(&mut buf[0..], self.item_type.tag());
        LittleEndian::write_u32(&mut buf[2..], self.items.len() as u32);
        LittleEndian::write_u32(&mut buf[6..], self.current_index);
        LittleEndian::write_u32(&mut buf[10..], self.default_index);
        write_items(self.item_type, &self.items, &mut buf, Self::HEADER_SIZE, stride)?;
        Ok(buf)
    }

    fn item_at(&self, index: u32) -> Result<Item> {
        self.items.get(index as usize).cloned().ok_or_else(|| {
            TwainError::MalformedContainer(format!(
                "index {} outside {} enumeration items",
                index,
                self.items.len()
            ))
        })
    }
}

// ============================================================================
// TW_RANGE
// ============================================================================

/// Min/max/step bounds plus current and default, all in 32-bit slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub item_type: ItemType,
    pub min: Item,
    pub max: Item,
    pub step: Item,
    pub default: Item,
    pub current: Item,
}

impl Range {
    pub const SIZE: usize = 22;

    fn decode(bytes: &[u8]) -> Result<Self> {
        let item_type = read_item_type(bytes, Self::SIZE)?;
        let slot = |i: usize| decode_slot(item_type, bytes, 2 + i * 4);
        Ok(Self {
            item_type,
            min: slot(0)?,
            max: slot(1)?,
            step: slot(2)?,
            default: slot(3)?,
            current: slot(4)?,
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_u16(&mut buf[0..], self.item_type.tag());
        let slots = [&self.min, &self.max, &self.step, &self.default, &self.current];
        for (i, item) in slots.into_iter().enumerate() {
            encode_slot(self.item_type, item, &mut buf, 2 + i * 4)?;
        }
        Ok(buf)
    }
}

// ============================================================================
// Container
// ============================================================================

/// Decoded capability container.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    OneValue(OneValue),
    Array(Array),
    Enumeration(Enumeration),
    Range(Range),
}

impl Container {
    /// Decode a container of `con_type` (`TWON_*`) from its native bytes.
    pub fn decode(con_type: u16, bytes: &[u8], layout: Layout) -> Result<Self> {
        Ok(match con_type {
            TWON_ONEVALUE => Container::OneValue(OneValue::decode(bytes)?),
            TWON_ARRAY => Container::Array(Array::decode(bytes, layout)?),
            TWON_ENUMERATION => Container::Enumeration(Enumeration::decode(bytes, layout)?),
            TWON_RANGE => Container::Range(Range::decode(bytes)?),
            other => return Err(TwainError::UnknownContainerType(other)),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Container::OneValue(c) => c.to_bytes(),
            Container::Array(c) => c.to_bytes(),
            Container::Enumeration(c) => c.to_bytes(),
            Container::Range(c) => c.to_bytes(),
        }
    }

    /// `TWON_*` container type.
    pub fn con_type(&self) -> u16 {
        match self {
            Container::OneValue(_) => TWON_ONEVALUE,
            Container::Array(_) => TWON_ARRAY,
            Container::Enumeration(_) => TWON_ENUMERATION,
            Container::Range(_) => TWON_RANGE,
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Container::OneValue(c) => c.item_type,
            Container::Array(c) => c.item_type,
            Container::Enumeration(c) => c.item_type,
            Container::Range(c) => c.item_type,
        }
    }

    /// All items; a range reports its current value only.
    pub fn items(&self) -> Vec<Item> {
        match self {
            Container::OneValue(c) => vec![c.item.clone()],
            Container::Array(c) => c.items.clone(),
            Container::Enumeration(c) => c.items.clone(),
            Container::Range(c) => vec![c.current.clone()],
        }
    }

    pub fn current_value(&self) -> Result<Item> {
        match self {
            Container::OneValue(c) => Ok(c.item.clone()),
            Container::Array(_) => Err(TwainError::NotApplicable("current value")),
            Container::Enumeration(c) => c.item_at(c.current_index),
            Container::Range(c) => Ok(c.current.clone()),
        }
    }

    pub fn default_value(&self) -> Result<Item> {
        match self {
            Container::OneValue(c) => Ok(c.item.clone()),
            Container::Array(_) => Err(TwainError::NotApplicable("default value")),
            Container::Enumeration(c) => c.item_at(c.default_index),
            Container::Range(c) => Ok(c.default.clone()),
        }
    }

    pub fn set_current_value(&mut self, value: impl Into<Item>) -> Result<()> {
        let value = value.into();
        match self {
            Container::OneValue(c) => c.item = value.coerce(c.item_type)?,
            Container::Array(_) => return Err(TwainError::NotApplicable("current value")),
            Container::Enumeration(c) => {
                c.current_index = position(&c.items, c.item_type, value)?
            }
            Container::Range(c) => c.current = value.coerce(c.item_type)?,
        }
        Ok(())
    }

    pub fn set_default_value(&mut self, value: impl Into<Item>) -> Result<()> {
        let value = value.into();
        match self {
            Container::OneValue(c) => c.item = value.coerce(c.item_type)?,
            Container::Array(_) => return Err(TwainError::NotApplicable("default value")),
            Container::Enumeration(c) => {
                c.default_index = position(&c.items, c.item_type, value)?
            }
            Container::Range(c) => c.default = value.coerce(c.item_type)?,
        }
        Ok(())
    }

    pub fn bool_value(&self) -> Result<bool> {
        to_bool(self.current_value()?)
    }

    pub fn int_value(&self) -> Result<i64> {
        to_int(self.current_value()?)
    }

    pub fn f64_value(&self) -> Result<f64> {
        to_f64(self.current_value()?)
    }

    pub fn bool_default_value(&self) -> Result<bool> {
        to_bool(self.default_value()?)
    }

    pub fn int_default_value(&self) -> Result<i64> {
        to_int(self.default_value()?)
    }

    pub fn f64_default_value(&self) -> Result<f64> {
        to_f64(self.default_value()?)
    }
}

fn to_bool(item: Item) -> Result<bool> {
    item.as_bool().ok_or(TwainError::ItemTypeMismatch {
        expected: ItemType::Bool,
        found: item.kind_name(),
    })
}

fn to_int(item: Item) -> Result<i64> {
    item.as_i64().ok_or(TwainError::ItemTypeMismatch {
        expected: ItemType::Int32,
        found: item.kind_name(),
    })
}

fn to_f64(item: Item) -> Result<f64> {
    item.as_f64().ok_or(TwainError::ItemTypeMismatch {
        expected: ItemType::Fix32,
        found: item.kind_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Fix32, Frame};

    fn roundtrip(container: &Container, layout: Layout) {
        let bytes = container.to_bytes().unwrap();
        let decoded = Container::decode(container.con_type(), &bytes, layout).unwrap();
        assert_eq!(&decoded, container);
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    fn uint16_enum(layout: Layout) -> Container {
        Container::Enumeration(Enumeration {
            item_type: ItemType::UInt16,
            items: vec![Item::UInt16(0), Item::UInt16(1), Item::UInt16(2)],
            current_index: 2,
            default_index: 0,
            layout,
        })
    }

    #[test]
    fn test_roundtrip_all_variants() {
        roundtrip(
            &Container::OneValue(OneValue::new(ItemType::Fix32, 300.5).unwrap()),
            Layout::default(),
        );
        roundtrip(
            &Container::OneValue(OneValue::new(ItemType::Str255, "Acme").unwrap()),
            Layout::default(),
        );
        roundtrip(
            &Container::Array(Array {
                item_type: ItemType::Frame,
                items: vec![
                    Item::Frame(Frame::from_f64(0.0, 0.0, 8.5, 11.0)),
                    Item::Frame(Frame::from_f64(0.0, 0.0, 8.27, 11.69)),
                ],
                layout: Layout::default(),
            }),
            Layout::default(),
        );
        roundtrip(&uint16_enum(Layout::default()), Layout::default());
        roundtrip(
            &Container::Range(Range {
                item_type: ItemType::Int32,
                min: Item::Int32(-100),
                max: Item::Int32(100),
                step: Item::Int32(5),
                default: Item::Int32(0),
                current: Item::Int32(-35),
            }),
            Layout::default(),
        );
    }

    #[test]
    fn test_full_width_strings_roundtrip() {
        let widest = "A".repeat(ItemType::Str32.size() - 1);
        roundtrip(
            &Container::OneValue(OneValue::new(ItemType::Str32, widest.as_str()).unwrap()),
            Layout::default(),
        );
        roundtrip(
            &Container::Array(Array {
                item_type: ItemType::Str64,
                items: vec![Item::Str("B".repeat(65)), Item::Str(String::new())],
                layout: Layout::default(),
            }),
            Layout::default(),
        );
        assert!(matches!(
            OneValue::new(ItemType::Str32, "A".repeat(34).as_str()),
            Err(TwainError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_header_sizes() {
        let one = Container::OneValue(OneValue::new(ItemType::UInt16, 5u16).unwrap());
        assert_eq!(one.to_bytes().unwrap().len(), 6);
        let bytes = uint16_enum(Layout::default()).to_bytes().unwrap();
        assert_eq!(bytes.len(), 14 + 3 * 2);
        let range = Container::Range(Range {
            item_type: ItemType::Fix32,
            min: Item::Fix32(Fix32::from_f64(50.0)),
            max: Item::Fix32(Fix32::from_f64(1200.0)),
            step: Item::Fix32(Fix32::from_f64(1.0)),
            default: Item::Fix32(Fix32::from_f64(300.0)),
            current: Item::Fix32(Fix32::from_f64(150.0)),
        });
        assert_eq!(range.to_bytes().unwrap().len(), Range::SIZE);
    }

    #[test]
    fn test_one_value_shares_current_and_default() {
        let mut c = Container::OneValue(OneValue::new(ItemType::Int32, 1).unwrap());
        c.set_current_value(42).unwrap();
        assert_eq!(c.default_value().unwrap(), Item::Int32(42));
        c.set_default_value(7).unwrap();
        assert_eq!(c.current_value().unwrap(), Item::Int32(7));
    }

    #[test]
    fn test_enumeration_search() {
        let mut c = uint16_enum(Layout::default());
        c.set_current_value(1u16).unwrap();
        assert_eq!(c.int_value().unwrap(), 1);
        c.set_default_value(2).unwrap();
        assert_eq!(c.int_default_value().unwrap(), 2);
        assert!(matches!(
            c.set_current_value(9u16),
            Err(TwainError::ValueNotFound(_))
        ));
    }

    #[test]
    fn test_array_has_no_current_or_default() {
        let mut c = Container::Array(Array {
            item_type: ItemType::UInt16,
            items: vec![Item::UInt16(0x1005)],
            layout: Layout::default(),
        });
        assert!(matches!(c.current_value(), Err(TwainError::NotApplicable(_))));
        assert!(matches!(c.default_value(), Err(TwainError::NotApplicable(_))));
        assert!(matches!(
            c.set_current_value(1u16),
            Err(TwainError::NotApplicable(_))
        ));
        assert!(matches!(
            c.set_default_value(1u16),
            Err(TwainError::NotApplicable(_))
        ));
    }

    #[test]
    fn test_legacy_uint16_stride() {
        let layout = Layout {
            legacy_uint16_stride: true,
        };
        let bytes = uint16_enum(layout).to_bytes().unwrap();
        assert_eq!(bytes.len(), 14 + 3 * 4);
        // Item 1 sits at offset 18, item 2 at 22.
        assert_eq!(LittleEndian::read_u16(&bytes[18..]), 1);
        assert_eq!(LittleEndian::read_u16(&bytes[22..]), 2);
        roundtrip(&uint16_enum(layout), layout);

        // Other types keep the table stride.
        assert_eq!(layout.stride(ItemType::Int16), 2);
        assert_eq!(layout.stride(ItemType::UInt32), 4);
    }

    #[test]
    fn test_unknown_container_and_item_types() {
        assert!(matches!(
            Container::decode(9, &[0u8; 6], Layout::default()),
            Err(TwainError::UnknownContainerType(9))
        ));
        let mut bytes = vec![0u8; 6];
        bytes[0] = 0x20;
        assert!(matches!(
            Container::decode(TWON_ONEVALUE, &bytes, Layout::default()),
            Err(TwainError::UnknownItemType(0x20))
        ));
    }

    #[test]
    fn test_truncated_array_is_rejected() {
        let mut bytes = vec![0u8; 8];
        LittleEndian::write_u16(&mut bytes[0..], TWTY_UINT16);
        LittleEndian::write_u32(&mut bytes[2..], 10);
        assert!(matches!(
            Container::decode(TWON_ARRAY, &bytes, Layout::default()),
            Err(TwainError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_range_rejects_wide_types() {
        let mut bytes = vec![0u8; Range::SIZE];
        LittleEndian::write_u16(&mut bytes[0..], TWTY_FRAME);
        assert!(matches!(
            Container::decode(TWON_RANGE, &bytes, Layout::default()),
            Err(TwainError::MalformedContainer(_))
        ));
    }
}
