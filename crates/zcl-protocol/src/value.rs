//! ZCL scalar data types and typed value encoding
//!
//! All multi-byte integers are little-endian on the wire. The 24, 40 and
//! 48-bit widths have no native machine type and are carried in the next
//! wider integer, encoded with only 3, 5 or 6 bytes.

use chrono::{DateTime, TimeZone, Utc};

use crate::types::ZclError;

/// Seconds between the Unix epoch and the ZigBee UTC epoch (2000-01-01T00:00:00Z)
const ZIGBEE_EPOCH_UNIX: i64 = 946_684_800;

/// Convert a ZigBee UTC time (seconds since 2000-01-01T00:00:00Z) to a datetime
#[must_use]
pub fn utc_time_to_datetime(seconds: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(ZIGBEE_EPOCH_UNIX + i64::from(seconds), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Convert a datetime to ZigBee UTC time, clamping anything before the epoch to 0
#[must_use]
pub fn datetime_to_utc_time(when: DateTime<Utc>) -> u32 {
    let seconds = when.timestamp() - ZIGBEE_EPOCH_UNIX;
    u32::try_from(seconds).unwrap_or(0)
}

/// ZCL data type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Boolean = 0x10,
    Bitmap8 = 0x18,
    Bitmap16 = 0x19,
    Uint8 = 0x20,
    Uint16 = 0x21,
    Uint24 = 0x22,
    Uint32 = 0x23,
    Uint40 = 0x24,
    Uint48 = 0x25,
    Int8 = 0x28,
    Int16 = 0x29,
    Int24 = 0x2A,
    Int32 = 0x2B,
    Enum8 = 0x30,
    Enum16 = 0x31,
    OctetString = 0x41,
    CharacterString = 0x42,
    UtcTime = 0xE2,
    IeeeAddress = 0xF0,
}

impl DataType {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(DataType::Boolean),
            0x18 => Some(DataType::Bitmap8),
            0x19 => Some(DataType::Bitmap16),
            0x20 => Some(DataType::Uint8),
            0x21 => Some(DataType::Uint16),
            0x22 => Some(DataType::Uint24),
            0x23 => Some(DataType::Uint32),
            0x24 => Some(DataType::Uint40),
            0x25 => Some(DataType::Uint48),
            0x28 => Some(DataType::Int8),
            0x29 => Some(DataType::Int16),
            0x2A => Some(DataType::Int24),
            0x2B => Some(DataType::Int32),
            0x30 => Some(DataType::Enum8),
            0x31 => Some(DataType::Enum16),
            0x41 => Some(DataType::OctetString),
            0x42 => Some(DataType::CharacterString),
            0xE2 => Some(DataType::UtcTime),
            0xF0 => Some(DataType::IeeeAddress),
            _ => None,
        }
    }

    /// Wire width in bytes; `None` for length-prefixed types
    #[must_use]
    pub fn width(self) -> Option<usize> {
        match self {
            DataType::Boolean
            | DataType::Bitmap8
            | DataType::Uint8
            | DataType::Int8
            | DataType::Enum8 => Some(1),
            DataType::Bitmap16 | DataType::Uint16 | DataType::Int16 | DataType::Enum16 => Some(2),
            DataType::Uint24 | DataType::Int24 => Some(3),
            DataType::Uint32 | DataType::Int32 | DataType::UtcTime => Some(4),
            DataType::Uint40 => Some(5),
            DataType::Uint48 => Some(6),
            DataType::IeeeAddress => Some(8),
            DataType::OctetString | DataType::CharacterString => None,
        }
    }

    /// All-1s sentinel for the unsigned widths ("not populated" on many attributes)
    ///
    /// Whether the sentinel means "absent" is an attribute-level decision made
    /// by the caller, never by the codec.
    #[must_use]
    pub fn unsigned_sentinel(self) -> Option<u64> {
        match self {
            DataType::Uint8 | DataType::Bitmap8 | DataType::Enum8 => Some(0xFF),
            DataType::Uint16 | DataType::Bitmap16 | DataType::Enum16 => Some(0xFFFF),
            DataType::Uint24 => Some(0x00FF_FFFF),
            DataType::Uint32 | DataType::UtcTime => Some(0xFFFF_FFFF),
            DataType::Uint40 => Some(0x00FF_FFFF_FFFF),
            DataType::Uint48 => Some(0xFFFF_FFFF_FFFF),
            _ => None,
        }
    }
}

/// A decoded ZCL scalar value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZclValue {
    Boolean(bool),
    Bitmap8(u8),
    Bitmap16(u16),
    Uint8(u8),
    Uint16(u16),
    Uint24(u32),
    Uint32(u32),
    Uint40(u64),
    Uint48(u64),
    Int8(i8),
    Int16(i16),
    Int24(i32),
    Int32(i32),
    Enum8(u8),
    Enum16(u16),
    OctetString(Vec<u8>),
    CharacterString(String),
    UtcTime(u32),
    IeeeAddress([u8; 8]),
}

fn uint_le(data: &[u8]) -> u64 {
    data.iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (8 * i)))
}

fn push_uint_le(out: &mut Vec<u8>, value: u64, width: usize) {
    for i in 0..width {
        out.push(((value >> (8 * i)) & 0xFF) as u8);
    }
}

/// Sign-extend a little-endian `width`-byte value
fn int_le(data: &[u8], width: usize) -> i64 {
    let raw = uint_le(data);
    let shift = 64 - 8 * width as u32;
    ((raw << shift) as i64) >> shift
}

impl ZclValue {
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            ZclValue::Boolean(_) => DataType::Boolean,
            ZclValue::Bitmap8(_) => DataType::Bitmap8,
            ZclValue::Bitmap16(_) => DataType::Bitmap16,
            ZclValue::Uint8(_) => DataType::Uint8,
            ZclValue::Uint16(_) => DataType::Uint16,
            ZclValue::Uint24(_) => DataType::Uint24,
            ZclValue::Uint32(_) => DataType::Uint32,
            ZclValue::Uint40(_) => DataType::Uint40,
            ZclValue::Uint48(_) => DataType::Uint48,
            ZclValue::Int8(_) => DataType::Int8,
            ZclValue::Int16(_) => DataType::Int16,
            ZclValue::Int24(_) => DataType::Int24,
            ZclValue::Int32(_) => DataType::Int32,
            ZclValue::Enum8(_) => DataType::Enum8,
            ZclValue::Enum16(_) => DataType::Enum16,
            ZclValue::OctetString(_) => DataType::OctetString,
            ZclValue::CharacterString(_) => DataType::CharacterString,
            ZclValue::UtcTime(_) => DataType::UtcTime,
            ZclValue::IeeeAddress(_) => DataType::IeeeAddress,
        }
    }

    /// Unsigned view of the integer-like variants
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            ZclValue::Bitmap8(v) | ZclValue::Uint8(v) | ZclValue::Enum8(v) => Some(u64::from(v)),
            ZclValue::Bitmap16(v) | ZclValue::Uint16(v) | ZclValue::Enum16(v) => {
                Some(u64::from(v))
            }
            ZclValue::Uint24(v) | ZclValue::Uint32(v) | ZclValue::UtcTime(v) => Some(u64::from(v)),
            ZclValue::Uint40(v) | ZclValue::Uint48(v) => Some(v),
            ZclValue::Boolean(v) => Some(u64::from(v)),
            _ => None,
        }
    }

    /// Signed view of the signed integer variants
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ZclValue::Int8(v) => Some(i64::from(v)),
            ZclValue::Int16(v) => Some(i64::from(v)),
            ZclValue::Int24(v) | ZclValue::Int32(v) => Some(i64::from(v)),
            _ => None,
        }
    }

    /// Append the wire encoding of this value
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            ZclValue::Boolean(v) => out.push(u8::from(*v)),
            ZclValue::Bitmap8(v) | ZclValue::Uint8(v) | ZclValue::Enum8(v) => out.push(*v),
            ZclValue::Bitmap16(v) | ZclValue::Uint16(v) | ZclValue::Enum16(v) => {
                out.extend_from_slice(&v.to_le_bytes());
            }
            ZclValue::Uint24(v) => push_uint_le(out, u64::from(*v), 3),
            ZclValue::Uint32(v) | ZclValue::UtcTime(v) => out.extend_from_slice(&v.to_le_bytes()),
            ZclValue::Uint40(v) => push_uint_le(out, *v, 5),
            ZclValue::Uint48(v) => push_uint_le(out, *v, 6),
            ZclValue::Int8(v) => out.push(*v as u8),
            ZclValue::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
            ZclValue::Int24(v) => push_uint_le(out, *v as u64, 3),
            ZclValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
            ZclValue::OctetString(v) => {
                out.push(v.len().min(0xFF) as u8);
                out.extend_from_slice(&v[..v.len().min(0xFF)]);
            }
            ZclValue::CharacterString(v) => {
                let bytes = v.as_bytes();
                out.push(bytes.len().min(0xFF) as u8);
                out.extend_from_slice(&bytes[..bytes.len().min(0xFF)]);
            }
            ZclValue::IeeeAddress(v) => out.extend_from_slice(v),
        }
    }

    /// Decode a value of the given type, returning the value and bytes consumed
    pub fn decode(data_type: DataType, data: &[u8]) -> Result<(Self, usize), ZclError> {
        if let Some(width) = data_type.width() {
            if data.len() < width {
                return Err(ZclError::FrameTooShort(data.len()));
            }
            let value = match data_type {
                DataType::Boolean => ZclValue::Boolean(data[0] != 0),
                DataType::Bitmap8 => ZclValue::Bitmap8(data[0]),
                DataType::Bitmap16 => ZclValue::Bitmap16(uint_le(&data[..2]) as u16),
                DataType::Uint8 => ZclValue::Uint8(data[0]),
                DataType::Uint16 => ZclValue::Uint16(uint_le(&data[..2]) as u16),
                DataType::Uint24 => ZclValue::Uint24(uint_le(&data[..3]) as u32),
                DataType::Uint32 => ZclValue::Uint32(uint_le(&data[..4]) as u32),
                DataType::Uint40 => ZclValue::Uint40(uint_le(&data[..5])),
                DataType::Uint48 => ZclValue::Uint48(uint_le(&data[..6])),
                DataType::Int8 => ZclValue::Int8(data[0] as i8),
                DataType::Int16 => ZclValue::Int16(int_le(&data[..2], 2) as i16),
                DataType::Int24 => ZclValue::Int24(int_le(&data[..3], 3) as i32),
                DataType::Int32 => ZclValue::Int32(int_le(&data[..4], 4) as i32),
                DataType::Enum8 => ZclValue::Enum8(data[0]),
                DataType::Enum16 => ZclValue::Enum16(uint_le(&data[..2]) as u16),
                DataType::UtcTime => ZclValue::UtcTime(uint_le(&data[..4]) as u32),
                DataType::IeeeAddress => {
                    let mut addr = [0u8; 8];
                    addr.copy_from_slice(&data[..8]);
                    ZclValue::IeeeAddress(addr)
                }
                DataType::OctetString | DataType::CharacterString => unreachable!(),
            };
            return Ok((value, width));
        }

        // Length-prefixed string types
        if data.is_empty() {
            return Err(ZclError::FrameTooShort(0));
        }
        let len = data[0] as usize;
        if data.len() < 1 + len {
            return Err(ZclError::FrameTooShort(data.len()));
        }
        let bytes = data[1..1 + len].to_vec();
        let value = match data_type {
            DataType::OctetString => ZclValue::OctetString(bytes),
            DataType::CharacterString => ZclValue::CharacterString(
                String::from_utf8(bytes)
                    .map_err(|e| ZclError::Malformed(format!("invalid UTF-8 string: {e}")))?,
            ),
            _ => unreachable!(),
        };
        Ok((value, 1 + len))
    }
}
