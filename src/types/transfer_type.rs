//! Per-field transfer types
//!
//! A [`TransferType`] converts one `f64` to and from a fixed number of wire
//! bytes. The set of types is closed; its identity on the wire is the name
//! returned by [`TransferType::name`] plus the stream's byte order for the
//! binary types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ascii::{self, AsciiStyle};
use super::time;
use super::{TimeBase, Units};
use crate::{QStreamError, Result};

/// Byte order of binary fields, declared once per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    BigEndian,
    #[default]
    LittleEndian,
}

impl ByteOrder {
    pub const fn wire_name(&self) -> &'static str {
        match self {
            ByteOrder::BigEndian => "big_endian",
            ByteOrder::LittleEndian => "little_endian",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "big_endian" => Some(ByteOrder::BigEndian),
            "little_endian" => Some(ByteOrder::LittleEndian),
            _ => None,
        }
    }

    /// Byte order of the running machine.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") { ByteOrder::BigEndian } else { ByteOrder::LittleEndian }
    }
}

/// Encoding of a single element of a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    /// 8-byte IEEE754
    Double(ByteOrder),
    /// 4-byte IEEE754
    Float(ByteOrder),
    /// 8-byte two's complement
    Int8(ByteOrder),
    /// 4-byte two's complement
    Int4(ByteOrder),
    /// 2-byte two's complement
    Int2(ByteOrder),
    /// `asciiN`: decimal text right-aligned in N-1 bytes plus a separator
    Ascii { width: usize, style: AsciiStyle },
    /// `hexN`: `0x`-prefixed hex text right-aligned in N-1 bytes plus a separator
    Hex { width: usize },
    /// `timeN`: ISO-8601 timestamp in the plane's time-location units
    Time { digits: u8, base: TimeBase },
}

impl TransferType {
    /// Smallest usable ASCII or hex width: one content byte and the separator.
    pub const MIN_TEXT_WIDTH: usize = 2;

    pub fn ascii(width: usize) -> Self {
        TransferType::Ascii { width, style: AsciiStyle::Scientific }
    }

    pub fn ascii_fixed(width: usize, fraction_digits: u8) -> Self {
        TransferType::Ascii { width, style: AsciiStyle::Fixed(fraction_digits) }
    }

    pub fn ascii_integer(width: usize) -> Self {
        TransferType::Ascii { width, style: AsciiStyle::Integer }
    }

    /// A time field carrying `digits` fraction digits, clamped to the maximum.
    pub fn time(digits: u8, base: TimeBase) -> Self {
        TransferType::Time { digits: digits.min(time::MAX_FRACTION_DIGITS), base }
    }

    /// Number of bytes one element occupies on the wire.
    pub const fn size_bytes(&self) -> usize {
        match self {
            TransferType::Double(_) | TransferType::Int8(_) => 8,
            TransferType::Float(_) | TransferType::Int4(_) => 4,
            TransferType::Int2(_) => 2,
            TransferType::Ascii { width, .. } | TransferType::Hex { width } => *width,
            TransferType::Time { digits, .. } => time::field_width(*digits),
        }
    }

    /// Whether records of this type are newline terminated text.
    pub const fn is_ascii(&self) -> bool {
        matches!(
            self,
            TransferType::Ascii { .. } | TransferType::Hex { .. } | TransferType::Time { .. }
        )
    }

    pub const fn byte_order(&self) -> Option<ByteOrder> {
        match self {
            TransferType::Double(order)
            | TransferType::Float(order)
            | TransferType::Int8(order)
            | TransferType::Int4(order)
            | TransferType::Int2(order) => Some(*order),
            _ => None,
        }
    }

    /// Wire name of this type (`double`, `ascii10`, `time24`, ...).
    pub fn name(&self) -> String {
        match self {
            TransferType::Double(_) => "double".to_string(),
            TransferType::Float(_) => "float".to_string(),
            TransferType::Int8(_) => "int8".to_string(),
            TransferType::Int4(_) => "int4".to_string(),
            TransferType::Int2(_) => "int2".to_string(),
            TransferType::Ascii { width, .. } => format!("ascii{}", width),
            TransferType::Hex { width } => format!("hex{}", width),
            TransferType::Time { digits, .. } => format!("time{}", time::field_width(*digits)),
        }
    }

    /// Resolve a wire name. `units` supplies the time base of `timeN` fields.
    pub fn from_name(name: &str, byte_order: ByteOrder, units: &Units) -> Result<Self> {
        let unsupported = || QStreamError::UnsupportedEncoding { encoding: name.to_string() };
        match name {
            "double" => return Ok(TransferType::Double(byte_order)),
            "float" => return Ok(TransferType::Float(byte_order)),
            "int8" => return Ok(TransferType::Int8(byte_order)),
            "int4" => return Ok(TransferType::Int4(byte_order)),
            "int2" => return Ok(TransferType::Int2(byte_order)),
            _ => {}
        }

        let split = name.find(|c: char| c.is_ascii_digit()).ok_or_else(unsupported)?;
        let (prefix, digits) = name.split_at(split);
        let width: usize = digits.parse().map_err(|_| unsupported())?;
        match prefix {
            "ascii" if width >= Self::MIN_TEXT_WIDTH => Ok(TransferType::ascii(width)),
            "asciiInteger" if width >= Self::MIN_TEXT_WIDTH => {
                Ok(TransferType::ascii_integer(width))
            }
            "hex" if width >= Self::MIN_TEXT_WIDTH => Ok(TransferType::Hex { width }),
            "time" => {
                let digits = time::fraction_digits_for_width(width).ok_or_else(unsupported)?;
                let base = units.time_base().unwrap_or(TimeBase::Us2000);
                Ok(TransferType::Time { digits, base })
            }
            _ => Err(unsupported()),
        }
    }

    /// Encode `value` into exactly `size_bytes()` bytes at the start of `buf`.
    pub fn write(&self, value: f64, buf: &mut [u8]) -> Result<()> {
        let size = self.size_bytes();
        let available = buf.len();
        let out = buf.get_mut(..size).ok_or_else(|| {
            QStreamError::buffer(format!("writing {}", self.name()), size, available)
        })?;

        match *self {
            TransferType::Double(order) => {
                put(out, order, value.to_be_bytes(), value.to_le_bytes())
            }
            TransferType::Float(order) => {
                let narrowed = value as f32;
                put(out, order, narrowed.to_be_bytes(), narrowed.to_le_bytes())
            }
            TransferType::Int8(order) => {
                let int = round_saturating(value, i64::MIN as f64, i64::MAX as f64) as i64;
                put(out, order, int.to_be_bytes(), int.to_le_bytes())
            }
            TransferType::Int4(order) => {
                let int = round_saturating(value, i32::MIN as f64, i32::MAX as f64) as i32;
                put(out, order, int.to_be_bytes(), int.to_le_bytes())
            }
            TransferType::Int2(order) => {
                let int = round_saturating(value, i16::MIN as f64, i16::MAX as f64) as i16;
                put(out, order, int.to_be_bytes(), int.to_le_bytes())
            }
            TransferType::Ascii { style, .. } => ascii::write_field(value, style, out),
            TransferType::Hex { .. } => ascii::write_hex_field(value, out),
            TransferType::Time { digits, base } => match time::format_iso(value, base, digits) {
                Some(text) if text.len() < size => {
                    out[..text.len()].copy_from_slice(text.as_bytes());
                    out[text.len()..].fill(ascii::FIELD_SEPARATOR);
                }
                _ => out.fill(ascii::OVERFLOW_FILL),
            },
        }
        Ok(())
    }

    /// Decode one element from the start of `buf`.
    ///
    /// Malformed ASCII and hex fields decode to `NaN`; a malformed time field
    /// is a [`QStreamError::TimeFormat`] error.
    pub fn read(&self, buf: &[u8]) -> Result<f64> {
        let size = self.size_bytes();
        let bytes = buf.get(..size).ok_or_else(|| {
            QStreamError::buffer(format!("reading {}", self.name()), size, buf.len())
        })?;

        let value = match *self {
            TransferType::Double(order) => {
                let raw: [u8; 8] = fixed(bytes);
                match order {
                    ByteOrder::BigEndian => f64::from_be_bytes(raw),
                    ByteOrder::LittleEndian => f64::from_le_bytes(raw),
                }
            }
            TransferType::Float(order) => {
                let raw: [u8; 4] = fixed(bytes);
                f64::from(match order {
                    ByteOrder::BigEndian => f32::from_be_bytes(raw),
                    ByteOrder::LittleEndian => f32::from_le_bytes(raw),
                })
            }
            TransferType::Int8(order) => {
                let raw: [u8; 8] = fixed(bytes);
                (match order {
                    ByteOrder::BigEndian => i64::from_be_bytes(raw),
                    ByteOrder::LittleEndian => i64::from_le_bytes(raw),
                }) as f64
            }
            TransferType::Int4(order) => {
                let raw: [u8; 4] = fixed(bytes);
                f64::from(match order {
                    ByteOrder::BigEndian => i32::from_be_bytes(raw),
                    ByteOrder::LittleEndian => i32::from_le_bytes(raw),
                })
            }
            TransferType::Int2(order) => {
                let raw: [u8; 2] = fixed(bytes);
                f64::from(match order {
                    ByteOrder::BigEndian => i16::from_be_bytes(raw),
                    ByteOrder::LittleEndian => i16::from_le_bytes(raw),
                })
            }
            TransferType::Ascii { .. } => ascii::parse_field(bytes),
            TransferType::Hex { .. } => ascii::parse_hex_field(bytes),
            TransferType::Time { base, .. } => {
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    QStreamError::time_format(String::from_utf8_lossy(bytes), "not UTF-8")
                })?;
                let trimmed = text.trim();
                // an unrepresentable time was written as fill
                if !trimmed.is_empty() && trimmed.bytes().all(|b| b == ascii::OVERFLOW_FILL) {
                    f64::NAN
                } else {
                    time::parse_iso(trimmed, base)?
                }
            }
        };
        Ok(value)
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn put<const N: usize>(out: &mut [u8], order: ByteOrder, be: [u8; N], le: [u8; N]) {
    match order {
        ByteOrder::BigEndian => out.copy_from_slice(&be),
        ByteOrder::LittleEndian => out.copy_from_slice(&le),
    }
}

// Callers have already checked the slice length against size_bytes().
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[..N]);
    raw
}

fn round_saturating(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.round().clamp(min, max)
}
