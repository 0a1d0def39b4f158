//! Fixed-width ASCII rendering for `asciiN` and `hexN` fields
//!
//! A field of width N holds N-1 right-aligned content bytes followed by one
//! separator byte. Content that does not fit is replaced by N `*` bytes so a
//! bad value can never shift the framing of the bytes after it.

use serde::{Deserialize, Serialize};

/// Fill byte used when a value does not fit its field.
pub const OVERFLOW_FILL: u8 = b'*';

/// Separator written in the last byte of every ASCII field.
pub const FIELD_SEPARATOR: u8 = b' ';

/// Rendering style of an `asciiN` field. The style never travels on the wire;
/// every style reads back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsciiStyle {
    /// `-d.ddde+XX` with as many fraction digits as the width allows
    Scientific,
    /// Fixed-point with this many fraction digits
    Fixed(u8),
    /// Integer rendering (the asciiInteger codec)
    Integer,
}

/// Fraction digits a scientific field of `width` bytes can carry.
pub const fn scientific_fraction_digits(width: usize) -> usize {
    // sign, lead digit, point, 'e', exponent sign, two exponent digits
    (width.saturating_sub(1)).saturating_sub(7)
}

/// Width of a scientific field carrying `significant` digits.
pub const fn scientific_width(significant: usize) -> usize {
    let fraction = if significant > 1 { significant - 1 } else { 0 };
    fraction + 7 + 1
}

/// Render `value` into exactly `width` bytes of `out`.
pub fn write_field(value: f64, style: AsciiStyle, out: &mut [u8]) {
    let width = out.len();
    if width == 0 {
        return;
    }
    let content = render(value, style, width - 1);
    match content {
        Some(text) => {
            let pad = width - 1 - text.len();
            out[..pad].fill(b' ');
            out[pad..width - 1].copy_from_slice(text.as_bytes());
            out[width - 1] = FIELD_SEPARATOR;
        }
        None => out.fill(OVERFLOW_FILL),
    }
}

fn render(value: f64, style: AsciiStyle, content_width: usize) -> Option<String> {
    if value.is_nan() {
        return fit("NaN".to_string(), content_width);
    }
    if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        return fit(text.to_string(), content_width);
    }
    match style {
        AsciiStyle::Scientific => {
            let mut digits = scientific_fraction_digits(content_width + 1);
            loop {
                let text = format_scientific(value, digits);
                if text.len() <= content_width {
                    return Some(text);
                }
                if digits == 0 {
                    return None;
                }
                digits -= 1;
            }
        }
        AsciiStyle::Fixed(digits) => fit(format!("{:.*}", digits as usize, value), content_width),
        AsciiStyle::Integer => fit(format!("{:.0}", value.round()), content_width),
    }
}

fn fit(text: String, content_width: usize) -> Option<String> {
    (text.len() <= content_width).then_some(text)
}

/// Scientific notation with a signed, at least two digit exponent.
pub fn format_scientific(value: f64, fraction_digits: usize) -> String {
    let raw = format!("{:.*e}", fraction_digits, value);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw,
    }
}

/// Render an integer as hex into exactly `out.len()` bytes.
pub fn write_hex_field(value: f64, out: &mut [u8]) {
    let width = out.len();
    if width == 0 {
        return;
    }
    let text = if value.is_finite() && value.abs() < 1.8e19 {
        let rounded = value.round();
        let magnitude = rounded.abs() as u64;
        let sign = if rounded < 0.0 { "-" } else { "" };
        Some(format!("{}0x{:x}", sign, magnitude))
    } else {
        None
    };
    match text.and_then(|t| fit(t, width - 1)) {
        Some(text) => {
            let pad = width - 1 - text.len();
            out[..pad].fill(b' ');
            out[pad..width - 1].copy_from_slice(text.as_bytes());
            out[width - 1] = FIELD_SEPARATOR;
        }
        None => out.fill(OVERFLOW_FILL),
    }
}

/// Parse a decimal field. Malformed content yields `NaN`.
pub fn parse_field(bytes: &[u8]) -> f64 {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return f64::NAN;
    };
    let text = text.trim();
    match text {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => text.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Parse a hex field with optional sign and optional `0x` prefix. Malformed
/// content yields `NaN`.
pub fn parse_hex_field(bytes: &[u8]) -> f64 {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return f64::NAN;
    };
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")).unwrap_or(body);
    match u64::from_str_radix(digits, 16) {
        Ok(magnitude) if !digits.is_empty() => {
            let value = magnitude as f64;
            if negative { -value } else { value }
        }
        _ => f64::NAN,
    }
}
