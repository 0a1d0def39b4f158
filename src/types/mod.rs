//! Core types for stream data representation.
//!
//! This module provides the value-level building blocks shared by the writer
//! and the reader: the transfer-type codecs that move one `f64` to and from
//! the wire, the units tags that select them, and the minimal in-memory
//! dataset the stream carries.
//!
//! ## Architecture
//!
//! - [`TransferType`] is the closed set of per-field codecs (`double`, `float`,
//!   `int8`, `int4`, `int2`, `asciiN`, `hexN`, `timeN`)
//! - [`Units`] tags planes as dimensionless, time locations, nominal or named
//! - [`DataSet`] is a qube of values or a join of slices, with a property map
//!   linking coordinates, error bars and bundle columns
//!
//! ## Usage Example
//!
//! ```rust
//! use qstream::types::{ByteOrder, TransferType, Units};
//!
//! let units = Units::Dimensionless;
//! let codec = TransferType::from_name("int2", ByteOrder::BigEndian, &units).unwrap();
//! let mut buf = [0u8; 2];
//! codec.write(258.0, &mut buf).unwrap();
//! assert_eq!(buf, [0x01, 0x02]);
//! assert_eq!(codec.read(&buf).unwrap(), 258.0);
//!
//! let ascii = TransferType::ascii_fixed(6, 2);
//! let mut field = [0u8; 6];
//! ascii.write(123456.0, &mut field).unwrap();
//! assert_eq!(&field, b"******");
//! ```

pub mod ascii;
mod dataset;
pub mod properties;
pub mod time;
mod transfer_type;
mod units;

// Re-export all public types
pub use ascii::AsciiStyle;
pub use dataset::{DataSet, Storage};
pub use properties::{BundleDescriptor, Properties, PropertyValue};
pub use transfer_type::{ByteOrder, TransferType};
pub use units::{EnumerationLabel, EnumerationUnits, TimeBase, Units};

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn round_trip(tt: TransferType, value: f64) -> f64 {
        let mut buf = vec![0u8; tt.size_bytes()];
        tt.write(value, &mut buf).unwrap();
        tt.read(&buf).unwrap()
    }

    // Property test strategies
    prop_compose! {
        fn arb_byte_order()(big in any::<bool>()) -> ByteOrder {
            if big { ByteOrder::BigEndian } else { ByteOrder::LittleEndian }
        }
    }

    prop_compose! {
        fn arb_time_base()(base in prop::sample::select(vec![
            TimeBase::Us2000, TimeBase::T2000, TimeBase::T1970, TimeBase::Ms1970,
        ])) -> TimeBase {
            base
        }
    }

    proptest! {
        #[test]
        fn prop_double_round_trip_is_exact(value in any::<f64>(), order in arb_byte_order()) {
            let back = round_trip(TransferType::Double(order), value);
            if value.is_nan() {
                prop_assert!(back.is_nan());
            } else {
                prop_assert_eq!(back, value);
            }
        }

        #[test]
        fn prop_float_round_trip_matches_f32(value in any::<f32>(), order in arb_byte_order()) {
            let back = round_trip(TransferType::Float(order), f64::from(value));
            if value.is_nan() {
                prop_assert!(back.is_nan());
            } else {
                prop_assert_eq!(back, f64::from(value));
            }
        }

        #[test]
        fn prop_integer_round_trips_are_exact(
            v2 in any::<i16>(),
            v4 in any::<i32>(),
            v8 in -(1i64 << 53)..(1i64 << 53),
            order in arb_byte_order(),
        ) {
            prop_assert_eq!(round_trip(TransferType::Int2(order), f64::from(v2)), f64::from(v2));
            prop_assert_eq!(round_trip(TransferType::Int4(order), f64::from(v4)), f64::from(v4));
            prop_assert_eq!(round_trip(TransferType::Int8(order), v8 as f64), v8 as f64);
        }

        #[test]
        fn prop_ascii_scientific_keeps_significant_digits(
            value in -1.0e200f64..1.0e200f64,
            width in 10usize..24usize,
        ) {
            let tt = TransferType::ascii(width);
            let back = round_trip(tt, value);
            let digits = ascii::scientific_fraction_digits(width) as i32;
            // a three digit exponent costs one fraction digit
            let tolerance = value.abs() * 10f64.powi(1 - digits) + f64::MIN_POSITIVE;
            prop_assert!((back - value).abs() <= tolerance, "{} -> {}", value, back);
        }

        #[test]
        fn prop_ascii_field_is_always_exactly_width(
            value in any::<f64>(),
            width in 2usize..16usize,
            fraction in 0u8..6u8,
        ) {
            let codecs = [
                TransferType::ascii(width),
                TransferType::ascii_fixed(width, fraction),
                TransferType::ascii_integer(width),
            ];
            for tt in codecs {
                let mut buf = vec![0u8; width + 3];
                tt.write(value, &mut buf).unwrap();
                let field = &buf[..width];
                let overflowed = field.iter().all(|&b| b == b'*');
                prop_assert!(overflowed || field[width - 1] == b' ');
                prop_assert!(buf[width..].iter().all(|&b| b == 0));
            }
        }

        #[test]
        fn prop_hex_round_trip(value in -(1i64 << 40)..(1i64 << 40)) {
            let back = round_trip(TransferType::Hex { width: 16 }, value as f64);
            prop_assert_eq!(back, value as f64);
        }

        #[test]
        fn prop_time_round_trip_within_precision(
            seconds in -2.0e9f64..2.0e9f64,
            digits in 0u8..=6u8,
            base in arb_time_base(),
        ) {
            let value = seconds * base.ticks_per_second();
            let tt = TransferType::time(digits, base);
            let back = round_trip(tt, value);
            let tolerance = (0.5 * 10f64.powi(-(digits as i32)) + 1.0e-6) * base.ticks_per_second();
            prop_assert!((back - value).abs() <= tolerance, "{} -> {}", value, back);
        }
    }

    #[test]
    fn transfer_type_names_round_trip() {
        let order = ByteOrder::LittleEndian;
        let units = Units::Time(TimeBase::Us2000);
        for tt in [
            TransferType::Double(order),
            TransferType::Int4(order),
            TransferType::ascii(12),
            TransferType::Hex { width: 8 },
            TransferType::time(3, TimeBase::Us2000),
            TransferType::time(0, TimeBase::Us2000),
        ] {
            let parsed = TransferType::from_name(&tt.name(), order, &units).unwrap();
            assert_eq!(parsed.size_bytes(), tt.size_bytes());
            assert_eq!(parsed.name(), tt.name());
        }
    }

    #[test]
    fn ascii_integer_renders_whole_numbers() {
        let tt = TransferType::ascii_integer(6);
        let mut buf = [0u8; 6];
        tt.write(42.4, &mut buf).unwrap();
        assert_eq!(&buf, b"   42 ");
        assert_eq!(tt.name(), "ascii6");
    }
}
