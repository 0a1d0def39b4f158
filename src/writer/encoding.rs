//! Transfer type selection
//!
//! Order of preference for a plane:
//!
//! 1. an explicit `FORMAT` property naming a wire type
//! 2. time-location units: `timeN` in ASCII, `double` in binary
//! 3. nominal units: integer fields
//! 4. the precision the values actually need
//!
//! The precision estimate looks for the coarsest decimal grid the values sit
//! on: the fewest fraction digits at which every value is integral, and the
//! GCD of the scaled consecutive differences as the grid step. Data that is
//! integral gets an integer field instead of a floating one.

use tracing::{trace, warn};

use crate::config::FormatterConfig;
use crate::types::ascii::scientific_width;
use crate::types::properties::{self, PropertyValue};
use crate::types::{DataSet, TransferType, Units};

/// Largest integer magnitude an `f64` carries exactly.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Significant digits beyond which a fixed-point field no longer round-trips.
const MAX_SIGNIFICANT_DIGITS: usize = 15;

/// Decimal grid of a set of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Precision {
    pub fraction_digits: usize,
    /// Smallest spacing of the grid, from the GCD of consecutive differences
    pub step: f64,
    /// Digits left of the decimal point of the largest magnitude
    pub integer_digits: usize,
    pub negative: bool,
}

impl Precision {
    /// Bytes a fixed-point rendering needs, without the separator.
    pub fn content_width(&self) -> usize {
        let fraction = if self.fraction_digits > 0 { self.fraction_digits + 1 } else { 0 };
        usize::from(self.negative) + self.integer_digits + fraction
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Estimate the decimal grid of the finite `values`, up to `max_fraction_digits`.
///
/// Returns `None` when there are no finite values or the values need more
/// digits than allowed.
pub fn estimate_precision(values: &[f64], max_fraction_digits: usize) -> Option<Precision> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let max_abs = finite.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));

    for digits in 0..=max_fraction_digits {
        let scale = 10f64.powi(digits as i32);
        if max_abs * scale >= EXACT_INTEGER_LIMIT {
            return None;
        }
        let on_grid = finite.iter().all(|v| {
            let scaled = v * scale;
            (scaled - scaled.round()).abs() <= 1e-9 * scaled.abs().max(1.0)
        });
        if !on_grid {
            continue;
        }

        let scaled: Vec<i64> = finite.iter().map(|v| (v * scale).round() as i64).collect();
        let step = scaled
            .windows(2)
            .map(|pair| pair[1].abs_diff(pair[0]))
            .filter(|d| *d != 0)
            .fold(0u64, gcd);
        let step = if step == 0 { scaled[0].unsigned_abs().max(1) } else { step };

        // measure the rendered text so rounding carries are accounted for
        let mut integer_digits = 1;
        let mut negative = false;
        for value in &finite {
            let text = format!("{:.*}", digits, value);
            negative |= text.starts_with('-');
            let whole = text.trim_start_matches('-').split('.').next().unwrap_or("");
            integer_digits = integer_digits.max(whole.len());
        }
        return Some(Precision {
            fraction_digits: digits,
            step: step as f64 / scale,
            integer_digits,
            negative,
        });
    }
    None
}

/// Text field wide enough for the non-finite values present.
fn non_finite_width(values: &[f64]) -> usize {
    values
        .iter()
        .filter(|v| !v.is_finite())
        .map(|v| if v.is_nan() { 3 } else if *v > 0.0 { 8 } else { 9 })
        .max()
        .unwrap_or(0)
}

/// ASCII field for plain numeric values.
pub fn ascii_for_values(values: &[f64], config: &FormatterConfig) -> TransferType {
    let scientific = TransferType::ascii(scientific_width(config.ascii_significant_digits));
    let Some(precision) = estimate_precision(values, config.max_fraction_digits) else {
        return scientific;
    };
    trace!(?precision, "estimated value grid");
    let width = precision.content_width().max(non_finite_width(values)) + 1;
    if precision.integer_digits + precision.fraction_digits > MAX_SIGNIFICANT_DIGITS
        || width > scientific.size_bytes()
    {
        return scientific;
    }
    if precision.fraction_digits == 0 {
        TransferType::ascii_integer(width.max(TransferType::MIN_TEXT_WIDTH))
    } else {
        TransferType::ascii_fixed(width, precision.fraction_digits as u8)
    }
}

/// Binary field for plain numeric values: an integer type when every value
/// is exactly an integer that fits, `double` otherwise.
pub fn binary_for_values(values: &[f64], config: &FormatterConfig) -> TransferType {
    let order = config.byte_order;
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return TransferType::Double(order);
    }
    if values.iter().any(|v| v.fract() != 0.0) {
        return TransferType::Double(order);
    }
    let (min, max) =
        values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if min >= f64::from(i16::MIN) && max <= f64::from(i16::MAX) {
        TransferType::Int2(order)
    } else if min >= f64::from(i32::MIN) && max <= f64::from(i32::MAX) {
        TransferType::Int4(order)
    } else {
        TransferType::Double(order)
    }
}

/// Transfer type for the values of `data_set`.
pub fn choose_transfer_type(data_set: &DataSet, config: &FormatterConfig) -> TransferType {
    let units = data_set.units();

    if let Some(hint) = data_set.property(properties::FORMAT).and_then(PropertyValue::as_str) {
        match TransferType::from_name(hint.trim(), config.byte_order, &units) {
            Ok(tt) => return tt,
            Err(err) => warn!(format = hint, error = %err, "ignoring unusable FORMAT hint"),
        }
    }

    let values = data_set.flat_values();
    match &units {
        Units::Time(base) => {
            if config.ascii {
                TransferType::time(config.time_fraction_digits, *base)
            } else {
                TransferType::Double(config.byte_order)
            }
        }
        Units::Nominal(_) => {
            if config.ascii {
                let precision = estimate_precision(&values, 0);
                let width = precision
                    .map_or(2, |p| p.content_width() + 1)
                    .max(TransferType::MIN_TEXT_WIDTH);
                TransferType::ascii_integer(width)
            } else {
                TransferType::Int4(config.byte_order)
            }
        }
        _ if config.ascii => ascii_for_values(&values, config),
        _ => binary_for_values(&values, config),
    }
}
