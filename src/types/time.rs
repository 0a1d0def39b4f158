//! Calendar conversions for `timeN` fields
//!
//! Timestamps are split into whole seconds since 1970-01-01T00:00Z plus a
//! fractional second in `[0, 1)`, so fraction digits are rendered without
//! drifting through a large epoch offset.

use super::TimeBase;
use crate::{QStreamError, Result};

/// Maximum number of fractional-second digits a time field carries.
pub const MAX_FRACTION_DIGITS: u8 = 12;

/// Width of a time field without a fraction: `YYYY-MM-DDTHH:MM:SS` plus separator.
const BASE_WIDTH: usize = 20;

/// Field width in bytes for a given number of fraction digits.
pub const fn field_width(fraction_digits: u8) -> usize {
    if fraction_digits == 0 { BASE_WIDTH } else { BASE_WIDTH + 1 + fraction_digits as usize }
}

/// Fraction digits implied by a field width, if the width is valid.
pub fn fraction_digits_for_width(width: usize) -> Option<u8> {
    match width {
        BASE_WIDTH => Some(0),
        w if w > BASE_WIDTH + 1 && w <= field_width(MAX_FRACTION_DIGITS) => {
            Some((w - BASE_WIDTH - 1) as u8)
        }
        _ => None,
    }
}

/// Split a value in `base` units into (seconds since 1970, fractional second).
pub fn split_seconds(value: f64, base: TimeBase) -> Option<(i64, f64)> {
    if !value.is_finite() {
        return None;
    }
    let (whole, frac) = match base {
        TimeBase::T1970 | TimeBase::T2000 => {
            let whole = value.floor();
            (whole, value - whole)
        }
        TimeBase::Ms1970 | TimeBase::Us2000 => {
            let ticks = base.ticks_per_second();
            let whole = (value / ticks).floor();
            (whole, (value - whole * ticks) / ticks)
        }
        TimeBase::Mj1958 => {
            let seconds = value * 86_400.0;
            let whole = seconds.floor();
            (whole, seconds - whole)
        }
    };
    if whole.abs() > 1.0e13 {
        return None;
    }
    let mut secs = whole as i64 + base.epoch_offset_seconds();
    let mut frac = frac;
    if frac >= 1.0 {
        secs += 1;
        frac -= 1.0;
    }
    if frac < 0.0 {
        secs -= 1;
        frac += 1.0;
    }
    Some((secs, frac))
}

/// Join seconds since 1970 and a fractional second into a value in `base` units.
pub fn join_seconds(secs: i64, frac: f64, base: TimeBase) -> f64 {
    let since_epoch = secs - base.epoch_offset_seconds();
    match base {
        TimeBase::T1970 | TimeBase::T2000 => since_epoch as f64 + frac,
        TimeBase::Ms1970 | TimeBase::Us2000 => {
            let ticks = base.ticks_per_second();
            since_epoch as f64 * ticks + frac * ticks
        }
        TimeBase::Mj1958 => (since_epoch as f64 + frac) / 86_400.0,
    }
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
pub fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Proleptic Gregorian (year, month, day) for days since 1970-01-01.
pub fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        _ => 28,
    }
}

/// Render a timestamp with `digits` fraction digits, without the separator.
///
/// Returns `None` when the value is not finite or falls outside years 0..=9999.
pub fn format_iso(value: f64, base: TimeBase, digits: u8) -> Option<String> {
    let (mut secs, frac) = split_seconds(value, base)?;
    let digits = digits.min(MAX_FRACTION_DIGITS);
    let scale = 10u64.pow(digits as u32);
    let mut fraction = (frac * scale as f64).round() as u64;
    if fraction >= scale {
        secs += 1;
        fraction -= scale;
    }

    let days = secs.div_euclid(86_400);
    let second_of_day = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    if !(0..=9999).contains(&year) {
        return None;
    }

    let hour = second_of_day / 3600;
    let minute = (second_of_day % 3600) / 60;
    let second = second_of_day % 60;
    let mut text = format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        year, month, day, hour, minute, second
    );
    if digits > 0 {
        text.push('.');
        text.push_str(&format!("{:0width$}", fraction, width = digits as usize));
    }
    Some(text)
}

/// Parse an ISO-8601 timestamp into a value in `base` units.
///
/// Accepts calendar (`YYYY-MM-DD`) and ordinal (`YYYY-DDD`) dates, a `T` or
/// space separator, optional minutes/seconds, any number of fraction digits
/// and an optional trailing `Z`.
pub fn parse_iso(text: &str, base: TimeBase) -> Result<f64> {
    let field = text.trim();
    let fail = |details: &str| QStreamError::time_format(field, details);

    let body = field.strip_suffix('Z').unwrap_or(field);
    let (date, clock) = match body.find(['T', ' ']) {
        Some(pos) => (&body[..pos], &body[pos + 1..]),
        None => (body, ""),
    };

    let mut date_parts = date.split('-');
    let year = parse_number(date_parts.next(), 4, 4).ok_or_else(|| fail("bad year"))? as i64;
    let second_part = date_parts.next().ok_or_else(|| fail("missing month or day of year"))?;
    let days = match date_parts.next() {
        Some(day_text) => {
            let month = parse_number(Some(second_part), 2, 2).ok_or_else(|| fail("bad month"))?;
            let day = parse_number(Some(day_text), 2, 2).ok_or_else(|| fail("bad day"))?;
            let month_ok = (1..=12).contains(&month);
            if !month_ok || day == 0 || day > days_in_month(year, month as u32) as u64 {
                return Err(fail("date out of range"));
            }
            days_from_civil(year, month as u32, day as u32)
        }
        None => {
            let doy = parse_number(Some(second_part), 3, 3).ok_or_else(|| fail("bad day of year"))?;
            let year_days = if is_leap_year(year) { 366 } else { 365 };
            if doy == 0 || doy > year_days {
                return Err(fail("day of year out of range"));
            }
            days_from_civil(year, 1, 1) + doy as i64 - 1
        }
    };
    if date_parts.next().is_some() {
        return Err(fail("trailing date components"));
    }

    let (mut hour, mut minute, mut second, mut frac) = (0u64, 0u64, 0u64, 0.0f64);
    if !clock.is_empty() {
        let (hms, fraction) = match clock.split_once('.') {
            Some((hms, fraction)) => (hms, Some(fraction)),
            None => (clock, None),
        };
        let mut parts = hms.split(':');
        hour = parse_number(parts.next(), 2, 2).ok_or_else(|| fail("bad hour"))?;
        if let Some(text) = parts.next() {
            minute = parse_number(Some(text), 2, 2).ok_or_else(|| fail("bad minute"))?;
        }
        if let Some(text) = parts.next() {
            second = parse_number(Some(text), 2, 2).ok_or_else(|| fail("bad second"))?;
        }
        if parts.next().is_some() {
            return Err(fail("trailing clock components"));
        }
        if hour > 24 || minute > 59 || second > 60 {
            return Err(fail("clock out of range"));
        }
        if let Some(fraction) = fraction {
            if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return Err(fail("bad fractional seconds"));
            }
            frac = format!("0.{}", fraction)
                .parse::<f64>()
                .map_err(|_| fail("bad fractional seconds"))?;
        }
    }

    let secs = days * 86_400 + (hour * 3600 + minute * 60 + second) as i64;
    Ok(join_seconds(secs, frac, base))
}

fn parse_number(text: Option<&str>, min_len: usize, max_len: usize) -> Option<u64> {
    let text = text?;
    if text.len() < min_len || text.len() > max_len || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn civil_conversion_known_dates() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2000, 1, 1), 10_957);
        assert_eq!(days_from_civil(1958, 1, 1), -4383);
        assert_eq!(civil_from_days(10_957), (2000, 1, 1));
        assert_eq!(civil_from_days(days_from_civil(2024, 2, 29)), (2024, 2, 29));
    }

    #[test]
    fn widths_follow_fraction_digits() {
        assert_eq!(field_width(0), 20);
        assert_eq!(field_width(3), 24);
        assert_eq!(field_width(12), 33);
        assert_eq!(fraction_digits_for_width(24), Some(3));
        assert_eq!(fraction_digits_for_width(20), Some(0));
        assert_eq!(fraction_digits_for_width(21), None);
        assert_eq!(fraction_digits_for_width(34), None);
    }

    #[test]
    fn format_epochs() {
        let millis = format_iso(0.0, TimeBase::Us2000, 3);
        assert_eq!(millis.as_deref(), Some("2000-01-01T00:00:00.000"));
        assert_eq!(format_iso(0.0, TimeBase::T1970, 0).as_deref(), Some("1970-01-01T00:00:00"));
        assert_eq!(format_iso(0.0, TimeBase::Mj1958, 0).as_deref(), Some("1958-01-01T00:00:00"));
        assert_eq!(
            format_iso(-0.5, TimeBase::T2000, 1).as_deref(),
            Some("1999-12-31T23:59:59.5")
        );
    }

    #[test]
    fn fraction_rounding_carries_into_seconds() {
        assert_eq!(
            format_iso(59.9996, TimeBase::T2000, 3).as_deref(),
            Some("2000-01-01T00:01:00.000")
        );
    }

    #[test]
    fn parse_accepts_ordinal_dates_and_zulu() {
        let calendar = parse_iso("2000-02-01T12:00:00.250Z", TimeBase::T2000).unwrap();
        let ordinal = parse_iso("2000-032T12:00:00.250", TimeBase::T2000).unwrap();
        assert_eq!(calendar, ordinal);
        assert_eq!(calendar, 31.0 * 86_400.0 + 43_200.25);
    }

    #[test]
    fn parse_rejects_garbage() {
        let garbage = [
            "",
            "2000",
            "2000-13-01T00:00:00",
            "2000-02-30T00:00:00",
            "2000-01-01T0a:00",
            "****",
        ];
        for bad in garbage {
            let err = parse_iso(bad, TimeBase::Us2000).unwrap_err();
            assert!(matches!(err, QStreamError::TimeFormat { .. }), "{bad}: {err}");
        }
    }

    proptest! {
        #[test]
        fn civil_round_trip(days in -800_000i64..2_900_000i64) {
            let (y, m, d) = civil_from_days(days);
            prop_assert_eq!(days_from_civil(y, m, d), days);
        }

        #[test]
        fn iso_round_trip_within_precision(
            seconds in -3.0e9f64..3.0e9f64,
            digits in 0u8..=6u8,
        ) {
            let text = format_iso(seconds, TimeBase::T2000, digits).unwrap();
            let back = parse_iso(&text, TimeBase::T2000).unwrap();
            let tolerance = 0.5 * 10f64.powi(-(digits as i32)) + 1.0e-6;
            prop_assert!(
                (back - seconds).abs() <= tolerance,
                "{} -> {} -> {}",
                seconds,
                text,
                back
            );
        }
    }
}
