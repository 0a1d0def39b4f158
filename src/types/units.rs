//! Units tags carried by planes and datasets

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Epoch and tick size of a time-location unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBase {
    /// Microseconds since 2000-01-01T00:00Z
    Us2000,
    /// Seconds since 2000-01-01T00:00Z
    T2000,
    /// Seconds since 1970-01-01T00:00Z
    T1970,
    /// Milliseconds since 1970-01-01T00:00Z
    Ms1970,
    /// Days since 1958-01-01T00:00Z
    Mj1958,
}

impl TimeBase {
    /// Wire identifier of this time base.
    pub const fn id(&self) -> &'static str {
        match self {
            TimeBase::Us2000 => "us2000",
            TimeBase::T2000 => "t2000",
            TimeBase::T1970 => "t1970",
            TimeBase::Ms1970 => "ms1970",
            TimeBase::Mj1958 => "mj1958",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "us2000" => Some(TimeBase::Us2000),
            "t2000" => Some(TimeBase::T2000),
            "t1970" => Some(TimeBase::T1970),
            "ms1970" => Some(TimeBase::Ms1970),
            "mj1958" => Some(TimeBase::Mj1958),
            _ => None,
        }
    }

    /// Number of ticks of this unit in one second.
    pub const fn ticks_per_second(&self) -> f64 {
        match self {
            TimeBase::Us2000 => 1.0e6,
            TimeBase::T2000 | TimeBase::T1970 => 1.0,
            TimeBase::Ms1970 => 1.0e3,
            TimeBase::Mj1958 => 1.0 / 86_400.0,
        }
    }

    /// Offset of this unit's epoch from 1970-01-01T00:00Z, in seconds.
    pub const fn epoch_offset_seconds(&self) -> i64 {
        match self {
            TimeBase::Us2000 | TimeBase::T2000 => 946_684_800,
            TimeBase::T1970 | TimeBase::Ms1970 => 0,
            TimeBase::Mj1958 => -378_691_200,
        }
    }
}

/// One labelled ordinal of an enumeration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationLabel {
    pub label: String,
    /// Display colour as 0xRRGGBB
    pub color: Option<u32>,
}

/// Nominal (categorical) units: integer ordinals mapped to labels.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnumerationUnits {
    pub id: String,
    pub labels: BTreeMap<i64, EnumerationLabel>,
}

impl EnumerationUnits {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), labels: BTreeMap::new() }
    }

    /// Builder-style label registration.
    pub fn with_label(
        mut self,
        ordinal: i64,
        label: impl Into<String>,
        color: Option<u32>,
    ) -> Self {
        self.insert(ordinal, label, color);
        self
    }

    pub fn insert(&mut self, ordinal: i64, label: impl Into<String>, color: Option<u32>) {
        self.labels.insert(ordinal, EnumerationLabel { label: label.into(), color });
    }

    pub fn label(&self, ordinal: i64) -> Option<&EnumerationLabel> {
        self.labels.get(&ordinal)
    }

    /// Ordinal assigned to `label`, if any.
    pub fn ordinal_of(&self, label: &str) -> Option<i64> {
        self.labels.iter().find(|(_, l)| l.label == label).map(|(ordinal, _)| *ordinal)
    }
}

/// Units of the values in a plane.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Units {
    #[default]
    Dimensionless,
    /// Time-location values measured from an epoch
    Time(TimeBase),
    /// Categorical values; ordinals index the label table
    Nominal(Arc<EnumerationUnits>),
    /// Any other unit, kept as its display string ("Hz", "nT", ...)
    Named(String),
}

impl Units {
    /// Parse a wire units string.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Units::Dimensionless;
        }
        if let Some(base) = TimeBase::from_id(text) {
            return Units::Time(base);
        }
        if let Some(id) = text.strip_prefix("nominal:") {
            return Units::Nominal(Arc::new(EnumerationUnits::new(id)));
        }
        Units::Named(text.to_string())
    }

    pub fn is_time_location(&self) -> bool {
        matches!(self, Units::Time(_))
    }

    pub fn is_nominal(&self) -> bool {
        matches!(self, Units::Nominal(_))
    }

    pub fn time_base(&self) -> Option<TimeBase> {
        match self {
            Units::Time(base) => Some(*base),
            _ => None,
        }
    }

    pub fn enumeration(&self) -> Option<&EnumerationUnits> {
        match self {
            Units::Nominal(units) => Some(units),
            _ => None,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::Dimensionless => Ok(()),
            Units::Time(base) => f.write_str(base.id()),
            Units::Nominal(units) => write!(f, "nominal:{}", units.id),
            Units::Named(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_wire_strings_parse_back() {
        for text in ["", "us2000", "t2000", "t1970", "ms1970", "mj1958", "nominal:quality", "nT"] {
            assert_eq!(Units::parse(text).to_string(), text);
        }
    }

    #[test]
    fn nominal_units_parse_to_empty_table() {
        let units = Units::parse("nominal:flags");
        let table = units.enumeration().expect("nominal units");
        assert_eq!(table.id, "flags");
        assert!(table.labels.is_empty());
    }

    #[test]
    fn enumeration_labels_look_up_both_ways() {
        let units = EnumerationUnits::new("mode")
            .with_label(0, "survey", Some(0x00ff00))
            .with_label(3, "burst", None);
        assert_eq!(units.label(0).map(|l| l.label.as_str()), Some("survey"));
        assert_eq!(units.ordinal_of("burst"), Some(3));
        assert_eq!(units.ordinal_of("idle"), None);
    }
}
