//! Dataset property values and well-known property names

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{DataSet, Units};

/// Property map of a dataset or plane, ordered by name.
pub type Properties = BTreeMap<String, PropertyValue>;

pub const NAME: &str = "NAME";
pub const LABEL: &str = "LABEL";
pub const TITLE: &str = "TITLE";
pub const UNITS: &str = "UNITS";
/// Explicit encoding hint: a transfer type wire name such as `ascii10`
pub const FORMAT: &str = "FORMAT";
pub const FILL_VALUE: &str = "FILL_VALUE";
pub const VALID_MIN: &str = "VALID_MIN";
pub const VALID_MAX: &str = "VALID_MAX";
pub const CADENCE: &str = "CADENCE";

pub const DEPEND_0: &str = "DEPEND_0";
pub const DEPEND_1: &str = "DEPEND_1";
pub const DEPEND_2: &str = "DEPEND_2";
pub const DEPEND_3: &str = "DEPEND_3";
pub const BUNDLE_1: &str = "BUNDLE_1";
pub const PLANE_0: &str = "PLANE_0";
pub const DELTA_PLUS: &str = "DELTA_PLUS";
pub const DELTA_MINUS: &str = "DELTA_MINUS";
pub const BIN_PLUS: &str = "BIN_PLUS";
pub const BIN_MINUS: &str = "BIN_MINUS";
pub const BIN_MIN: &str = "BIN_MIN";
pub const BIN_MAX: &str = "BIN_MAX";

/// Coordinate properties, indexed by the dimension they describe.
pub const DEPEND: [&str; 4] = [DEPEND_0, DEPEND_1, DEPEND_2, DEPEND_3];

/// Companion planes that share the record axis of the dataset they annotate.
pub const AUXILIARY: [&str; 7] =
    [PLANE_0, DELTA_PLUS, DELTA_MINUS, BIN_PLUS, BIN_MINUS, BIN_MIN, BIN_MAX];

/// Index of the dimension a `DEPEND_n` property describes.
pub fn depend_index(name: &str) -> Option<usize> {
    DEPEND.iter().position(|d| *d == name)
}

/// Whether `name` links to another dataset on the stream.
pub fn is_reference_property(name: &str) -> bool {
    depend_index(name).is_some() || AUXILIARY.contains(&name) || name == BUNDLE_1
}

/// One property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Double(f64),
    Int(i64),
    Bool(bool),
    Units(Units),
    DoubleArray(Vec<f64>),
    /// A linked dataset, written on the stream under its own name
    DataSet(Arc<DataSet>),
    /// Column descriptions of a bundle
    Bundle(Arc<BundleDescriptor>),
    /// Nested property map
    Map(Properties),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_units(&self) -> Option<&Units> {
        match self {
            PropertyValue::Units(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_data_set(&self) -> Option<&Arc<DataSet>> {
        match self {
            PropertyValue::DataSet(ds) => Some(ds),
            _ => None,
        }
    }

    pub fn as_bundle(&self) -> Option<&Arc<BundleDescriptor>> {
        match self {
            PropertyValue::Bundle(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<Units> for PropertyValue {
    fn from(value: Units) -> Self {
        PropertyValue::Units(value)
    }
}

impl From<DataSet> for PropertyValue {
    fn from(value: DataSet) -> Self {
        PropertyValue::DataSet(Arc::new(value))
    }
}

impl From<Arc<DataSet>> for PropertyValue {
    fn from(value: Arc<DataSet>) -> Self {
        PropertyValue::DataSet(value)
    }
}

/// Describes the columns of a bundle: one property map per member.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BundleDescriptor {
    pub members: Vec<Properties>,
}

impl BundleDescriptor {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Name of member `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.members.get(index)?.get(NAME)?.as_str()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        (0..self.members.len()).find(|&i| self.name(i) == Some(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.members.len()).filter_map(|i| self.name(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_properties_are_recognised() {
        assert_eq!(depend_index("DEPEND_2"), Some(2));
        assert_eq!(depend_index("DEPEND_9"), None);
        assert!(is_reference_property(BIN_MAX));
        assert!(is_reference_property(BUNDLE_1));
        assert!(!is_reference_property(UNITS));
    }

    #[test]
    fn bundle_members_look_up_by_name() {
        let member = |name: &str| Properties::from([(NAME.to_string(), PropertyValue::from(name))]);
        let bundle = BundleDescriptor { members: vec![member("A"), member("B"), member("C")] };
        assert_eq!(bundle.index_of("B"), Some(1));
        assert_eq!(bundle.names().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(bundle.name(3), None);
    }
}
