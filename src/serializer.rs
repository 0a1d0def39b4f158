//! Property serialization registry
//!
//! Property values other than dataset references travel as
//! `<property name="K" type="TYPE" value="V"/>`. The registry maps each
//! `TYPE` to a [`PropertySerializer`] that formats and parses the value text.
//! Embedding applications can register their own serializers; the registry is
//! built once and shared by `Arc` between writer and reader.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::types::{PropertyValue, Units};
use crate::{QStreamError, Result};

/// Converts one kind of property value to and from its wire text.
pub trait PropertySerializer: Send + Sync {
    /// Value of the `type` attribute this serializer handles.
    fn type_id(&self) -> &str;

    /// Whether this serializer can format `value`.
    fn accepts(&self, value: &PropertyValue) -> bool;

    fn format(&self, value: &PropertyValue) -> Result<String>;

    fn parse(&self, text: &str) -> Result<PropertyValue>;
}

/// Lookup table of property serializers.
#[derive(Clone)]
pub struct SerializerRegistry {
    by_type: HashMap<String, Arc<dyn PropertySerializer>>,
    // registration order decides which serializer formats a value
    order: Vec<Arc<dyn PropertySerializer>>,
}

impl SerializerRegistry {
    /// Registry with no serializers at all.
    pub fn empty() -> Self {
        Self { by_type: HashMap::new(), order: Vec::new() }
    }

    /// Registry with the built-in `String`, `double`, `int`, `Boolean`,
    /// `units` and `doubleArray` serializers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StringSerializer));
        registry.register(Arc::new(DoubleSerializer));
        registry.register(Arc::new(IntSerializer));
        registry.register(Arc::new(BooleanSerializer));
        registry.register(Arc::new(UnitsSerializer));
        registry.register(Arc::new(DoubleArraySerializer));
        registry
    }

    /// Add or replace the serializer for its type id.
    pub fn register(&mut self, serializer: Arc<dyn PropertySerializer>) {
        let type_id = serializer.type_id().to_string();
        self.order.retain(|s| s.type_id() != type_id);
        self.order.push(Arc::clone(&serializer));
        self.by_type.insert(type_id, serializer);
    }

    pub fn get(&self, type_id: &str) -> Option<&Arc<dyn PropertySerializer>> {
        self.by_type.get(type_id)
    }

    /// Type id used on the wire for `value`, if any serializer accepts it.
    pub fn type_id_of(&self, value: &PropertyValue) -> Option<&str> {
        self.order.iter().find(|s| s.accepts(value)).map(|s| s.type_id())
    }

    /// Format `value` as `(type id, text)`, or `None` when no serializer accepts it.
    pub fn format(&self, value: &PropertyValue) -> Result<Option<(String, String)>> {
        match self.order.iter().find(|s| s.accepts(value)) {
            Some(serializer) => {
                Ok(Some((serializer.type_id().to_string(), serializer.format(value)?)))
            }
            None => Ok(None),
        }
    }

    /// Parse `text` as `type_id`, or `None` when the type is not registered.
    pub fn parse(&self, type_id: &str, text: &str) -> Result<Option<PropertyValue>> {
        match self.get(type_id) {
            Some(serializer) => serializer.parse(text).map(Some),
            None => Ok(None),
        }
    }

    pub fn type_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(|s| s.type_id())
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("types", &self.type_ids().collect::<Vec<_>>())
            .finish()
    }
}

fn mismatch(type_id: &str, value: &PropertyValue) -> QStreamError {
    QStreamError::parse(format!("{} property", type_id), format!("cannot format {:?}", value))
}

fn format_double(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        value.to_string()
    }
}

fn parse_double(type_id: &str, text: &str) -> Result<f64> {
    match text.trim() {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        other => other.parse().map_err(|e| {
            QStreamError::parse(format!("{} property", type_id), format!("'{}': {}", text, e))
        }),
    }
}

struct StringSerializer;

impl PropertySerializer for StringSerializer {
    fn type_id(&self) -> &str {
        "String"
    }

    fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(value, PropertyValue::String(_))
    }

    fn format(&self, value: &PropertyValue) -> Result<String> {
        value.as_str().map(str::to_string).ok_or_else(|| mismatch(self.type_id(), value))
    }

    fn parse(&self, text: &str) -> Result<PropertyValue> {
        Ok(PropertyValue::String(text.to_string()))
    }
}

struct DoubleSerializer;

impl PropertySerializer for DoubleSerializer {
    fn type_id(&self) -> &str {
        "double"
    }

    fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(value, PropertyValue::Double(_))
    }

    fn format(&self, value: &PropertyValue) -> Result<String> {
        match value {
            PropertyValue::Double(v) => Ok(format_double(*v)),
            _ => Err(mismatch(self.type_id(), value)),
        }
    }

    fn parse(&self, text: &str) -> Result<PropertyValue> {
        parse_double(self.type_id(), text).map(PropertyValue::Double)
    }
}

struct IntSerializer;

impl PropertySerializer for IntSerializer {
    fn type_id(&self) -> &str {
        "int"
    }

    fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(value, PropertyValue::Int(_))
    }

    fn format(&self, value: &PropertyValue) -> Result<String> {
        match value {
            PropertyValue::Int(v) => Ok(v.to_string()),
            _ => Err(mismatch(self.type_id(), value)),
        }
    }

    fn parse(&self, text: &str) -> Result<PropertyValue> {
        text.trim()
            .parse()
            .map(PropertyValue::Int)
            .map_err(|e| QStreamError::parse("int property", format!("'{}': {}", text, e)))
    }
}

struct BooleanSerializer;

impl PropertySerializer for BooleanSerializer {
    fn type_id(&self) -> &str {
        "Boolean"
    }

    fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(value, PropertyValue::Bool(_))
    }

    fn format(&self, value: &PropertyValue) -> Result<String> {
        match value {
            PropertyValue::Bool(v) => Ok(v.to_string()),
            _ => Err(mismatch(self.type_id(), value)),
        }
    }

    fn parse(&self, text: &str) -> Result<PropertyValue> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(PropertyValue::Bool(true)),
            "false" => Ok(PropertyValue::Bool(false)),
            _ => Err(QStreamError::parse(
                "Boolean property",
                format!("'{}' is not true or false", text),
            )),
        }
    }
}

struct UnitsSerializer;

impl PropertySerializer for UnitsSerializer {
    fn type_id(&self) -> &str {
        "units"
    }

    fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(value, PropertyValue::Units(_))
    }

    fn format(&self, value: &PropertyValue) -> Result<String> {
        value.as_units().map(Units::to_string).ok_or_else(|| mismatch(self.type_id(), value))
    }

    fn parse(&self, text: &str) -> Result<PropertyValue> {
        Ok(PropertyValue::Units(Units::parse(text)))
    }
}

struct DoubleArraySerializer;

impl PropertySerializer for DoubleArraySerializer {
    fn type_id(&self) -> &str {
        "doubleArray"
    }

    fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(value, PropertyValue::DoubleArray(_))
    }

    fn format(&self, value: &PropertyValue) -> Result<String> {
        match value {
            PropertyValue::DoubleArray(values) => {
                Ok(values.iter().map(|v| format_double(*v)).collect::<Vec<_>>().join(","))
            }
            _ => Err(mismatch(self.type_id(), value)),
        }
    }

    fn parse(&self, text: &str) -> Result<PropertyValue> {
        if text.trim().is_empty() {
            return Ok(PropertyValue::DoubleArray(Vec::new()));
        }
        text.split(',')
            .map(|part| parse_double(self.type_id(), part))
            .collect::<Result<Vec<_>>>()
            .map(PropertyValue::DoubleArray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeBase;

    #[test]
    fn defaults_round_trip_their_values() {
        let registry = SerializerRegistry::with_defaults();
        let values = [
            PropertyValue::from("Magnetic field"),
            PropertyValue::Double(-1.0e31),
            PropertyValue::Int(42),
            PropertyValue::Bool(true),
            PropertyValue::Units(Units::Time(TimeBase::Us2000)),
            PropertyValue::DoubleArray(vec![0.5, 1.5, f64::INFINITY]),
        ];
        for value in values {
            let (type_id, text) = registry.format(&value).unwrap().expect("serializer");
            let back = registry.parse(&type_id, &text).unwrap().expect("parsed");
            assert_eq!(back, value, "{type_id}: {text}");
        }
    }

    #[test]
    fn unknown_types_are_not_errors() {
        let registry = SerializerRegistry::with_defaults();
        assert_eq!(registry.parse("datum", "5 Hz").unwrap(), None);
        let map = PropertyValue::Map(Default::default());
        assert_eq!(registry.format(&map).unwrap(), None);
        assert_eq!(registry.type_id_of(&map), None);
    }

    #[test]
    fn malformed_text_is_a_parse_error() {
        let registry = SerializerRegistry::with_defaults();
        assert!(registry.parse("int", "4.5").is_err());
        assert!(registry.parse("Boolean", "yes").is_err());
        assert!(registry.parse("doubleArray", "1,,2").is_err());
    }

    struct UpperCase;

    impl PropertySerializer for UpperCase {
        fn type_id(&self) -> &str {
            "String"
        }

        fn accepts(&self, value: &PropertyValue) -> bool {
            matches!(value, PropertyValue::String(_))
        }

        fn format(&self, value: &PropertyValue) -> Result<String> {
            Ok(value.as_str().unwrap_or_default().to_uppercase())
        }

        fn parse(&self, text: &str) -> Result<PropertyValue> {
            Ok(PropertyValue::String(text.to_lowercase()))
        }
    }

    #[test]
    fn registering_replaces_existing_type() {
        let mut registry = SerializerRegistry::with_defaults();
        registry.register(Arc::new(UpperCase));
        assert_eq!(registry.type_ids().filter(|t| *t == "String").count(), 1);
        let (_, text) = registry.format(&PropertyValue::from("abc")).unwrap().unwrap();
        assert_eq!(text, "ABC");
    }
}
