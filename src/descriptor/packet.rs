//! Packet and plane descriptors
//!
//! ```xml
//! <packet streamRank="0">
//!   <qdataset id="time" rank="1">
//!     <properties>
//!       <property name="UNITS" type="units" value="us2000"/>
//!     </properties>
//!     <values encoding="time24" length="5"/>
//!   </qdataset>
//! </packet>
//! ```
//!
//! A plane is one of four kinds: encoded values carried in the data frames,
//! inline values carried in the descriptor itself, a bundle of other planes,
//! or the list of children of a join.

use std::collections::BTreeMap;
use tracing::warn;

use super::xml::Element;
use super::{format_number, parse_number};
use crate::serializer::SerializerRegistry;
use crate::types::properties::{self, Properties};
use crate::types::{ByteOrder, PropertyValue, TransferType, Units};
use crate::{QStreamError, Result};

/// Largest data frame a packet may declare.
pub const MAX_PACKET_BYTES: usize = 1 << 28;

const QDATASET_TYPE: &str = "qdataset";
const MAP_TYPE: &str = "map";

/// What a plane carries.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaneContent {
    /// Values carried in every data frame with this encoding
    Encoded(TransferType),
    /// Values carried in the descriptor (`<values values="..."/>`)
    Inline(Vec<f64>),
    /// Member plane names of a bundle
    Bundle(Vec<String>),
    /// Names of the children of a join
    Join(Vec<String>),
}

/// One plane property: a value, or the name of another dataset on the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyEntry {
    Value(PropertyValue),
    Reference(String),
}

impl PropertyEntry {
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            PropertyEntry::Reference(name) => Some(name),
            PropertyEntry::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&PropertyValue> {
        match self {
            PropertyEntry::Value(value) => Some(value),
            PropertyEntry::Reference(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaneDescriptor {
    pub name: String,
    /// Declared rank of the dataset this plane belongs to
    pub rank: usize,
    /// Extents per packet; empty for one value per record
    pub qube: Vec<usize>,
    pub content: PlaneContent,
    pub properties: BTreeMap<String, PropertyEntry>,
}

impl PlaneDescriptor {
    pub fn encoded(
        name: impl Into<String>,
        rank: usize,
        qube: Vec<usize>,
        transfer_type: TransferType,
    ) -> Self {
        Self {
            name: name.into(),
            rank,
            qube,
            content: PlaneContent::Encoded(transfer_type),
            properties: BTreeMap::new(),
        }
    }

    /// Rank-1 plane whose values travel in the descriptor.
    pub fn inline(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            rank: 1,
            qube: vec![values.len()],
            content: PlaneContent::Inline(values),
            properties: BTreeMap::new(),
        }
    }

    pub fn bundle(name: impl Into<String>, rank: usize, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            rank,
            qube: Vec::new(),
            content: PlaneContent::Bundle(members),
            properties: BTreeMap::new(),
        }
    }

    pub fn join(name: impl Into<String>, rank: usize, children: Vec<String>) -> Self {
        Self {
            name: name.into(),
            rank,
            qube: Vec::new(),
            content: PlaneContent::Join(children),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.to_string(), PropertyEntry::Value(value.into()));
        self
    }

    pub fn with_reference(mut self, name: &str, target: impl Into<String>) -> Self {
        self.properties.insert(name.to_string(), PropertyEntry::Reference(target.into()));
        self
    }

    /// Number of values this plane holds per packet, saturating on overflow.
    pub fn element_count(&self) -> usize {
        self.checked_element_count().unwrap_or(usize::MAX)
    }

    /// Bytes this plane occupies in every data frame, saturating on overflow.
    pub fn size_bytes(&self) -> usize {
        self.checked_size_bytes().unwrap_or(usize::MAX)
    }

    fn checked_element_count(&self) -> Option<usize> {
        self.qube.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
    }

    fn checked_size_bytes(&self) -> Option<usize> {
        match &self.content {
            PlaneContent::Encoded(tt) => self.checked_element_count()?.checked_mul(tt.size_bytes()),
            _ => Some(0),
        }
    }

    pub fn transfer_type(&self) -> Option<TransferType> {
        match self.content {
            PlaneContent::Encoded(tt) => Some(tt),
            _ => None,
        }
    }

    pub fn units(&self) -> Units {
        self.properties
            .get(properties::UNITS)
            .and_then(PropertyEntry::as_value)
            .and_then(PropertyValue::as_units)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of other datasets this plane refers to.
    pub fn references(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.properties
            .iter()
            .filter_map(|(k, v)| v.as_reference().map(|target| (k.as_str(), target)))
    }

    fn to_element(&self, serializers: &SerializerRegistry) -> Result<Element> {
        let mut element = Element::new("qdataset")
            .with_attribute("id", self.name.as_str())
            .with_attribute("rank", self.rank.to_string());

        if !self.properties.is_empty() {
            let mut props = Element::new("properties");
            for (name, entry) in &self.properties {
                let property = match entry {
                    PropertyEntry::Reference(target) => Some(
                        Element::new("property")
                            .with_attribute("name", name.as_str())
                            .with_attribute("type", QDATASET_TYPE)
                            .with_attribute("value", target.as_str()),
                    ),
                    PropertyEntry::Value(value) => value_element(name, value, serializers)?,
                };
                if let Some(property) = property {
                    props.children.push(property);
                }
            }
            element.children.push(props);
        }

        let qube = self.qube.iter().map(usize::to_string).collect::<Vec<_>>().join(",");
        let content = match &self.content {
            PlaneContent::Encoded(tt) => Element::new("values")
                .with_attribute("encoding", tt.name())
                .with_attribute("length", qube),
            PlaneContent::Inline(values) => Element::new("values")
                .with_attribute(
                    "values",
                    values.iter().map(|v| format_number(*v)).collect::<Vec<_>>().join(","),
                )
                .with_attribute("length", qube),
            PlaneContent::Bundle(members) => {
                Element::new("bundle").with_attribute("ids", members.join(","))
            }
            PlaneContent::Join(children) => {
                Element::new("join").with_attribute("children", children.join(","))
            }
        };
        element.children.push(content);
        Ok(element)
    }

    fn from_element(
        element: &Element,
        byte_order: ByteOrder,
        serializers: &SerializerRegistry,
    ) -> Result<Self> {
        let name = element.required("id")?.to_string();
        let rank = element
            .required("rank")?
            .trim()
            .parse::<usize>()
            .map_err(|e| {
                QStreamError::descriptor(None, format!("plane '{}' has a bad rank: {}", name, e))
            })?;

        let mut props = BTreeMap::new();
        if let Some(list) = element.child("properties") {
            for property in list.children_named("property") {
                let key = property.required("name")?;
                if let Some(entry) = parse_property(property, serializers)? {
                    props.insert(key.to_string(), entry);
                }
            }
        }

        let (qube, content) = if let Some(values) = element.child("values") {
            let qube = parse_dims(values.attribute("length").unwrap_or(""), &name)?;
            match values.attribute("encoding") {
                Some(encoding) => {
                    let units = props
                        .get(properties::UNITS)
                        .and_then(PropertyEntry::as_value)
                        .and_then(PropertyValue::as_units)
                        .cloned()
                        .unwrap_or_default();
                    // the record size is unknown without a codec, so the packet cannot be skipped
                    let tt = TransferType::from_name(encoding, byte_order, &units).inspect_err(|e| {
                        warn!(plane = %name, encoding, error = %e, "no codec for plane encoding")
                    })?;
                    (qube, PlaneContent::Encoded(tt))
                }
                None => {
                    let text = values.required("values")?;
                    let parsed = parse_list(text)
                        .map(|part| parse_number(part, &name))
                        .collect::<Result<Vec<_>>>()?;
                    (qube, PlaneContent::Inline(parsed))
                }
            }
        } else if let Some(bundle) = element.child("bundle") {
            let ids = bundle.required("ids")?;
            (Vec::new(), PlaneContent::Bundle(parse_list(ids).map(str::to_string).collect()))
        } else if let Some(join) = element.child("join") {
            let children = join.required("children")?;
            (Vec::new(), PlaneContent::Join(parse_list(children).map(str::to_string).collect()))
        } else {
            return Err(QStreamError::descriptor(
                None,
                format!("plane '{}' has no <values>, <bundle> or <join> element", name),
            ));
        };

        let plane = Self { name, rank, qube, content, properties: props };
        plane.validate()?;
        Ok(plane)
    }

    fn validate(&self) -> Result<()> {
        if self.checked_size_bytes().is_none() {
            return Err(QStreamError::descriptor(
                None,
                format!("plane '{}' declares length {:?}, which overflows", self.name, self.qube),
            ));
        }
        if let PlaneContent::Inline(values) = &self.content {
            if values.len() != self.element_count() {
                return Err(QStreamError::descriptor(
                    None,
                    format!(
                        "plane '{}' declares length {:?} but carries {} values",
                        self.name,
                        self.qube,
                        values.len()
                    ),
                ));
            }
        }
        if self.name.is_empty() {
            return Err(QStreamError::descriptor(None, "plane has an empty id"));
        }
        Ok(())
    }
}

/// One packet shape: an ordered list of planes.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDescriptor {
    pub planes: Vec<PlaneDescriptor>,
    /// 1 when each data frame is one record, 0 for a one-shot packet
    pub stream_rank: usize,
}

impl PacketDescriptor {
    /// Packet repeated once per record.
    pub fn new(planes: Vec<PlaneDescriptor>) -> Self {
        Self { planes, stream_rank: 1 }
    }

    /// Packet sent once, carrying whole arrays.
    pub fn one_shot(planes: Vec<PlaneDescriptor>) -> Self {
        Self { planes, stream_rank: 0 }
    }

    pub fn is_stream(&self) -> bool {
        self.stream_rank > 0
    }

    /// Bytes in one data frame of this packet.
    pub fn size_bytes(&self) -> usize {
        self.planes.iter().fold(0usize, |acc, plane| acc.saturating_add(plane.size_bytes()))
    }

    pub fn plane(&self, name: &str) -> Option<&PlaneDescriptor> {
        self.planes.iter().find(|p| p.name == name)
    }

    /// Whether data frames are text records terminated by a newline.
    pub fn is_ascii(&self) -> bool {
        self.planes
            .iter()
            .rev()
            .find(|p| p.size_bytes() > 0)
            .and_then(PlaneDescriptor::transfer_type)
            .is_some_and(|tt| tt.is_ascii())
    }

    /// Plane names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.planes.iter().map(|p| p.name.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_rank > 1 {
            return Err(QStreamError::descriptor(
                None,
                format!("unsupported streamRank {}", self.stream_rank),
            ));
        }
        for plane in &self.planes {
            plane.validate()?;
            if let PlaneContent::Encoded(_) = plane.content {
                let slice_rank = plane.qube.len() + self.stream_rank;
                if plane.rank < slice_rank || plane.rank > slice_rank + 1 {
                    return Err(QStreamError::descriptor(
                        None,
                        format!(
                            "plane '{}' declares rank {} but carries rank {} slices",
                            plane.name, plane.rank, slice_rank
                        ),
                    ));
                }
            }
        }
        let size = self.size_bytes();
        if size > MAX_PACKET_BYTES {
            return Err(QStreamError::descriptor(
                None,
                format!("packet of {} bytes exceeds the {} byte limit", size, MAX_PACKET_BYTES),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = self.planes.iter().find(|p| !seen.insert(p.name.as_str())) {
            return Err(QStreamError::descriptor(
                None,
                format!("plane '{}' appears twice", duplicate.name),
            ));
        }
        Ok(())
    }

    pub fn to_element(&self, serializers: &SerializerRegistry) -> Result<Element> {
        let mut element = Element::new("packet");
        if self.stream_rank != 1 {
            element = element.with_attribute("streamRank", self.stream_rank.to_string());
        }
        for plane in &self.planes {
            element.children.push(plane.to_element(serializers)?);
        }
        Ok(element)
    }

    pub fn from_element(
        element: &Element,
        byte_order: ByteOrder,
        serializers: &SerializerRegistry,
    ) -> Result<Self> {
        let stream_rank = match element.attribute("streamRank") {
            Some(text) => text
                .trim()
                .parse()
                .map_err(|e| {
                    QStreamError::descriptor(None, format!("bad streamRank '{}': {}", text, e))
                })?,
            None => 1,
        };
        let planes = element
            .children_named("qdataset")
            .map(|plane| PlaneDescriptor::from_element(plane, byte_order, serializers))
            .collect::<Result<Vec<_>>>()?;
        if planes.is_empty() {
            return Err(QStreamError::descriptor(None, "<packet> declares no planes"));
        }
        let packet = Self { planes, stream_rank };
        packet.validate()?;
        Ok(packet)
    }
}

fn value_element(
    name: &str,
    value: &PropertyValue,
    serializers: &SerializerRegistry,
) -> Result<Option<Element>> {
    let element = Element::new("property").with_attribute("name", name);
    match value {
        PropertyValue::Map(map) => {
            let mut nested = Element::new("properties");
            for (key, inner) in map {
                if let Some(child) = value_element(key, inner, serializers)? {
                    nested.children.push(child);
                }
            }
            Ok(Some(element.with_attribute("type", MAP_TYPE).with_child(nested)))
        }
        PropertyValue::DataSet(_) | PropertyValue::Bundle(_) => {
            warn!(
                property = name,
                "dataset-valued property must be written by reference, dropping it"
            );
            Ok(None)
        }
        other => match serializers.format(other)? {
            Some((type_id, text)) => {
                Ok(Some(element.with_attribute("type", type_id).with_attribute("value", text)))
            }
            None => {
                warn!(property = name, "no serializer accepts this property value, dropping it");
                Ok(None)
            }
        },
    }
}

fn parse_property(
    property: &Element,
    serializers: &SerializerRegistry,
) -> Result<Option<PropertyEntry>> {
    let name = property.required("name")?;
    let type_id = property.attribute("type").unwrap_or("String");
    match type_id {
        QDATASET_TYPE => {
            Ok(Some(PropertyEntry::Reference(property.required("value")?.to_string())))
        }
        MAP_TYPE => {
            let mut map = Properties::new();
            if let Some(list) = property.child("properties") {
                for inner in list.children_named("property") {
                    let key = inner.required("name")?;
                    match parse_property(inner, serializers)? {
                        Some(PropertyEntry::Value(value)) => {
                            map.insert(key.to_string(), value);
                        }
                        Some(PropertyEntry::Reference(target)) => {
                            map.insert(key.to_string(), PropertyValue::String(target));
                        }
                        None => {}
                    }
                }
            }
            Ok(Some(PropertyEntry::Value(PropertyValue::Map(map))))
        }
        _ => {
            let text = property.attribute("value").unwrap_or("");
            match serializers.parse(type_id, text) {
                Ok(Some(value)) => Ok(Some(PropertyEntry::Value(value))),
                Ok(None) => {
                    warn!(property = name, type_id, "no serializer for property type, dropping it");
                    Ok(None)
                }
                Err(err) => {
                    warn!(
                        property = name,
                        type_id,
                        error = %err,
                        "unparsable property value, dropping it"
                    );
                    Ok(None)
                }
            }
        }
    }
}

fn parse_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|part| !part.is_empty())
}

fn parse_dims(text: &str, plane: &str) -> Result<Vec<usize>> {
    parse_list(text)
        .map(|part| {
            part.parse::<usize>().map_err(|e| {
                QStreamError::descriptor(
                    None,
                    format!("plane '{}' has a bad length '{}': {}", plane, text, e),
                )
            })
        })
        .collect()
}
