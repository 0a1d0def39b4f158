//! Descriptor model.
//!
//! Descriptors announce what the following data frames contain. Each one is a
//! single XML element sent in a descriptor frame:
//!
//! - `<stream>` under ID 0 names the default dataset and the byte order
//! - `<packet>` under IDs 1 to 99 declares the planes of one packet shape
//! - `<enumerationUnit>`, `<exception>` and `<comment>` travel untracked
//!   under `[xx]`
//!
//! Descriptors are immutable once built; packets are shared as
//! `Arc<PacketDescriptor>` between the registry, the writer and the reader.

mod packet;
mod stream;
pub mod xml;

use std::sync::Arc;

pub use packet::{PacketDescriptor, PlaneContent, PlaneDescriptor, PropertyEntry};
pub use stream::StreamDescriptor;
pub use xml::Element;

use crate::serializer::SerializerRegistry;
use crate::types::ByteOrder;
use crate::{QStreamError, Result};

/// Any descriptor that can appear on a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Stream(StreamDescriptor),
    Packet(Arc<PacketDescriptor>),
    Enumeration(EnumerationDescriptor),
    Exception(ExceptionDescriptor),
    Comment(CommentDescriptor),
}

impl Descriptor {
    /// Parse one descriptor document. `byte_order` applies to binary planes
    /// of packet descriptors.
    pub fn parse(
        xml: &str,
        byte_order: ByteOrder,
        serializers: &SerializerRegistry,
    ) -> Result<Self> {
        let element = Element::parse(xml)?;
        match element.name.as_str() {
            "stream" => StreamDescriptor::from_element(&element).map(Descriptor::Stream),
            "packet" => PacketDescriptor::from_element(&element, byte_order, serializers)
                .map(|packet| Descriptor::Packet(Arc::new(packet))),
            "enumerationUnit" => {
                EnumerationDescriptor::from_element(&element).map(Descriptor::Enumeration)
            }
            "exception" => Ok(Descriptor::Exception(ExceptionDescriptor {
                kind: element.attribute("type").unwrap_or_default().to_string(),
                message: element.attribute("message").unwrap_or_default().to_string(),
            })),
            "comment" => Ok(Descriptor::Comment(CommentDescriptor {
                kind: element.attribute("type").unwrap_or_default().to_string(),
                message: element.attribute("message").unwrap_or_default().to_string(),
            })),
            other => Err(QStreamError::descriptor(
                None,
                format!("unknown descriptor element <{}>", other),
            )),
        }
    }

    pub fn to_element(&self, serializers: &SerializerRegistry) -> Result<Element> {
        Ok(match self {
            Descriptor::Stream(stream) => stream.to_element(),
            Descriptor::Packet(packet) => packet.to_element(serializers)?,
            Descriptor::Enumeration(enumeration) => enumeration.to_element(),
            Descriptor::Exception(exception) => Element::new("exception")
                .with_attribute("type", exception.kind.as_str())
                .with_attribute("message", exception.message.as_str()),
            Descriptor::Comment(comment) => Element::new("comment")
                .with_attribute("type", comment.kind.as_str())
                .with_attribute("message", comment.message.as_str()),
        })
    }

    pub fn to_xml(&self, serializers: &SerializerRegistry) -> Result<String> {
        self.to_element(serializers)?.to_xml()
    }

    /// Whether this descriptor travels under `[xx]` without an ID.
    pub fn is_untracked(&self) -> bool {
        matches!(
            self,
            Descriptor::Enumeration(_) | Descriptor::Exception(_) | Descriptor::Comment(_)
        )
    }
}

/// Label and colour of one ordinal of a nominal unit.
///
/// `<enumerationUnit name="quality" value="2" label="bad" color="#ff0000"/>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationDescriptor {
    /// Enumeration units id (the part after `nominal:`)
    pub units: String,
    pub ordinal: i64,
    pub label: String,
    pub color: Option<u32>,
}

impl EnumerationDescriptor {
    fn to_element(&self) -> Element {
        let element = Element::new("enumerationUnit")
            .with_attribute("name", self.units.as_str())
            .with_attribute("value", self.ordinal.to_string())
            .with_attribute("label", self.label.as_str());
        match self.color {
            Some(color) => element.with_attribute("color", format!("#{:06x}", color & 0x00ff_ffff)),
            None => element,
        }
    }

    fn from_element(element: &Element) -> Result<Self> {
        let units = element.required("name")?.to_string();
        let value = element.required("value")?;
        let ordinal = value.trim().parse().map_err(|e| {
            QStreamError::descriptor(None, format!("bad enumeration value '{}': {}", value, e))
        })?;
        let label = element.required("label")?.to_string();
        let color = match element.attribute("color") {
            Some(text) => Some(parse_color(text)?),
            None => None,
        };
        Ok(Self { units, ordinal, label, color })
    }
}

fn parse_color(text: &str) -> Result<u32> {
    let hex = text.trim().trim_start_matches('#');
    u32::from_str_radix(hex, 16)
        .map_err(|e| QStreamError::descriptor(None, format!("bad colour '{}': {}", text, e)))
}

/// In-band failure of the upstream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionDescriptor {
    pub kind: String,
    pub message: String,
}

impl ExceptionDescriptor {
    /// The source had no data for the request; not a failure of the stream.
    pub const NO_DATA_IN_INTERVAL: &'static str = "NoDataInInterval";
    pub const ILLEGAL_ARGUMENT: &'static str = "IllegalArgument";
    pub const SERVER_ERROR: &'static str = "ServerError";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }
}

/// Free-form annotation, such as task progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDescriptor {
    pub kind: String,
    pub message: String,
}

impl CommentDescriptor {
    pub const TASK_SIZE: &'static str = "taskSize";
    pub const TASK_PROGRESS: &'static str = "taskProgress";
    pub const LOG: &'static str = "log";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }
}

/// Render a value for an inline list; the output parses back exactly.
pub(crate) fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        value.to_string()
    }
}

pub(crate) fn parse_number(text: &str, plane: &str) -> Result<f64> {
    match text.trim() {
        "NaN" => Ok(f64::NAN),
        "Infinity" | "+Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        other => other.parse().map_err(|e| {
            QStreamError::descriptor(
                None,
                format!("plane '{}' has a bad value '{}': {}", plane, text, e),
            )
        }),
    }
}
