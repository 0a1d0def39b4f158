//! Stream descriptor, always sent under packet ID 0

use super::xml::Element;
use crate::types::ByteOrder;
use crate::{QStreamError, Result};

/// `<stream dataset_id="NAME" byte_order="little_endian"/>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Name of the default dataset on the stream
    pub dataset_id: String,
    pub byte_order: ByteOrder,
}

impl StreamDescriptor {
    pub fn new(dataset_id: impl Into<String>, byte_order: ByteOrder) -> Self {
        Self { dataset_id: dataset_id.into(), byte_order }
    }

    pub fn to_element(&self) -> Element {
        Element::new("stream")
            .with_attribute("dataset_id", self.dataset_id.as_str())
            .with_attribute("byte_order", self.byte_order.wire_name())
    }

    /// Streams that omit `byte_order` are big endian.
    pub fn from_element(element: &Element) -> Result<Self> {
        let dataset_id = element.required("dataset_id")?.to_string();
        let byte_order = match element.attribute("byte_order") {
            Some(name) => ByteOrder::from_wire_name(name.trim()).ok_or_else(|| {
                QStreamError::descriptor(None, format!("unknown byte_order '{}'", name))
            })?,
            None => ByteOrder::BigEndian,
        };
        Ok(Self { dataset_id, byte_order })
    }
}
