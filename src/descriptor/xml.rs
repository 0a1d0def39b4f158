//! Small element tree over `quick-xml`
//!
//! Descriptors are single XML elements with attributes and child elements;
//! text content is never significant. Parsing builds an [`Element`] tree from
//! `quick-xml` events and writing walks the tree back into events.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use std::fmt;

use crate::{QStreamError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: Vec::new(), children: Vec::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Attribute that must be present.
    pub fn required(&self, key: &str) -> Result<&str> {
        self.attribute(key).ok_or_else(|| {
            let details = format!("<{}> is missing attribute '{}'", self.name, key);
            QStreamError::descriptor(None, details)
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Parse a document holding exactly one root element.
    pub fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;
        loop {
            let event = reader
                .read_event()
                .map_err(|e| xml_error(format!("at byte {}", reader.buffer_position()), e))?;
            match event {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let element = element_from(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| QStreamError::descriptor(None, "unbalanced closing tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Eof => break,
                // declarations, comments, text and processing instructions carry nothing
                _ => {}
            }
        }
        if !stack.is_empty() {
            return Err(QStreamError::descriptor(None, "document ended inside an element"));
        }
        root.ok_or_else(|| QStreamError::descriptor(None, "document has no root element"))
    }

    /// Serialize with two-space indentation and no XML declaration.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| QStreamError::descriptor(None, format!("descriptor is not UTF-8: {}", e)))
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start)).map_err(|e| xml_error("writing", e))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start)).map_err(|e| xml_error("writing", e))?;
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(|e| xml_error("writing", e))?;
        Ok(())
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| xml_error(format!("in <{}> attributes", element.name), e))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| xml_error(format!("in attribute '{}'", key), e))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(QStreamError::descriptor(None, "document has more than one root element"));
        }
    }
    Ok(())
}

fn xml_error(context: impl fmt::Display, err: impl fmt::Display) -> QStreamError {
    QStreamError::descriptor(None, format!("XML error {}: {}", context, err))
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_xml() {
            Ok(xml) => f.write_str(&xml),
            Err(_) => write!(f, "<{}/>", self.name),
        }
    }
}
