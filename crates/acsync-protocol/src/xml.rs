//! Minimal element tree for ISAPI XML documents.
//!
//! Device responses are small and shallow, so the whole body is read into a
//! tree of [`XmlElement`] and queried by local element name. Namespaces and
//! attributes are ignored.

use crate::error::{ProtocolError, Result};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

/// One XML element with its text content and child elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a complete document and return its root element.
    ///
    /// # Errors
    /// Returns `ProtocolError::Xml` if the document is not well formed or
    /// contains no element.
    pub fn parse(document: &str) -> Result<Self> {
        let mut reader = Reader::from_str(document);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    stack.push(XmlElement {
                        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
                        ..Default::default()
                    });
                }
                Event::Empty(empty) => {
                    let element = XmlElement {
                        name: String::from_utf8_lossy(empty.local_name().as_ref()).into_owned(),
                        ..Default::default()
                    };
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(open) = stack.last_mut() {
                        open.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(open) = stack.last_mut() {
                        open.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| ProtocolError::Xml("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(ProtocolError::Xml("unclosed element".to_string()));
        }
        root.ok_or_else(|| ProtocolError::Xml("document has no root element".to_string()))
    }

    /// First direct child with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of the first direct child with the given name.
    #[must_use]
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    /// First element with the given name, depth first, including `self`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Trimmed text of the first element with the given name anywhere below.
    #[must_use]
    pub fn find_text(&self, name: &str) -> Option<&str> {
        self.find(name).map(|e| e.text.trim()).filter(|t| !t.is_empty())
    }

    /// All elements with the given name, depth first, including `self`.
    #[must_use]
    pub fn find_all(&self, name: &str) -> Vec<&XmlElement> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        if self.name == name {
            found.push(self);
        }
        for child in &self.children {
            child.collect(name, found);
        }
    }

    /// Convert the children into a JSON object.
    ///
    /// Leaf elements become strings, elements with children become nested
    /// objects. Repeated names keep the last occurrence.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.children
            .iter()
            .map(|c| {
                let value = if c.children.is_empty() {
                    Value::String(c.text.trim().to_string())
                } else {
                    Value::Object(c.to_json_map())
                };
                (c.name.clone(), value)
            })
            .collect()
    }
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Escape text for inclusion in an XML element.
#[must_use]
pub fn escape(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}
