//! XML ⇄ value tree conversion.
//!
//! Element names lose their namespace prefix. An element that appears once
//! becomes a scalar (or object); only repeated siblings become arrays.
//! Attributes are kept under `"$"`, and text mixed with child elements under
//! `"_"`. Text-only elements collapse to strings.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

use crate::message::ParseError;

/// Key holding an element's attributes.
pub const ATTRIBUTES_KEY: &str = "$";
/// Key holding an element's text when it also has children or attributes.
pub const TEXT_KEY: &str = "_";

#[derive(Debug, Default)]
struct Frame {
    name: String,
    attributes: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ParseError::Xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| ParseError::Xml(e.to_string()))?;
            attributes.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    fn add_child(&mut self, name: String, value: Value) {
        match self.children.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.children.insert(name, value);
            }
        }
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim().to_string();
        if self.children.is_empty() && self.attributes.is_empty() {
            return (self.name, Value::String(text));
        }
        let mut object = Map::new();
        if !self.attributes.is_empty() {
            object.insert(ATTRIBUTES_KEY.to_string(), Value::Object(self.attributes));
        }
        if !text.is_empty() {
            object.insert(TEXT_KEY.to_string(), Value::String(text));
        }
        object.extend(self.children);
        (self.name, Value::Object(object))
    }
}

/// Parse an XML document into `{ rootName: content }`.
pub fn parse(xml: &str) -> Result<Value, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if root.is_some() {
                    return Err(ParseError::Xml("content after root element".into()));
                }
                stack.push(Frame::open(&start, &reader)?);
            }
            Ok(Event::Empty(start)) => {
                if root.is_some() {
                    return Err(ParseError::Xml("content after root element".into()));
                }
                let (name, value) = Frame::open(&start, &reader)?.close();
                match stack.last_mut() {
                    Some(parent) => parent.add_child(name, value),
                    None => root = Some((name, value)),
                }
            }
            Ok(Event::End(_)) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| ParseError::Xml("unexpected closing tag".into()))?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => parent.add_child(name, value),
                    None => root = Some((name, value)),
                }
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(ParseError::Xml("text outside of root element".into())),
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, processing instructions, doctype.
            Ok(_) => {}
            Err(e) => {
                return Err(ParseError::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(ParseError::Xml("unclosed element at end of input".into()));
    }
    let (name, value) = root.ok_or_else(|| ParseError::Xml("document has no root element".into()))?;

    let mut document = Map::new();
    document.insert(name, value);
    Ok(Value::Object(document))
}

/// Serialize `value` as the content of an element called `name`.
///
/// Inverse of [`parse`] for the shapes it produces: arrays repeat the element,
/// `"$"` becomes attributes and `"_"` becomes text.
pub fn write_element(out: &mut String, name: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(out, name, item);
            }
        }
        Value::Object(map) => {
            out.push('<');
            out.push_str(name);
            if let Some(Value::Object(attributes)) = map.get(ATTRIBUTES_KEY) {
                for (key, attr) in attributes {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape(scalar_text(attr).as_str()));
                    out.push('"');
                }
            }
            out.push('>');
            if let Some(text) = map.get(TEXT_KEY) {
                out.push_str(&escape(scalar_text(text).as_str()));
            }
            for (key, child) in map {
                if key == ATTRIBUTES_KEY || key == TEXT_KEY {
                    continue;
                }
                write_element(out, key, child);
            }
            close_tag(out, name);
        }
        Value::Null => {
            out.push('<');
            out.push_str(name);
            out.push_str("/>");
        }
        scalar => {
            out.push('<');
            out.push_str(name);
            out.push('>');
            out.push_str(&escape(scalar_text(scalar).as_str()));
            close_tag(out, name);
        }
    }
}

/// Whether `name` can be written as an element or attribute name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

/// First key of `value` that [`write_element`] would write as a name but
/// which is not a valid XML name.
pub fn invalid_name(value: &Value) -> Option<&str> {
    match value {
        Value::Array(items) => items.iter().find_map(invalid_name),
        Value::Object(map) => map.iter().find_map(|(key, child)| match key.as_str() {
            ATTRIBUTES_KEY => match child {
                Value::Object(attributes) => attributes.keys().map(String::as_str).find(|k| !is_valid_name(k)),
                _ => None,
            },
            TEXT_KEY => None,
            name if !is_valid_name(name) => Some(name),
            _ => invalid_name(child),
        }),
        _ => None,
    }
}

/// Serialize a whole `{ rootName: content }` document.
pub fn to_xml(document: &Value) -> String {
    let mut out = String::new();
    match document {
        Value::Object(map) => {
            for (name, content) in map {
                write_element(&mut out, name, content);
            }
        }
        other => out.push_str(&escape(scalar_text(other).as_str())),
    }
    out
}

fn close_tag(out: &mut String, name: &str) {
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
