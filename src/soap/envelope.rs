//! SOAP 1.1 envelopes.
//!
//! # Responsibilities
//! - Extract operation name, arguments and header entries from a request
//! - Extract the result (or fault) from a reply
//! - Write request, response and fault envelopes
//!
//! Values travel as the XML value tree of [`crate::message::xml`]: scalar
//! leaves are strings because no schema is consulted.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::message::xml::{self, ATTRIBUTES_KEY, TEXT_KEY};
use crate::message::ParseError;
use crate::registry::OperationKey;

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// A decoded inbound SOAP call.
#[derive(Debug, Clone, PartialEq)]
pub struct SoapEnvelope {
    pub operation: String,
    pub args: Value,
    pub headers: BTreeMap<String, String>,
}

/// A SOAP fault returned by a downstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for SoapFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Decode a request envelope.
pub fn parse_envelope(text: &str) -> Result<SoapEnvelope, ParseError> {
    let document = xml::parse(text)?;
    let envelope = document
        .get("Envelope")
        .ok_or_else(|| ParseError::Envelope("missing Envelope element".into()))?;

    let (operation, content) = first_body_entry(envelope)?;
    let headers = match envelope.get("Header") {
        Some(Value::Object(entries)) => entries
            .iter()
            .filter(|(key, _)| key.as_str() != ATTRIBUTES_KEY && key.as_str() != TEXT_KEY)
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    Ok(SoapEnvelope {
        operation,
        args: strip_attributes(content),
        headers,
    })
}

/// Decode a reply envelope into its result element content, or the fault it carries.
pub fn parse_reply(text: &str) -> Result<Result<Value, SoapFault>, ParseError> {
    let document = xml::parse(text)?;
    let envelope = document
        .get("Envelope")
        .ok_or_else(|| ParseError::Envelope("missing Envelope element".into()))?;
    let (name, content) = first_body_entry(envelope)?;

    if name == "Fault" {
        return Ok(Err(read_fault(&content)));
    }
    Ok(Ok(strip_attributes(content)))
}

/// Outbound request for `key`.
///
/// `security` is a ready-made header block (such as `wsse:Security`) written
/// ahead of the plain header entries.
pub fn request_envelope(
    key: &OperationKey,
    namespace: Option<&str>,
    args: &Value,
    headers: &BTreeMap<String, String>,
    security: Option<&str>,
) -> String {
    let mut body = String::new();
    write_qualified(&mut body, &key.operation, namespace, args);
    envelope(headers, security, &body)
}

/// Response written back to the original caller of `operation`.
pub fn response_envelope(
    operation: &str,
    namespace: Option<&str>,
    payload: &Value,
    headers: &BTreeMap<String, String>,
) -> String {
    let mut body = String::new();
    write_qualified(&mut body, &format!("{}Response", operation), namespace, payload);
    envelope(headers, None, &body)
}

/// A fault envelope with a `soap:`-qualified code.
pub fn fault_envelope(code: &str, message: &str) -> String {
    let mut body = String::new();
    let fault = serde_json::json!({
        "faultcode": format!("soap:{}", code),
        "faultstring": message,
    });
    xml::write_element(&mut body, "soap:Fault", &fault);
    envelope(&BTreeMap::new(), None, &body)
}

fn envelope(headers: &BTreeMap<String, String>, security: Option<&str>, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 256);
    out.push_str(XML_DECL);
    out.push_str(r#"<soap:Envelope xmlns:soap=""#);
    out.push_str(SOAP_ENV_NS);
    out.push_str(r#"">"#);
    if !headers.is_empty() || security.is_some() {
        out.push_str("<soap:Header>");
        if let Some(block) = security {
            out.push_str(block);
        }
        for (name, value) in headers {
            xml::write_element(&mut out, name, &Value::String(value.clone()));
        }
        out.push_str("</soap:Header>");
    }
    out.push_str("<soap:Body>");
    out.push_str(body);
    out.push_str("</soap:Body></soap:Envelope>");
    out
}

fn write_qualified(out: &mut String, name: &str, namespace: Option<&str>, content: &Value) {
    let Some(ns) = namespace else {
        xml::write_element(out, name, &element_content(content));
        return;
    };

    let mut object = match element_content(content) {
        Value::Object(map) => map,
        Value::String(text) if text.is_empty() => Map::new(),
        scalar => {
            let mut map = Map::new();
            map.insert(TEXT_KEY.to_string(), scalar);
            map
        }
    };
    let mut attributes = match object.remove(ATTRIBUTES_KEY) {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    attributes.insert("xmlns:tns".to_string(), Value::String(ns.to_string()));
    object.insert(ATTRIBUTES_KEY.to_string(), Value::Object(attributes));
    xml::write_element(out, &format!("tns:{}", name), &Value::Object(object));
}

// Null and arrays cannot be the content of a single element.
fn element_content(content: &Value) -> Value {
    match content {
        Value::Null => Value::String(String::new()),
        Value::Array(_) => {
            let mut map = Map::new();
            map.insert("item".to_string(), content.clone());
            Value::Object(map)
        }
        other => other.clone(),
    }
}

fn first_body_entry(envelope: &Value) -> Result<(String, Value), ParseError> {
    let body = envelope
        .get("Body")
        .ok_or_else(|| ParseError::Envelope("missing Body element".into()))?;
    match body {
        Value::Object(entries) => entries
            .iter()
            .find(|(key, _)| key.as_str() != ATTRIBUTES_KEY && key.as_str() != TEXT_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .ok_or_else(|| ParseError::Envelope("empty Body element".into())),
        _ => Err(ParseError::Envelope("empty Body element".into())),
    }
}

fn strip_attributes(content: Value) -> Value {
    match content {
        Value::Object(mut map) => {
            map.remove(ATTRIBUTES_KEY);
            match (map.len(), map.get(TEXT_KEY)) {
                (1, Some(_)) => map.remove(TEXT_KEY).unwrap_or_default(),
                _ => Value::Object(map),
            }
        }
        Value::String(text) if text.is_empty() => Value::Object(Map::new()),
        other => other,
    }
}

fn read_fault(content: &Value) -> SoapFault {
    let text = |value: Option<&Value>| match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    // SOAP 1.1 faultcode/faultstring, SOAP 1.2 Code.Value/Reason.Text.
    let code = content
        .get("faultcode")
        .or_else(|| content.get("Code").and_then(|c| c.get("Value")));
    let message = content
        .get("faultstring")
        .or_else(|| content.get("Reason").and_then(|r| r.get("Text")));
    SoapFault {
        code: text(code),
        message: text(message),
    }
}
