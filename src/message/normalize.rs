//! Raw transport data → [`Message`].

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::message::{xml, BodyKind, Message, ParseError};

/// Build a message from a raw body and header map.
pub fn normalize(raw_body: &[u8], raw_headers: &HeaderMap, kind: BodyKind) -> Result<Message, ParseError> {
    let body = parse_body(raw_body, kind)?;
    Ok(Message::new(body, headers_from_map(raw_headers)))
}

/// Decode a body according to its declared kind.
pub fn parse_body(raw_body: &[u8], kind: BodyKind) -> Result<Value, ParseError> {
    match kind {
        BodyKind::Json => Ok(serde_json::from_slice(raw_body)?),
        BodyKind::Xml => {
            let text = std::str::from_utf8(raw_body).map_err(|_| ParseError::Utf8)?;
            xml::parse(text)
        }
    }
}

/// Flatten a header map. Repeated headers are joined with `", "`.
pub fn headers_from_map(header_map: &HeaderMap) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in header_map {
        let value = String::from_utf8_lossy(value.as_bytes());
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn header_map() -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("content-type", HeaderValue::from_static("application/json"));
        map.append("accept", HeaderValue::from_static("text/plain"));
        map.append("accept", HeaderValue::from_static("application/json"));
        map
    }

    #[test]
    fn test_json_body() {
        let msg = normalize(br#"{"op":"ping"}"#, &header_map(), BodyKind::Json).unwrap();
        assert_eq!(msg.body(), &json!({"op": "ping"}));
        assert_eq!(msg.headers()["content-type"], "application/json");
        assert_eq!(msg.headers()["accept"], "text/plain, application/json");
    }

    #[test]
    fn test_xml_body() {
        let msg = normalize(b"<ns:req xmlns:ns=\"urn:x\"><op>ping</op></ns:req>", &HeaderMap::new(), BodyKind::Xml)
            .unwrap();
        assert_eq!(msg.body()["req"]["op"], json!("ping"));
    }

    #[test]
    fn test_parse_failures_are_errors() {
        assert!(matches!(
            normalize(b"{not json", &HeaderMap::new(), BodyKind::Json),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            normalize(b"", &HeaderMap::new(), BodyKind::Json),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            normalize(b"<open>", &HeaderMap::new(), BodyKind::Xml),
            Err(ParseError::Xml(_))
        ));
        assert!(matches!(
            normalize(&[0xff, 0xfe], &HeaderMap::new(), BodyKind::Xml),
            Err(ParseError::Utf8)
        ));
    }

    #[test]
    fn test_messages_are_independent_snapshots() {
        let mut raw = br#"{"op":"ping","n":[1,2]}"#.to_vec();
        let headers = header_map();

        let first = normalize(&raw, &headers, BodyKind::Json).unwrap();
        let second = normalize(&raw, &headers, BodyKind::Json).unwrap();
        assert_eq!(first, second);

        // Reusing the transport buffer does not reach into captured messages.
        raw.iter_mut().for_each(|b| *b = b' ');
        assert_eq!(first.body()["op"], json!("ping"));

        let (mut body, _) = first.into_parts();
        body["op"] = json!("mutated");
        assert_eq!(second.body()["op"], json!("ping"));
    }
}
