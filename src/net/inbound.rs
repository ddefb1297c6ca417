//! Buffered inbound calls.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};

use crate::soap::{parse_envelope, SoapEnvelope};

#[derive(Debug)]
enum EnvelopeSlot {
    Unparsed,
    Parsed(SoapEnvelope),
    Invalid,
}

/// A fully buffered inbound call, handed along the binding chain.
///
/// The SOAP envelope is decoded at most once, by the first binding that asks
/// for it, and shared by every later binding.
#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    envelope: EnvelopeSlot,
}

impl InboundRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            envelope: EnvelopeSlot::Unparsed,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// `GET {path}?wsdl`
    pub fn is_wsdl_query(&self) -> bool {
        self.method == Method::GET
            && self
                .uri
                .query()
                .is_some_and(|q| q.eq_ignore_ascii_case("wsdl"))
    }

    /// The decoded SOAP envelope, or `None` when the body is not one.
    pub fn envelope(&mut self) -> Option<&SoapEnvelope> {
        if let EnvelopeSlot::Unparsed = self.envelope {
            let decoded = std::str::from_utf8(&self.body)
                .map_err(|_| crate::message::ParseError::Utf8)
                .and_then(parse_envelope);
            self.envelope = match decoded {
                Ok(envelope) => EnvelopeSlot::Parsed(envelope),
                Err(e) => {
                    tracing::debug!(path = %self.uri.path(), error = %e, "Body is not a SOAP envelope");
                    EnvelopeSlot::Invalid
                }
            };
        }
        match &self.envelope {
            EnvelopeSlot::Parsed(envelope) => Some(envelope),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(path: &str) -> Self {
        Self::new(
            Method::POST,
            path.parse().unwrap_or_default(),
            HeaderMap::new(),
            Bytes::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wsdl_query() {
        let mut req = InboundRequest::for_test("/svc?wsdl");
        assert!(!req.is_wsdl_query());
        req.method = Method::GET;
        assert!(req.is_wsdl_query());
        assert_eq!(req.path(), "/svc");
    }

    #[test]
    fn test_envelope_is_decoded_once() {
        let body = r#"<Envelope><Body><OpA><x>1</x></OpA></Body></Envelope>"#;
        let mut req = InboundRequest::new(
            Method::POST,
            Uri::from_static("/svc"),
            HeaderMap::new(),
            Bytes::from_static(body.as_bytes()),
        );
        assert_eq!(req.envelope().map(|e| e.operation.clone()).as_deref(), Some("OpA"));
        req.body = Bytes::new();
        assert!(req.envelope().is_some());

        let mut junk = InboundRequest::for_test("/svc");
        assert!(junk.envelope().is_none());
    }
}
