//! Responses written back to the original caller.
//!
//! # Responsibilities
//! - Hold the {status, headers, payload} triple supplied by the engine
//! - Stringify payloads (numbers become their decimal text)
//! - Encode for the subscription's protocol (plain HTTP or SOAP envelope)
//! - Build the bridge's own error replies (pass-through 404, 502, 503)

use std::collections::BTreeMap;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ResponseConfig;
use crate::dispatch::ResponseWriteError;
use crate::message::xml;
use crate::soap;

/// Transport-level response type.
pub type TransportResponse = axum::http::Response<Body>;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";
const TEXT_XML: &str = "text/xml; charset=utf-8";

/// A response supplied by the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Value,
}

impl Response {
    pub fn new(status: u16, payload: impl Into<Value>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            payload: payload.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Wire text of the payload. Strings go out verbatim, numbers as decimal
    /// text, everything else as JSON.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Encode as a plain HTTP response.
    pub fn to_http(&self) -> Result<TransportResponse, ResponseWriteError> {
        let content_type = match &self.payload {
            Value::Object(_) | Value::Array(_) | Value::Bool(_) => APPLICATION_JSON,
            _ => TEXT_PLAIN,
        };
        self.build(content_type, self.payload_text())
    }

    /// Encode as a SOAP response envelope for `operation`.
    pub fn to_soap(
        &self,
        operation: &str,
        namespace: Option<&str>,
        soap_headers: &BTreeMap<String, String>,
    ) -> Result<TransportResponse, ResponseWriteError> {
        let invalid = soap_headers
            .keys()
            .map(String::as_str)
            .find(|name| !xml::is_valid_name(name))
            .or_else(|| xml::invalid_name(&self.payload));
        if let Some(name) = invalid {
            return Err(ResponseWriteError::InvalidResponse(format!(
                "'{}' is not a valid XML element name",
                name
            )));
        }
        let envelope = soap::response_envelope(operation, namespace, &self.payload, soap_headers);
        self.build(TEXT_XML, envelope)
    }

    fn build(&self, content_type: &'static str, body: String) -> Result<TransportResponse, ResponseWriteError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| ResponseWriteError::InvalidResponse(format!("status {}", self.status)))?;

        let mut response = axum::http::Response::new(Body::from(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ResponseWriteError::InvalidResponse(format!("header name '{}'", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ResponseWriteError::InvalidResponse(format!("header value for '{}'", name)))?;
            headers.insert(name, value);
        }
        Ok(response)
    }
}

impl From<ResponseConfig> for Response {
    fn from(config: ResponseConfig) -> Self {
        Self {
            status: config.status,
            headers: config.headers,
            payload: config.payload,
        }
    }
}

/// Plain-text reply produced by the bridge itself.
pub fn plain(status: StatusCode, text: &'static str) -> TransportResponse {
    let mut response = axum::http::Response::new(Body::from(text));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}

/// SOAP fault reply produced by the bridge itself.
pub fn fault(status: StatusCode, code: &str, message: &str) -> TransportResponse {
    let mut response = axum::http::Response::new(Body::from(soap::fault_envelope(code, message)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_XML));
    response
}

/// Downstream reply relayed verbatim.
pub fn relay(status: u16, content_type: Option<&str>, body: Bytes) -> TransportResponse {
    let mut response = axum::http::Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if let Some(value) = content_type.and_then(|v| HeaderValue::from_str(v).ok()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// `GET {path}?wsdl`
pub fn wsdl(document: &str) -> TransportResponse {
    let mut response = axum::http::Response::new(Body::from(document.to_owned()));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_XML));
    response
}
