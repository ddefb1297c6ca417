//! hyper-based downstream client.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderName, HeaderValue, Method, Request};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;

use crate::downstream::{ClientSecurity, Downstream, DownstreamCall, DownstreamError, DownstreamReply, Operation};
use crate::message::{headers_from_map, xml, BodyKind};
use crate::observability::metrics;
use crate::soap;

/// Headers never copied from the captured call onto the proxy leg.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    "content-type",
];

/// Upper bound on a buffered downstream body.
const MAX_REPLY_BYTES: usize = 16 * 1024 * 1024;

type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Downstream client shared by every subscription of a bridge. Speaks
/// plain HTTP and HTTPS (webpki roots).
#[derive(Clone)]
pub struct HyperDownstream {
    client: HttpsClient,
}

impl HyperDownstream {
    pub fn new() -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);
        Self { client }
    }
}

impl Default for HyperDownstream {
    fn default() -> Self {
        Self::new()
    }
}

impl Downstream for HyperDownstream {
    fn invoke(&self, call: DownstreamCall) -> BoxFuture<'static, Result<DownstreamReply, DownstreamError>> {
        let client = self.client.clone();
        async move {
            let started = Instant::now();
            let limit = call.timeout;
            let result = match tokio::time::timeout(limit, execute(client, &call)).await {
                Ok(result) => result,
                Err(_) => Err(DownstreamError::Timeout(limit)),
            };
            let outcome = match &result {
                Ok(_) => "success",
                Err(e) => e.outcome(),
            };
            metrics::record_downstream(outcome, started);
            result
        }
        .boxed()
    }
}

async fn execute(client: HttpsClient, call: &DownstreamCall) -> Result<DownstreamReply, DownstreamError> {
    let request = build_request(call)?;

    tracing::debug!(
        endpoint = %call.endpoint,
        operation = ?call.operation,
        "Calling downstream"
    );

    let response = client
        .request(request)
        .await
        .map_err(|e| DownstreamError::Transport(e.to_string()))?;

    let (parts, body) = response.into_parts();
    let raw = axum::body::to_bytes(Body::new(body), MAX_REPLY_BYTES)
        .await
        .map_err(|e| DownstreamError::Transport(e.to_string()))?;
    let status = parts.status.as_u16();
    let headers = headers_from_map(&parts.headers);

    let body = match &call.operation {
        Operation::Soap { .. } => match decode_soap(&raw) {
            Ok(Err(fault)) => return Err(DownstreamError::Fault(fault)),
            _ if status >= 400 => return Err(status_error(status, &raw)),
            Ok(Ok(result)) => result,
            Err(e) => return Err(e),
        },
        Operation::Endpoint { .. } => {
            if status >= 400 {
                return Err(status_error(status, &raw));
            }
            decode_plain(&raw, headers.get("content-type").map(String::as_str))?
        }
    };

    Ok(DownstreamReply {
        status,
        headers,
        body,
        raw,
    })
}

fn build_request(call: &DownstreamCall) -> Result<Request<Body>, DownstreamError> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(call.endpoint.as_str());

    let invalid = match &call.operation {
        Operation::Endpoint { body_kind: BodyKind::Json } => None,
        Operation::Endpoint { body_kind: BodyKind::Xml } => xml::invalid_name(&call.payload),
        Operation::Soap { .. } => call
            .headers
            .keys()
            .map(String::as_str)
            .find(|name| !xml::is_valid_name(name))
            .or_else(|| xml::invalid_name(&call.payload)),
    };
    if let Some(name) = invalid {
        return Err(DownstreamError::InvalidRequest(format!(
            "'{}' is not a valid XML element name",
            name
        )));
    }

    let (content_type, body) = match &call.operation {
        Operation::Endpoint { body_kind: BodyKind::Json } => (
            "application/json",
            serde_json::to_vec(&call.payload).map_err(|e| DownstreamError::InvalidRequest(e.to_string()))?,
        ),
        Operation::Endpoint { body_kind: BodyKind::Xml } => ("application/xml", xml::to_xml(&call.payload).into_bytes()),
        Operation::Soap { key, namespace } => {
            builder = builder.header("soapaction", format!("\"{}\"", key.operation));
            let security = call.security.as_ref().and_then(ClientSecurity::soap_header);
            let envelope = soap::request_envelope(
                key,
                namespace.as_deref(),
                &call.payload,
                &call.headers,
                security.as_deref(),
            );
            ("text/xml; charset=utf-8", envelope.into_bytes())
        }
    };

    let headers = builder
        .headers_mut()
        .ok_or_else(|| DownstreamError::InvalidRequest(format!("invalid endpoint {}", call.endpoint)))?;
    // SOAP call headers travel inside the envelope.
    if let Operation::Endpoint { .. } = call.operation {
        forward_headers(headers, &call.headers);
    }
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Some(authorization) = call.security.as_ref().and_then(ClientSecurity::authorization) {
        let value =
            HeaderValue::from_str(&authorization).map_err(|e| DownstreamError::InvalidRequest(e.to_string()))?;
        headers.insert(header::AUTHORIZATION, value);
    }

    builder
        .body(Body::from(body))
        .map_err(|e| DownstreamError::InvalidRequest(e.to_string()))
}

fn forward_headers(target: &mut axum::http::HeaderMap, captured: &BTreeMap<String, String>) {
    for (name, value) in captured {
        if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                target.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "Dropping header that cannot be forwarded"),
        }
    }
}

fn decode_soap(raw: &Bytes) -> Result<Result<Value, soap::SoapFault>, DownstreamError> {
    let text = std::str::from_utf8(raw).map_err(|_| crate::message::ParseError::Utf8)?;
    Ok(soap::parse_reply(text)?)
}

// Decoded by the reply's content type; anything that is neither JSON nor XML is text.
fn decode_plain(raw: &Bytes, content_type: Option<&str>) -> Result<Value, DownstreamError> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if content_type.contains("json") {
        return Ok(crate::message::normalize::parse_body(raw, BodyKind::Json)?);
    }
    if content_type.contains("xml") {
        return Ok(crate::message::normalize::parse_body(raw, BodyKind::Xml)?);
    }
    Ok(Value::String(String::from_utf8_lossy(raw).into_owned()))
}

fn status_error(status: u16, raw: &Bytes) -> DownstreamError {
    DownstreamError::Status {
        status,
        body: String::from_utf8_lossy(raw).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OperationKey;
    use serde_json::json;
    use std::time::Duration;
    use url::Url;

    fn call(operation: Operation) -> DownstreamCall {
        DownstreamCall {
            endpoint: Url::parse("http://127.0.0.1:9/svc").unwrap(),
            operation,
            payload: json!({"x": 1}),
            headers: BTreeMap::from([
                ("host".to_string(), "bridge:8080".to_string()),
                ("x-trace".to_string(), "t1".to_string()),
                ("content-length".to_string(), "7".to_string()),
            ]),
            timeout: Duration::from_millis(100),
            security: None,
        }
    }

    #[test]
    fn test_endpoint_request_forwards_headers() {
        let request = build_request(&call(Operation::Endpoint { body_kind: BodyKind::Json })).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://127.0.0.1:9/svc");
        assert_eq!(request.headers()["x-trace"], "t1");
        assert_eq!(request.headers()[header::CONTENT_TYPE], "application/json");
        assert!(request.headers().get(header::HOST).is_none());
        assert!(request.headers().get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_soap_request_carries_action_and_auth() {
        let mut soap_call = call(Operation::Soap {
            key: OperationKey::new("ServiceA", "PortA", "OpA"),
            namespace: None,
        });
        soap_call.headers.clear();
        soap_call.security = Some(ClientSecurity::Bearer { token: "abc".into() });

        let request = build_request(&soap_call).unwrap();
        assert_eq!(request.headers()["soapaction"], "\"OpA\"");
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer abc");
        assert_eq!(request.headers()[header::CONTENT_TYPE], "text/xml; charset=utf-8");
    }

    #[tokio::test]
    async fn test_ws_security_travels_in_the_envelope() {
        let mut soap_call = call(Operation::Soap {
            key: OperationKey::new("ServiceA", "PortA", "OpA"),
            namespace: None,
        });
        soap_call.headers.clear();
        soap_call.security = Some(ClientSecurity::WsSecurity {
            username: "svc".into(),
            password: "pw".into(),
        });

        let request = build_request(&soap_call).unwrap();
        assert!(request.headers().get(header::AUTHORIZATION).is_none());
        let body = axum::body::to_bytes(request.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("<soap:Header><wsse:Security "));
        assert!(text.contains("<wsse:Username>svc</wsse:Username>"));
    }

    #[test]
    fn test_invalid_xml_names_are_not_sent() {
        let mut soap_call = call(Operation::Soap {
            key: OperationKey::new("ServiceA", "PortA", "OpA"),
            namespace: None,
        });
        soap_call.headers.clear();
        soap_call.payload = json!({"a b": 1});
        assert!(matches!(build_request(&soap_call), Err(DownstreamError::InvalidRequest(_))));

        let mut xml_call = call(Operation::Endpoint { body_kind: BodyKind::Xml });
        xml_call.payload = json!({"root": {"x<y": 1}});
        assert!(matches!(build_request(&xml_call), Err(DownstreamError::InvalidRequest(_))));

        // JSON bodies have no element names.
        let mut json_call = call(Operation::Endpoint { body_kind: BodyKind::Json });
        json_call.payload = json!({"a b": 1});
        assert!(build_request(&json_call).is_ok());
    }

    #[test]
    fn test_decode_plain_by_content_type() {
        let json_body = Bytes::from_static(br#"{"y":2}"#);
        assert_eq!(decode_plain(&json_body, Some("application/json")).unwrap(), json!({"y": 2}));
        assert_eq!(decode_plain(&Bytes::from_static(b"pong"), None).unwrap(), json!("pong"));
        assert_eq!(decode_plain(&Bytes::new(), Some("application/json")).unwrap(), Value::Null);
        assert!(matches!(
            decode_plain(&Bytes::from_static(b"{oops"), Some("application/json")),
            Err(DownstreamError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_downstream_is_transport_error() {
        // Port 9 (discard) is closed on test hosts.
        let result = HyperDownstream::new()
            .invoke(call(Operation::Endpoint { body_kind: BodyKind::Json }))
            .await;
        assert!(matches!(
            result,
            Err(DownstreamError::Transport(_)) | Err(DownstreamError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_https_endpoint_negotiates_tls() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // A plain HTTP server behind an https URL: the handshake must fail.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}")
                    .await;
            }
        });

        let mut https_call = call(Operation::Endpoint { body_kind: BodyKind::Json });
        https_call.endpoint = Url::parse(&format!("https://{}/svc", addr)).unwrap();
        https_call.timeout = Duration::from_secs(2);
        let result = HyperDownstream::new().invoke(https_call).await;
        assert!(matches!(result, Err(DownstreamError::Transport(_))));
    }
}
