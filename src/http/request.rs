//! Request identification.
//!
//! # Responsibilities
//! - Stamp every inbound call with an `x-request-id` (UUID v4) unless the
//!   caller supplied one
//! - Echo the id on the response
//! - Open a per-request tracing span
//!
//! # Design Decisions
//! - Request ID added as early as possible so every bridge log line for the
//!   call carries it

use axum::http::HeaderMap;
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub const X_REQUEST_ID: &str = "x-request-id";

/// The request id header, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Wrap a port router in the request-id and trace layers.
pub fn with_request_layers(router: Router) -> Router {
    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_request_id_is_generated_and_echoed() {
        let router = with_request_layers(Router::new().fallback(|headers: HeaderMap| async move {
            request_id(&headers).to_string()
        }));

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = response.headers()[X_REQUEST_ID].to_str().unwrap().to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes, echoed.as_bytes());
        assert!(uuid::Uuid::parse_str(&echoed).is_ok());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(X_REQUEST_ID, "given")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[X_REQUEST_ID], "given");
    }

    #[test]
    fn test_missing_request_id() {
        assert_eq!(request_id(&HeaderMap::new()), "unknown");
    }
}
