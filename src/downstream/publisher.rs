//! One-shot outbound SOAP calls.

use std::sync::Arc;

use serde_json::Value;

use crate::config::PublicationSettings;
use crate::downstream::{Downstream, DownstreamCall, DownstreamError, Operation};

/// Calls one configured SOAP operation and hands back the decoded result.
pub struct Publisher {
    settings: Arc<PublicationSettings>,
    downstream: Arc<dyn Downstream>,
}

impl Publisher {
    pub fn new(settings: Arc<PublicationSettings>, downstream: Arc<dyn Downstream>) -> Self {
        Self { settings, downstream }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &PublicationSettings {
        &self.settings
    }

    /// Post the request envelope and decode the reply.
    ///
    /// A SOAP fault, an HTTP error status and a timeout are all errors.
    pub async fn publish(&self) -> Result<Value, DownstreamError> {
        let target = &self.settings.target;
        let call = DownstreamCall {
            endpoint: self.settings.endpoint.clone(),
            operation: Operation::Soap {
                key: target.key(),
                namespace: target.namespace.clone(),
            },
            payload: self.settings.payload.clone(),
            headers: self.settings.headers.clone(),
            timeout: self.settings.timeout,
            security: self.settings.security.clone(),
        };

        tracing::debug!(
            publication = %self.settings.name,
            endpoint = %self.settings.endpoint,
            operation = %target.operation,
            "Publishing"
        );
        match self.downstream.invoke(call).await {
            Ok(reply) => {
                tracing::info!(publication = %self.settings.name, status = reply.status, "Published");
                Ok(reply.body)
            }
            Err(e) => {
                tracing::warn!(publication = %self.settings.name, error = %e, "Publish failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("publication", &self.settings.name)
            .field("endpoint", &self.settings.endpoint.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PublicationConfig, SoapConfig};
    use crate::downstream::DownstreamReply;
    use axum::body::Bytes;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records the call and answers with a fixed result.
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<DownstreamCall>>,
    }

    impl Downstream for Recording {
        fn invoke(&self, call: DownstreamCall) -> BoxFuture<'static, Result<DownstreamReply, DownstreamError>> {
            self.calls.lock().unwrap().push(call);
            async {
                Ok(DownstreamReply {
                    status: 200,
                    headers: BTreeMap::new(),
                    body: json!({"receipt": "r-1"}),
                    raw: Bytes::new(),
                })
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_publish_builds_soap_call() {
        let config = PublicationConfig {
            name: "charge".into(),
            endpoint: Some("http://127.0.0.1:9/billing".into()),
            soap: Some(SoapConfig {
                service: Some("Billing".into()),
                port: Some("BillingPort".into()),
                operation: Some("Charge".into()),
                namespace: Some("urn:billing".into()),
                ..Default::default()
            }),
            payload: json!({"amount": 3}),
            headers: BTreeMap::from([("Session".to_string(), "s-9".to_string())]),
            ..Default::default()
        };
        let settings = PublicationSettings::compile(&config).unwrap();
        let downstream = Arc::new(Recording::default());
        let publisher = Publisher::new(Arc::new(settings), downstream.clone());

        assert_eq!(publisher.publish().await.unwrap(), json!({"receipt": "r-1"}));

        let calls = downstream.calls.lock().unwrap();
        let call = &calls[0];
        assert_eq!(call.endpoint.as_str(), "http://127.0.0.1:9/billing");
        assert_eq!(call.payload, json!({"amount": 3}));
        assert_eq!(call.headers["Session"], "s-9");
        assert_eq!(call.timeout, crate::downstream::DEFAULT_TIMEOUT);
        match &call.operation {
            Operation::Soap { key, namespace } => {
                assert_eq!(key.operation, "Charge");
                assert_eq!(namespace.as_deref(), Some("urn:billing"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
