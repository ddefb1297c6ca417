//! Startup orchestration and the standalone runner loop.
//!
//! # Responsibilities
//! - Subscribe every configured subscription, in file order
//! - Roll back already started subscriptions when one fails
//! - Drive `receive_message` / `send_response` for each subscription
//! - Fire configured publications once
//!
//! # Design Decisions
//! - Fail fast: the first subscribe error stops startup
//! - Mock captures are answered with the subscription's canned response,
//!   or an empty 200 when none is configured

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::{Mode, PublicationSettings, SubscriptionSettings};
use crate::error::BridgeError;
use crate::http::Response;
use crate::lifecycle::{Bridge, Shutdown, Subscription};

/// Subscribe everything in `settings`.
pub async fn start_all(
    bridge: &Bridge,
    settings: Vec<SubscriptionSettings>,
) -> Result<Vec<Arc<Subscription>>, BridgeError> {
    let mut started: Vec<Arc<Subscription>> = Vec::with_capacity(settings.len());

    for settings in settings {
        let subscription = Arc::new(bridge.from_settings(settings));
        if let Err(e) = subscription.subscribe().await {
            tracing::error!(subscription = %subscription.name(), error = %e, "Subscribe failed, rolling back");
            stop_all(&started).await;
            return Err(e);
        }
        started.push(subscription);
    }

    tracing::info!(subscriptions = started.len(), "All subscriptions started");
    Ok(started)
}

/// Unsubscribe everything that is still subscribed.
pub async fn stop_all(subscriptions: &[Arc<Subscription>]) {
    for subscription in subscriptions.iter().rev() {
        match subscription.unsubscribe().await {
            Ok(()) | Err(BridgeError::NotSubscribed) => {}
            Err(e) => tracing::warn!(subscription = %subscription.name(), error = %e, "Unsubscribe failed"),
        }
    }
}

/// Publish everything in `publications`, in file order. Failures are
/// logged and counted; they do not stop the remaining publications.
pub async fn publish_all(bridge: &Bridge, publications: Vec<PublicationSettings>) -> usize {
    let mut failed = 0;
    for settings in publications {
        let publisher = bridge.publisher_from_settings(settings);
        match publisher.publish().await {
            Ok(result) => tracing::info!(publication = %publisher.name(), %result, "Publication answered"),
            Err(_) => failed += 1,
        }
    }
    failed
}

/// Spawn the receive/respond loop of one subscription.
pub fn spawn_runner(subscription: Arc<Subscription>, shutdown: &Shutdown) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                received = subscription.receive_message() => received,
                _ = stop.recv() => break,
            };

            match received {
                Ok(message) => {
                    if subscription.settings().mode == Mode::Proxy {
                        continue;
                    }
                    let response = subscription
                        .settings()
                        .response
                        .clone()
                        .unwrap_or_else(|| Response::new(200, Value::Null));
                    tracing::debug!(
                        subscription = %subscription.name(),
                        body = %message.body(),
                        status = response.status,
                        "Answering capture"
                    );
                    if let Err(e) = subscription.send_response(&response) {
                        tracing::warn!(subscription = %subscription.name(), error = %e, "Canned response not sent");
                    }
                }
                Err(BridgeError::Cancelled) | Err(BridgeError::NotSubscribed) => break,
                Err(e @ (BridgeError::ReceiveInProgress | BridgeError::ExchangePending)) => {
                    tracing::error!(subscription = %subscription.name(), error = %e, "Runner lost its exchange");
                    break;
                }
                Err(e) => {
                    tracing::warn!(subscription = %subscription.name(), error = %e, "Exchange failed");
                }
            }
        }
        tracing::debug!(subscription = %subscription.name(), "Runner stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, ListenerConfig};

    const CONFIG: &str = r#"
[[subscriptions]]
name = "ping"
type = "http-bind"
port = 0
path = "/ping"

[subscriptions.response]
status = 200
payload = "pong"

[[subscriptions]]
name = "health"
type = "http-bind"
port = 0
path = "/health"
"#;

    fn bridge() -> Bridge {
        Bridge::new(ListenerConfig {
            bind_host: "127.0.0.1".into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_start_all_shares_one_listener() {
        let (_, settings) = parse_config(CONFIG).unwrap();
        let bridge = bridge();
        let subscriptions = start_all(&bridge, settings).await.unwrap();
        assert_eq!(subscriptions.len(), 2);
        assert_eq!(bridge.pool().ref_count(0).await, 2);

        stop_all(&subscriptions).await;
        assert_eq!(bridge.pool().active_listeners().await, 0);
    }

    #[tokio::test]
    async fn test_start_all_rolls_back_on_failure() {
        let (_, mut settings) = parse_config(CONFIG).unwrap();
        // Same name twice: the second subscribe hits the registry.
        settings[1].name = "ping".into();
        let bridge = bridge();
        let err = start_all(&bridge, settings).await.unwrap_err();
        assert!(matches!(err, BridgeError::Registry(_)));
        assert_eq!(bridge.pool().active_listeners().await, 0);
        assert!(bridge.registry().is_empty());
    }

    #[tokio::test]
    async fn test_runner_answers_with_canned_response() {
        let (_, settings) = parse_config(CONFIG).unwrap();
        let bridge = bridge();
        let subscriptions = start_all(&bridge, settings).await.unwrap();
        let addr = subscriptions[0].local_addr().await.unwrap();

        let shutdown = Shutdown::new();
        let runners: Vec<_> = subscriptions
            .iter()
            .map(|subscription| spawn_runner(Arc::clone(subscription), &shutdown))
            .collect();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let (status, body) = post(addr, "/ping").await;
        assert_eq!(status, 200);
        assert_eq!(body, "pong");

        let (status, body) = post(addr, "/health").await;
        assert_eq!(status, 200);
        assert_eq!(body, "");

        stop_all(&subscriptions).await;
        shutdown.trigger();
        for runner in runners {
            runner.await.unwrap();
        }
    }

    async fn post(addr: std::net::SocketAddr, path: &str) -> (u16, String) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let body = "{}";
        let request = format!(
            "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            path,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        let status = raw[9..12].parse().unwrap();
        let body = raw.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
        (status, body)
    }
}
