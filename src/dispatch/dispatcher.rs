//! Per-subscription exchange state machine.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use axum::http::StatusCode;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::config::{Mode, Protocol, SubscriptionSettings};
use crate::dispatch::{ExchangeReply, ExchangeState, ExchangeToken, ResponseWriteError};
use crate::downstream::{Downstream, DownstreamCall, DownstreamError, DownstreamReply, Operation};
use crate::error::BridgeError;
use crate::http::response::{self, Response, TransportResponse};
use crate::message::{normalize, Message};
use crate::net::inbound::InboundRequest;
use crate::observability::metrics;
use crate::observer::MessageObserver;
use crate::predicate;
use crate::registry::{Offer, Registry, RouteKey, ServiceHandler, SubscriptionId};

type Armed = oneshot::Sender<Result<Message, BridgeError>>;

/// How the reply of a captured call is encoded.
#[derive(Debug, Clone)]
enum Encoding {
    Http,
    Soap { operation: String },
}

#[derive(Debug)]
struct PendingExchange {
    token: ExchangeToken,
    encoding: Encoding,
}

#[derive(Debug)]
struct Slot {
    state: ExchangeState,
    open: bool,
    armed: Option<Armed>,
    pending: Option<PendingExchange>,
    inflight: Option<AbortHandle>,
}

impl Slot {
    fn is_armed(&self) -> bool {
        self.armed.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// An exchange is between capture and completion.
    fn is_busy(&self) -> bool {
        match self.state {
            ExchangeState::Captured
            | ExchangeState::Forwarding
            | ExchangeState::AwaitingDownstream
            | ExchangeState::Relaying => true,
            ExchangeState::Responding => self.pending.as_ref().is_some_and(|p| !p.token.is_closed()),
            ExchangeState::Idle | ExchangeState::Matching | ExchangeState::Completed => false,
        }
    }
}

/// Drives the exchanges of one subscription.
pub struct Dispatcher {
    settings: Arc<SubscriptionSettings>,
    owner: SubscriptionId,
    registry: Arc<Registry>,
    downstream: Arc<dyn Downstream>,
    observer: Arc<dyn MessageObserver>,
    slot: Mutex<Slot>,
    me: Weak<Dispatcher>,
}

impl Dispatcher {
    pub fn new(
        settings: Arc<SubscriptionSettings>,
        owner: SubscriptionId,
        registry: Arc<Registry>,
        downstream: Arc<dyn Downstream>,
        observer: Arc<dyn MessageObserver>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            settings,
            owner,
            registry,
            downstream,
            observer,
            slot: Mutex::new(Slot {
                state: ExchangeState::Idle,
                open: false,
                armed: None,
                pending: None,
                inflight: None,
            }),
            me: me.clone(),
        })
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    pub fn owner(&self) -> SubscriptionId {
        self.owner
    }

    pub fn state(&self) -> ExchangeState {
        self.lock().state
    }

    /// Registry key this subscription answers to.
    pub fn route_key(&self) -> RouteKey {
        match &self.settings.soap {
            Some(target) => RouteKey::Operation(target.key()),
            None => RouteKey::Name(self.settings.name.clone()),
        }
    }

    /// A registry handler that offers calls to this dispatcher.
    pub fn handler(&self) -> Arc<dyn ServiceHandler> {
        Arc::new(DispatchHandler {
            dispatcher: self.me.clone(),
        })
    }

    /// Start accepting receives.
    pub fn open(&self) {
        let mut slot = self.lock();
        slot.open = true;
        slot.state = ExchangeState::Idle;
    }

    /// Abort everything in flight and stop accepting receives.
    ///
    /// A pending caller gets the abort reply, a waiting receive gets
    /// [`BridgeError::Cancelled`].
    pub fn close(&self) {
        let (armed, pending, inflight) = {
            let mut slot = self.lock();
            slot.open = false;
            slot.state = ExchangeState::Idle;
            (slot.armed.take(), slot.pending.take(), slot.inflight.take())
        };

        if let Some(task) = inflight {
            task.abort();
            tracing::debug!(subscription = %self.settings.name, "Aborted in-flight proxy exchange");
        }
        if let Some(pending) = pending {
            let exchange_id = pending.token.id();
            if pending.token.resolve(self.abort_response()).is_ok() {
                tracing::info!(subscription = %self.settings.name, %exchange_id, "Pending exchange aborted");
            }
        }
        if let Some(armed) = armed {
            let _ = armed.send(Err(BridgeError::Cancelled));
        }
        self.end_cycle();
    }

    /// Wait for exactly one captured call.
    ///
    /// Dropping the returned future before a call is captured disarms the
    /// subscription again.
    pub async fn receive(&self) -> Result<Message, BridgeError> {
        let rx = {
            let mut slot = self.lock();
            if !slot.open {
                return Err(BridgeError::NotSubscribed);
            }
            if slot.is_armed() {
                return Err(BridgeError::ReceiveInProgress);
            }
            if slot.is_busy() {
                return Err(BridgeError::ExchangePending);
            }
            // SOAP routes are installed under the slot lock so close() either
            // refuses this receive or removes the entry.
            if self.settings.protocol == Protocol::Soap {
                self.registry.register(self.route_key(), self.owner, self.handler())?;
            }
            // A mock exchange whose caller already left is abandoned here.
            slot.pending = None;
            let (tx, rx) = oneshot::channel();
            slot.armed = Some(tx);
            slot.state = ExchangeState::Matching;
            rx
        };

        tracing::debug!(subscription = %self.settings.name, "Waiting for a matching call");
        let mut waiting = Waiting {
            dispatcher: self,
            rx,
            settled: false,
        };
        let result = match (&mut waiting.rx).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Cancelled),
        };
        waiting.settled = true;
        result
    }

    /// Undo an arm nobody consumed.
    fn disarm(&self) {
        let mut slot = self.lock();
        if slot.state != ExchangeState::Matching {
            return;
        }
        slot.armed = None;
        slot.state = ExchangeState::Idle;
        if self.settings.protocol == Protocol::Soap {
            self.registry.deregister(&self.route_key(), self.owner);
        }
        tracing::debug!(subscription = %self.settings.name, "Receive dropped before a capture");
    }

    /// Complete the pending mock exchange.
    pub fn send_response(&self, response: &Response) -> Result<(), BridgeError> {
        let (pending, encoded) = {
            let mut slot = self.lock();
            if !slot.open {
                return Err(BridgeError::NotSubscribed);
            }
            let Some(pending) = slot.pending.as_ref() else {
                return Err(ResponseWriteError::NoPendingExchange.into());
            };
            // Encode first so an invalid response leaves the exchange pending.
            let encoded = self.encode(response, &pending.encoding)?;
            slot.state = ExchangeState::Completed;
            (slot.pending.take(), encoded)
        };
        let Some(pending) = pending else {
            return Err(ResponseWriteError::NoPendingExchange.into());
        };

        let exchange_id = pending.token.id();
        let result = pending.token.resolve(encoded);
        self.end_cycle();
        match &result {
            Ok(()) => tracing::info!(
                subscription = %self.settings.name,
                %exchange_id,
                status = response.status,
                "Response sent"
            ),
            Err(e) => tracing::warn!(subscription = %self.settings.name, %exchange_id, error = %e, "Response not delivered"),
        }
        result.map_err(BridgeError::from)
    }

    /// Offer an inbound call.
    pub fn offer(&self, request: InboundRequest) -> Offer {
        match self.settings.protocol {
            Protocol::HttpBind => self.offer_http(request),
            Protocol::Soap => self.offer_soap(request),
        }
    }

    fn offer_http(&self, request: InboundRequest) -> Offer {
        let request_id = crate::http::request_id(&request.headers).to_string();
        let (armed, message) = {
            let mut slot = self.lock();
            if !slot.open || !slot.is_armed() {
                tracing::debug!(subscription = %self.settings.name, %request_id, "Not armed, passing call on");
                return Offer::Declined(request);
            }

            let message = match normalize(&request.body, &request.headers, self.settings.body_kind) {
                Ok(message) => message,
                Err(e) => {
                    metrics::record_parse_error(Protocol::HttpBind);
                    tracing::warn!(subscription = %self.settings.name, %request_id, error = %e, "Rejecting unparsable body");
                    if let Some(armed) = slot.armed.take() {
                        let _ = armed.send(Err(e.into()));
                    }
                    slot.state = ExchangeState::Idle;
                    return Offer::Declined(request);
                }
            };

            if !predicate::matches(&self.settings.predicates, message.headers(), message.body()) {
                tracing::debug!(subscription = %self.settings.name, %request_id, "Ignoring request");
                return Offer::Declined(request);
            }

            slot.state = ExchangeState::Captured;
            (slot.armed.take(), message)
        };

        match armed {
            Some(armed) => self.accept(armed, message, Encoding::Http, &request_id),
            None => Offer::Declined(request),
        }
    }

    fn offer_soap(&self, mut request: InboundRequest) -> Offer {
        let Some(target) = self.settings.soap.as_ref() else {
            return Offer::Declined(request);
        };
        let request_id = crate::http::request_id(&request.headers).to_string();
        let envelope = request
            .envelope()
            .filter(|envelope| envelope.operation == target.operation)
            .cloned();
        let Some(envelope) = envelope else {
            return Offer::Declined(request);
        };

        let armed = {
            let mut slot = self.lock();
            if !slot.open {
                return Offer::Declined(request);
            }
            if slot.is_busy() || !slot.is_armed() {
                tracing::debug!(subscription = %self.settings.name, %request_id, "Operation busy");
                return Offer::Accepted(
                    future::ready(response::fault(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Server.Busy",
                        "no receive is waiting for this operation",
                    ))
                    .boxed(),
                );
            }
            slot.state = ExchangeState::Captured;
            slot.armed.take()
        };

        let message = Message::new(envelope.args, envelope.headers);
        let encoding = Encoding::Soap {
            operation: envelope.operation,
        };
        match armed {
            Some(armed) => self.accept(armed, message, encoding, &request_id),
            None => Offer::Declined(request),
        }
    }

    /// Captured: notify, then park (mock) or forward (proxy).
    fn accept(&self, armed: Armed, message: Message, encoding: Encoding, request_id: &str) -> Offer {
        let name = self.settings.name.as_str();
        let (token, reply) = ExchangeToken::new();
        let exchange_id = token.id();
        metrics::record_capture(self.settings.protocol, self.settings.mode);
        tracing::info!(subscription = %name, %request_id, %exchange_id, mode = %self.settings.mode, "Captured call");

        self.observer.on_original_message_received(name, &message);

        match self.settings.mode {
            Mode::Mock => {
                self.observer.on_message_received(name, &message);
                {
                    let mut slot = self.lock();
                    if !slot.open {
                        // Closed meanwhile; dropping the token aborts the call.
                        return Offer::Accepted(self.await_reply(reply));
                    }
                    slot.pending = Some(PendingExchange { token, encoding });
                    slot.state = ExchangeState::Responding;
                }
                if armed.send(Ok(message)).is_err() {
                    tracing::debug!(subscription = %name, %exchange_id, "Receiver left before delivery");
                    {
                        let mut slot = self.lock();
                        slot.pending = None;
                        slot.state = ExchangeState::Idle;
                    }
                    self.end_cycle();
                }
            }
            Mode::Proxy => {
                let Some(call) = self.downstream_call(&message) else {
                    let error = DownstreamError::InvalidRequest("no downstream endpoint".into());
                    let _ = token.resolve(self.downstream_failure(&error, &encoding));
                    self.finish(ExchangeState::Completed);
                    let _ = armed.send(Err(error.into()));
                    return Offer::Accepted(self.await_reply(reply));
                };
                let mut slot = self.lock();
                if !slot.open {
                    return Offer::Accepted(self.await_reply(reply));
                }
                slot.state = ExchangeState::Forwarding;
                let task = tokio::spawn(forward(self.me.clone(), call, token, armed, encoding));
                slot.inflight = Some(task.abort_handle());
            }
        }

        Offer::Accepted(self.await_reply(reply))
    }

    fn downstream_call(&self, message: &Message) -> Option<DownstreamCall> {
        let endpoint = self.settings.endpoint.clone()?;
        let operation = match &self.settings.soap {
            Some(target) => Operation::Soap {
                key: target.key(),
                namespace: target.namespace.clone(),
            },
            None => Operation::Endpoint {
                body_kind: self.settings.body_kind,
            },
        };
        Some(DownstreamCall {
            endpoint,
            operation,
            payload: message.body().clone(),
            headers: message.headers().clone(),
            timeout: self.settings.timeout,
            security: self.settings.security.clone(),
        })
    }

    fn encode(&self, response: &Response, encoding: &Encoding) -> Result<TransportResponse, ResponseWriteError> {
        match encoding {
            Encoding::Http => response.to_http(),
            Encoding::Soap { operation } => response.to_soap(
                operation,
                self.settings.soap.as_ref().and_then(|t| t.namespace.as_deref()),
                &self.settings.soap_headers,
            ),
        }
    }

    fn relay_response(&self, reply: &DownstreamReply, encoding: &Encoding) -> TransportResponse {
        match encoding {
            Encoding::Http => response::relay(
                reply.status,
                reply.headers.get("content-type").map(String::as_str),
                reply.raw.clone(),
            ),
            Encoding::Soap { .. } => self
                .encode(&Response::new(200, reply.body.clone()), encoding)
                .unwrap_or_else(|e| {
                    response::fault(StatusCode::BAD_GATEWAY, "Server", &e.to_string())
                }),
        }
    }

    fn downstream_failure(&self, error: &DownstreamError, encoding: &Encoding) -> TransportResponse {
        match encoding {
            Encoding::Http => response::plain(StatusCode::BAD_GATEWAY, "downstream request failed"),
            Encoding::Soap { .. } => response::fault(StatusCode::BAD_GATEWAY, "Server", &error.to_string()),
        }
    }

    fn abort_response(&self) -> TransportResponse {
        match self.settings.protocol {
            Protocol::HttpBind => response::plain(StatusCode::SERVICE_UNAVAILABLE, "subscription closed"),
            Protocol::Soap => response::fault(
                StatusCode::SERVICE_UNAVAILABLE,
                "Server.Unavailable",
                "subscription closed",
            ),
        }
    }

    /// Transport future for an accepted call.
    fn await_reply(&self, reply: ExchangeReply) -> BoxFuture<'static, TransportResponse> {
        let aborted = self.abort_response();
        async move { reply.await.unwrap_or(aborted) }.boxed()
    }

    fn set_state(&self, state: ExchangeState) {
        self.lock().state = state;
    }

    /// Terminal bookkeeping, done before the armed receive is woken so a
    /// follow-up receive sees a settled slot.
    fn finish(&self, state: ExchangeState) {
        {
            let mut slot = self.lock();
            slot.inflight = None;
            if slot.open {
                slot.state = state;
            }
        }
        self.end_cycle();
    }

    /// SOAP entries live for one receive cycle.
    fn end_cycle(&self) {
        if self.settings.protocol == Protocol::Soap {
            self.registry.deregister(&self.route_key(), self.owner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().expect("dispatcher mutex poisoned")
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscription", &self.settings.name)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .finish()
    }
}

/// Proxy leg, run on its own task so the transport future only waits for
/// the token.
async fn forward(
    dispatcher: Weak<Dispatcher>,
    call: DownstreamCall,
    token: ExchangeToken,
    armed: Armed,
    encoding: Encoding,
) {
    let Some(this) = dispatcher.upgrade() else {
        return;
    };
    let name = this.settings.name.clone();
    let exchange_id = token.id();

    this.set_state(ExchangeState::AwaitingDownstream);
    let result = this.downstream.invoke(call).await;

    match result {
        Ok(reply) => {
            this.set_state(ExchangeState::Relaying);
            let message = Message::new(reply.body.clone(), reply.headers.clone());
            this.observer.on_message_received(&name, &message);
            let relayed = this.relay_response(&reply, &encoding);
            if let Err(e) = token.resolve(relayed) {
                tracing::warn!(subscription = %name, %exchange_id, error = %e, "Caller left before relay");
            } else {
                tracing::info!(subscription = %name, %exchange_id, status = reply.status, "Downstream reply relayed");
            }
            this.finish(ExchangeState::Completed);
            let _ = armed.send(Ok(message));
        }
        Err(e) => {
            tracing::warn!(subscription = %name, %exchange_id, error = %e, "Downstream call failed");
            let _ = token.resolve(this.downstream_failure(&e, &encoding));
            this.finish(ExchangeState::Completed);
            let _ = armed.send(Err(e.into()));
        }
    }
}

/// An armed receive in progress.
struct Waiting<'a> {
    dispatcher: &'a Dispatcher,
    rx: oneshot::Receiver<Result<Message, BridgeError>>,
    settled: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.dispatcher.disarm();
        }
    }
}

/// Registry entry pointing back at a dispatcher.
struct DispatchHandler {
    dispatcher: Weak<Dispatcher>,
}

impl ServiceHandler for DispatchHandler {
    fn offer(&self, request: InboundRequest) -> Offer {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.offer(request),
            None => Offer::Declined(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SubscriptionConfig, SoapConfig};
    use crate::downstream::DownstreamReply;
    use crate::observer::{ChannelObserver, Notification};
    use axum::body::Bytes;
    use axum::http::{HeaderMap, HeaderValue, Method, Uri};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Downstream that echoes `{"echo": payload}` or fails.
    struct FakeDownstream {
        fail: bool,
    }

    impl Downstream for FakeDownstream {
        fn invoke(&self, call: DownstreamCall) -> BoxFuture<'static, Result<DownstreamReply, DownstreamError>> {
            let fail = self.fail;
            async move {
                if fail {
                    return Err(DownstreamError::Transport("connection refused".into()));
                }
                let body = json!({"echo": call.payload});
                Ok(DownstreamReply {
                    status: 200,
                    headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
                    raw: Bytes::from(body.to_string()),
                    body,
                })
            }
            .boxed()
        }
    }

    /// Downstream that never answers.
    struct StalledDownstream;

    impl Downstream for StalledDownstream {
        fn invoke(&self, _call: DownstreamCall) -> BoxFuture<'static, Result<DownstreamReply, DownstreamError>> {
            future::pending().boxed()
        }
    }

    fn http_settings(mode: Option<Mode>) -> SubscriptionSettings {
        let config = SubscriptionConfig {
            name: "ping".into(),
            kind: Some("http-bind".into()),
            mode,
            port: 0,
            path: Some("/svc".into()),
            endpoint: mode.map(|_| "http://127.0.0.1:9/real".into()),
            ..Default::default()
        };
        SubscriptionSettings::compile(&config).unwrap()
    }

    fn soap_settings() -> SubscriptionSettings {
        let config = SubscriptionConfig {
            name: "opa".into(),
            kind: Some("soap".into()),
            port: 0,
            path: Some("/soap".into()),
            soap: Some(SoapConfig {
                service: Some("ServiceA".into()),
                port: Some("PortA".into()),
                operation: Some("OpA".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        SubscriptionSettings::compile(&config).unwrap()
    }

    fn dispatcher(
        settings: SubscriptionSettings,
        fail: bool,
    ) -> (Arc<Dispatcher>, Arc<Registry>, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        dispatcher_with(settings, Arc::new(FakeDownstream { fail }))
    }

    fn dispatcher_with(
        settings: SubscriptionSettings,
        downstream: Arc<dyn Downstream>,
    ) -> (Arc<Dispatcher>, Arc<Registry>, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let registry = Arc::new(Registry::new());
        let (observer, rx) = ChannelObserver::new();
        let dispatcher = Dispatcher::new(
            Arc::new(settings),
            SubscriptionId::new(),
            Arc::clone(&registry),
            downstream,
            Arc::new(observer),
        );
        dispatcher.open();
        (dispatcher, registry, rx)
    }

    fn post(body: &str) -> InboundRequest {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        InboundRequest::new(Method::POST, Uri::from_static("/svc"), headers, Bytes::from(body.to_string()))
    }

    fn soap_post(operation: &str) -> InboundRequest {
        let body = format!("<Envelope><Body><{op}><x>1</x></{op}></Body></Envelope>", op = operation);
        InboundRequest::new(Method::POST, Uri::from_static("/soap"), HeaderMap::new(), Bytes::from(body))
    }

    /// Arm a receive on a background task and wait until the slot is armed.
    async fn arm(dispatcher: &Arc<Dispatcher>) -> tokio::task::JoinHandle<Result<Message, BridgeError>> {
        let d = Arc::clone(dispatcher);
        let handle = tokio::spawn(async move { d.receive().await });
        while dispatcher.state() != ExchangeState::Matching {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle
    }

    async fn body_text(response: TransportResponse) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn accepted(offer: Offer) -> BoxFuture<'static, TransportResponse> {
        match offer {
            Offer::Accepted(fut) => fut,
            Offer::Declined(req) => panic!("declined {}", req.uri),
        }
    }

    #[tokio::test]
    async fn test_unarmed_http_bind_declines() {
        let (d, _, _) = dispatcher(http_settings(None), false);
        assert!(matches!(d.offer(post(r#"{"op":"ping"}"#)), Offer::Declined(_)));
    }

    #[tokio::test]
    async fn test_mock_exchange() {
        let (d, _, mut notes) = dispatcher(http_settings(None), false);
        let receive = arm(&d).await;

        let reply = accepted(d.offer(post(r#"{"op":"ping"}"#)));
        let message = receive.await.unwrap().unwrap();
        assert_eq!(message.body(), &json!({"op": "ping"}));
        assert_eq!(d.state(), ExchangeState::Responding);

        assert!(matches!(notes.recv().await, Some(Notification::OriginalMessageReceived { .. })));
        assert!(matches!(notes.recv().await, Some(Notification::MessageReceived { .. })));

        d.send_response(&Response::new(200, "pong")).unwrap();
        let response = reply.await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "pong");
        assert_eq!(d.state(), ExchangeState::Completed);

        // Exactly once.
        assert!(matches!(
            d.send_response(&Response::new(200, "again")),
            Err(BridgeError::ResponseWrite(ResponseWriteError::NoPendingExchange))
        ));
    }

    #[tokio::test]
    async fn test_second_receive_and_capture_while_pending() {
        let (d, _, _) = dispatcher(http_settings(None), false);
        let receive = arm(&d).await;
        assert!(matches!(d.receive().await, Err(BridgeError::ReceiveInProgress)));

        let _reply = accepted(d.offer(post(r#"{"op":"ping"}"#)));
        receive.await.unwrap().unwrap();

        assert!(matches!(d.receive().await, Err(BridgeError::ExchangePending)));
        assert!(matches!(d.offer(post(r#"{"op":"ping"}"#)), Offer::Declined(_)));
    }

    #[tokio::test]
    async fn test_invalid_response_keeps_exchange_pending() {
        let (d, _, _) = dispatcher(http_settings(None), false);
        let receive = arm(&d).await;
        let reply = accepted(d.offer(post("{}")));
        receive.await.unwrap().unwrap();

        assert!(matches!(
            d.send_response(&Response::new(7, "bad")),
            Err(BridgeError::ResponseWrite(ResponseWriteError::InvalidResponse(_)))
        ));
        d.send_response(&Response::new(202, 42)).unwrap();
        let response = reply.await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_text(response).await, "42");
    }

    #[tokio::test]
    async fn test_parse_error_rejects_receive_and_passes_on() {
        let (d, _, _) = dispatcher(http_settings(None), false);
        let receive = arm(&d).await;
        assert!(matches!(d.offer(post("{not json")), Offer::Declined(_)));
        assert!(matches!(receive.await.unwrap(), Err(BridgeError::Parse(_))));
        assert_eq!(d.state(), ExchangeState::Idle);
    }

    #[tokio::test]
    async fn test_close_aborts_pending_and_waiting() {
        let (d, _, _) = dispatcher(http_settings(None), false);
        let receive = arm(&d).await;
        let reply = accepted(d.offer(post("{}")));
        receive.await.unwrap().unwrap();

        d.close();
        let response = reply.await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "subscription closed");
        assert!(matches!(d.receive().await, Err(BridgeError::NotSubscribed)));

        d.open();
        let waiting = arm(&d).await;
        d.close();
        assert!(matches!(waiting.await.unwrap(), Err(BridgeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_proxy_relays_downstream_reply() {
        let (d, _, mut notes) = dispatcher(http_settings(Some(Mode::Proxy)), false);
        let receive = arm(&d).await;

        let reply = accepted(d.offer(post(r#"{"op":"ping"}"#)));
        let response = reply.await;
        assert_eq!(response.status(), StatusCode::OK);
        let relayed: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(relayed, json!({"echo": {"op": "ping"}}));

        let message = receive.await.unwrap().unwrap();
        assert_eq!(message.body(), &json!({"echo": {"op": "ping"}}));
        match notes.recv().await {
            Some(Notification::OriginalMessageReceived { message, .. }) => {
                assert_eq!(message.body(), &json!({"op": "ping"}))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(notes.recv().await, Some(Notification::MessageReceived { .. })));

        assert!(matches!(
            d.send_response(&Response::new(200, "ignored")),
            Err(BridgeError::ResponseWrite(ResponseWriteError::NoPendingExchange))
        ));
    }

    #[tokio::test]
    async fn test_proxy_failure_propagates() {
        let (d, _, _) = dispatcher(http_settings(Some(Mode::Proxy)), true);
        let receive = arm(&d).await;

        let response = accepted(d.offer(post("{}"))).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(matches!(receive.await.unwrap(), Err(BridgeError::Downstream(_))));
        assert_eq!(d.state(), ExchangeState::Completed);
    }

    #[tokio::test]
    async fn test_soap_cycle_registration() {
        let (d, registry, _) = dispatcher(soap_settings(), false);
        assert!(registry.lookup(&d.route_key()).is_none());

        let receive = arm(&d).await;
        while registry.lookup(&d.route_key()).is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(matches!(d.offer(soap_post("OpB")), Offer::Declined(_)));
        let reply = accepted(d.offer(soap_post("OpA")));
        let message = receive.await.unwrap().unwrap();
        assert_eq!(message.body(), &json!({"x": "1"}));

        // Busy while pending.
        let busy = accepted(d.offer(soap_post("OpA"))).await;
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);

        d.send_response(&Response::new(200, json!({"y": 2}))).unwrap();
        let text = body_text(reply.await).await;
        assert!(text.contains("<OpAResponse><y>2</y></OpAResponse>"));
        assert!(registry.lookup(&d.route_key()).is_none());
    }

    #[tokio::test]
    async fn test_dropped_receive_disarms() {
        let (d, _, _) = dispatcher(http_settings(None), false);
        assert!(tokio::time::timeout(Duration::from_millis(20), d.receive()).await.is_err());

        assert_eq!(d.state(), ExchangeState::Idle);
        assert!(matches!(d.offer(post(r#"{"op":"ping"}"#)), Offer::Declined(_)));

        // The next receive arms normally.
        let receive = arm(&d).await;
        let reply = accepted(d.offer(post(r#"{"op":"ping"}"#)));
        receive.await.unwrap().unwrap();
        d.send_response(&Response::new(200, "pong")).unwrap();
        assert_eq!(reply.await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dropped_soap_receive_removes_route() {
        let (d, registry, _) = dispatcher(soap_settings(), false);
        let receive = arm(&d).await;
        assert!(registry.lookup(&d.route_key()).is_some());

        receive.abort();
        let _ = receive.await;
        assert!(registry.is_empty());
        assert_eq!(d.state(), ExchangeState::Idle);
        assert!(matches!(d.offer(soap_post("OpA")), Offer::Declined(_)));
    }

    #[tokio::test]
    async fn test_close_while_soap_receive_waits() {
        let (d, registry, _) = dispatcher(soap_settings(), false);
        let receive = arm(&d).await;
        d.close();
        assert!(matches!(receive.await.unwrap(), Err(BridgeError::Cancelled)));
        assert!(registry.is_empty());

        // A receive after close never installs a route.
        assert!(matches!(d.receive().await, Err(BridgeError::NotSubscribed)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_during_downstream_call() {
        let (d, _, _) = dispatcher_with(http_settings(Some(Mode::Proxy)), Arc::new(StalledDownstream));
        let receive = arm(&d).await;
        let reply = accepted(d.offer(post(r#"{"op":"ping"}"#)));
        while d.state() != ExchangeState::AwaitingDownstream {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        d.close();
        let response = reply.await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "subscription closed");
        assert!(matches!(receive.await.unwrap(), Err(BridgeError::Cancelled)));
        assert_eq!(d.state(), ExchangeState::Idle);
    }
}
