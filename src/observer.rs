//! Engine notifications.
//!
//! The orchestration engine learns about captured calls through a
//! [`MessageObserver`]. Notifications are fire-and-forget: observers must not
//! block and cannot fail the exchange.

use tokio::sync::mpsc;

use crate::message::Message;

pub trait MessageObserver: Send + Sync {
    /// A call was captured, before any forwarding decision.
    fn on_original_message_received(&self, subscription: &str, message: &Message);

    /// The final message of an exchange: the captured call (mock) or the
    /// downstream reply (proxy).
    fn on_message_received(&self, subscription: &str, message: &Message);
}

/// Logs every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MessageObserver for TracingObserver {
    fn on_original_message_received(&self, subscription: &str, message: &Message) {
        tracing::info!(subscription, body = %message.body(), "Original message received");
    }

    fn on_message_received(&self, subscription: &str, message: &Message) {
        tracing::info!(subscription, body = %message.body(), "Message received");
    }
}

/// A notification forwarded by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    OriginalMessageReceived { subscription: String, message: Message },
    MessageReceived { subscription: String, message: Message },
}

impl Notification {
    pub fn subscription(&self) -> &str {
        match self {
            Notification::OriginalMessageReceived { subscription, .. }
            | Notification::MessageReceived { subscription, .. } => subscription,
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            Notification::OriginalMessageReceived { message, .. } | Notification::MessageReceived { message, .. } => {
                message
            }
        }
    }
}

/// Forwards notifications over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("Notification dropped, receiver gone");
        }
    }
}

impl MessageObserver for ChannelObserver {
    fn on_original_message_received(&self, subscription: &str, message: &Message) {
        self.emit(Notification::OriginalMessageReceived {
            subscription: subscription.to_string(),
            message: message.clone(),
        });
    }

    fn on_message_received(&self, subscription: &str, message: &Message) {
        self.emit(Notification::MessageReceived {
            subscription: subscription.to_string(),
            message: message.clone(),
        });
    }
}
