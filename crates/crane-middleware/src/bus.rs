//! The bus seam and an in-process loopback transport.
//!
//! [`BusClient`] is everything the command path and the health report need
//! from a transport: publish bytes to a topic, and report whether the
//! connection is currently up. [`MqttBus`][crate::mqtt::MqttBus] is the
//! production implementation.
//!
//! [`LoopbackBus`] implements the same trait on top of a
//! [`tokio::sync::broadcast`] channel so that every topic subscriber sees
//! every message without any single subscriber blocking the others. It also
//! counts publishes, which makes it a convenient stand-in wherever a test
//! needs to assert that nothing was sent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use crane_types::CraneError;
use tokio::sync::broadcast;
use tracing::warn;

/// Default loopback channel capacity (messages buffered before slow
/// subscribers start lagging).
const DEFAULT_CAPACITY: usize = 256;

/// One message as seen on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish side of a message bus.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Hand `payload` to the transport for `topic`. No acknowledgement from
    /// the receiving device is awaited.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CraneError>;

    /// Live connection flag, read at call time.
    fn is_connected(&self) -> bool;

    /// Endpoint this client was configured with.
    fn url(&self) -> &str;
}

// ────────────────────────────────────────────────────────────────────────────
// LoopbackBus
// ────────────────────────────────────────────────────────────────────────────

/// In-process bus. Publishes are broadcast to every [`TopicSubscriber`]
/// whose topic matches exactly.
#[derive(Debug)]
pub struct LoopbackBus {
    sender: broadcast::Sender<BusMessage>,
    connected: AtomicBool,
    published: AtomicUsize,
}

impl LoopbackBus {
    pub const URL: &'static str = "loopback://local";

    /// Create a connected loopback bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            connected: AtomicBool::new(true),
            published: AtomicUsize::new(0),
        }
    }

    /// Subscribe to messages on exactly `topic`.
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> TopicSubscriber {
        TopicSubscriber {
            topic: topic.into(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Put a message on the bus as if a remote device had published it.
    ///
    /// Returns the number of subscribers that were handed the message.
    /// Device-side messages are not counted by [`publish_count`][Self::publish_count].
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> usize {
        let message = BusMessage {
            topic: topic.into(),
            payload: payload.into(),
        };
        // No subscribers is a normal condition for a broadcast bus.
        self.sender.send(message).unwrap_or(0)
    }

    /// Simulate the transport going down (publishes fail) or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of successful [`BusClient::publish`] calls so far.
    pub fn publish_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl BusClient for LoopbackBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CraneError> {
        if !self.is_connected() {
            return Err(CraneError::Transport(format!(
                "{} is disconnected; cannot publish to {topic}",
                Self::URL
            )));
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn url(&self) -> &str {
        Self::URL
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Topic subscriber
// ────────────────────────────────────────────────────────────────────────────

/// A subscriber that only delivers messages published to its topic.
pub struct TopicSubscriber {
    topic: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl TopicSubscriber {
    /// Wait for the next message on this subscriber's topic.
    ///
    /// Returns `None` when the bus is dropped and no further messages will
    /// arrive. A lagging subscriber skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.topic == self.topic => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take a buffered message for this topic without waiting.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) if message.topic == self.topic => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LoopbackBus::default();
        let mut sub = bus.subscribe_topic("lights/cmd");

        bus.publish("lights/cmd", br#"{"cmd":"on"}"#.to_vec()).await?;

        let received = sub.recv().await.ok_or("no message received")?;
        assert_eq!(received.topic, "lights/cmd");
        assert_eq!(received.payload, br#"{"cmd":"on"}"#.to_vec());
        assert_eq!(bus.publish_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn subscriber_filters_other_topics() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LoopbackBus::default();
        let mut state_sub = bus.subscribe_topic("lights/state");

        bus.publish("lights/cmd", b"{}".to_vec()).await?;
        bus.inject("lights/state", b"{\"boom\":\"on\"}".to_vec());

        let received = state_sub.recv().await.ok_or("no message received")?;
        assert_eq!(received.topic, "lights/state");
        assert!(state_sub.try_recv().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn topic_is_matched_exactly() {
        let bus = LoopbackBus::default();
        let mut sub = bus.subscribe_topic("lights/state");

        bus.inject("lights/state/extra", b"{}".to_vec());

        let result = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(result.is_err(), "prefix matches must not be delivered");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_message() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LoopbackBus::default();
        let mut a = bus.subscribe_topic("lights/state");
        let mut b = bus.subscribe_topic("lights/state");

        assert_eq!(bus.inject("lights/state", b"{}".to_vec()), 2);

        assert_eq!(a.recv().await.ok_or("a")?.payload, b"{}".to_vec());
        assert_eq!(b.recv().await.ok_or("b")?.payload, b"{}".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = LoopbackBus::default();
        assert!(bus.publish("lights/cmd", b"{}".to_vec()).await.is_ok());
        assert_eq!(bus.inject("lights/state", b"{}".to_vec()), 0);
    }

    #[tokio::test]
    async fn disconnected_bus_reports_transport_error() {
        let bus = LoopbackBus::default();
        bus.set_connected(false);
        assert!(!bus.is_connected());

        let err = bus.publish("lights/cmd", b"{}".to_vec()).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(bus.publish_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let bus = LoopbackBus::new(4);
        let mut slow = bus.subscribe_topic("lights/state");

        for i in 0..32u8 {
            bus.inject("lights/state", vec![i]);
        }

        let next = slow.recv().await.expect("subscriber keeps receiving after lag");
        assert!(next.payload[0] >= 28, "oldest messages were dropped");
    }
}
