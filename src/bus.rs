//! Fan-out of ingested telemetry to downstream subscribers.

use tokio::sync::broadcast;
use tracing::trace;

use crate::error::PublishError;

/// Topic telemetry snapshots are republished on.
pub const LAPTOP_UPDATES_TOPIC: &str = "laptop-updates";

/// One published message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Destination for republished messages.
#[tonic::async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// In-process bus backed by a tokio broadcast channel.
///
/// Subscribers that fall more than `capacity` messages behind lose the oldest
/// ones; publishers never wait.
#[derive(Clone, Debug)]
pub struct BroadcastBus {
    sender: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receives every message published from now on, on every topic.
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[tonic::async_trait]
impl Publisher for BroadcastBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };

        let receivers = self
            .sender
            .send(message)
            .map_err(|_| PublishError::NoSubscribers(topic.to_string()))?;
        trace!("published to {topic} for {receivers} subscribers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let bus = BroadcastBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(LAPTOP_UPDATES_TOPIC, b"{}".to_vec())
            .await
            .unwrap();

        for rx in [&mut first, &mut second] {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.topic, LAPTOP_UPDATES_TOPIC);
            assert_eq!(message.payload, b"{}");
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_fails() {
        let bus = BroadcastBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);

        let err = bus.publish("t", vec![1]).await.unwrap_err();
        assert!(matches!(err, PublishError::NoSubscribers(topic) if topic == "t"));
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let bus = BroadcastBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish("t", vec![1]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, vec![1]);
    }
}
