use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Topic-based publish/subscribe boundary.
///
/// The engine and dispatcher only ever see this trait; the concrete
/// transport (websocket fan-out, message broker, in-process broadcast) is
/// injected by the embedder.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Value) -> Result<(), PublishError>;
}

#[derive(Debug)]
pub struct PublishError(pub String);

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "publish failed: {}", self.0)
    }
}

impl std::error::Error for PublishError {}

/// In-process broadcast hub, one channel per topic.
pub struct BroadcastBus {
    channels: DashMap<String, broadcast::Sender<Value>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        let sender = self
            .channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Remove a topic channel.
    pub fn remove(&self, topic: &str) {
        self.channels.remove(topic);
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for BroadcastBus {
    /// No-op if nobody is listening.
    fn publish(&self, topic: &str, payload: Value) -> Result<(), PublishError> {
        if let Some(sender) = self.channels.get(topic) {
            let _ = sender.send(payload);
        }
        Ok(())
    }
}
