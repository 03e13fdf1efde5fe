//! Process-wide publish/subscribe bus for internal traffic events
//!
//! Traffic is published on two topics: [`Topic::Inbound`] carries messages
//! received by this process and [`Topic::Outbound`] carries envelopes sent
//! to peers. The bus is an injected capability ([`EventBus`]); [`LocalBus`]
//! is the in-process implementation.
//!
//! Every subscription owns a bounded channel, so a slow subscriber slows
//! its publishers down instead of losing events. Subscriptions whose
//! receiver is gone are pruned on the next publish.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Per-subscription channel capacity
pub const SUBSCRIPTION_CAPACITY: usize = 10;

/// Named bus topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Inbound,
    Outbound,
}

impl Topic {
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Inbound => "inbound",
            Topic::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type tag and human-readable rendering of a payload
pub trait Inspect {
    /// Short name of the payload kind
    fn type_tag(&self) -> &'static str;

    /// Debug rendering shown to live listeners
    fn render(&self) -> String;
}

/// Message data carried between processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data, carried on the wire as `{"$bytes": "<base64>"}`
    Bytes(#[serde(with = "bytes_repr")] Vec<u8>),
    Json(serde_json::Value),
}

/// Wire form of [`Payload::Bytes`]
mod bytes_repr {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Encoded {
        #[serde(rename = "$bytes")]
        data: String,
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        Encoded {
            data: STANDARD.encode(bytes),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Encoded::deserialize(deserializer)?;
        STANDARD.decode(&encoded.data).map_err(D::Error::custom)
    }
}

impl Inspect for Payload {
    fn type_tag(&self) -> &'static str {
        match self {
            Payload::Bool(_) => "bool",
            Payload::Int(_) => "int",
            Payload::Float(_) => "float",
            Payload::Text(_) => "string",
            Payload::Bytes(_) => "bytes",
            Payload::Json(_) => "json",
        }
    }

    fn render(&self) -> String {
        match self {
            Payload::Bool(value) => format!("(bool) {}\n", value),
            Payload::Int(value) => format!("(int) {}\n", value),
            Payload::Float(value) => format!("(float) {}\n", value),
            Payload::Text(value) => format!("(string) (len={}) {:?}\n", value.len(), value),
            Payload::Bytes(value) => {
                format!("(bytes) (len={}) {}\n", value.len(), hex::encode(value))
            }
            Payload::Json(value) => format!(
                "(json) {}\n",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            ),
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Int(value)
    }
}

/// A message exchanged with peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message id
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Message body
    pub data: Payload,
}

impl Message {
    pub fn new(data: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data: data.into(),
        }
    }
}

/// A message addressed to a peer host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Message,
    /// Destination host
    pub host: String,
}

/// Event delivered on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Inbound(Message),
    Outbound(Envelope),
}

impl BusEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Inbound(_) => Topic::Inbound,
            BusEvent::Outbound(_) => Topic::Outbound,
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            BusEvent::Inbound(message) => &message.data,
            BusEvent::Outbound(envelope) => &envelope.message.data,
        }
    }

    /// Destination host, empty for inbound events
    pub fn host(&self) -> &str {
        match self {
            BusEvent::Inbound(_) => "",
            BusEvent::Outbound(envelope) => &envelope.host,
        }
    }
}

/// Receiving end of one topic subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    topic: Topic,
    rx: mpsc::Receiver<BusEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Wait for the next event; `None` once the bus dropped this subscription
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }

    /// Take an already delivered event without waiting
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }
}

/// Publish/subscribe capability
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register a new subscription on `topic`
    fn subscribe(&self, topic: Topic) -> Subscription;

    /// Remove a subscription; unknown subscriptions are ignored
    fn unsubscribe(&self, subscription: &Subscription);

    /// Deliver an event to every current subscriber of its topic.
    ///
    /// Returns the number of subscribers that received it.
    async fn publish(&self, event: BusEvent) -> usize;

    /// Number of live subscriptions on a topic
    fn subscriber_count(&self, topic: Topic) -> usize;
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<Topic, Vec<(u64, mpsc::Sender<BusEvent>)>>,
}

/// In-process bus
#[derive(Clone)]
pub struct LocalBus {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIPTION_CAPACITY)
    }

    /// Bus whose subscriptions buffer `capacity` events each
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity,
        }
    }

    pub async fn publish_inbound(&self, message: Message) -> usize {
        self.publish(BusEvent::Inbound(message)).await
    }

    pub async fn publish_outbound(&self, envelope: Envelope) -> usize {
        self.publish(BusEvent::Outbound(envelope)).await
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune(&self, topic: Topic, dead: &[u64]) {
        let mut registry = self.registry();
        if let Some(subscribers) = registry.topics.get_mut(&topic) {
            subscribers.retain(|(id, _)| !dead.contains(id));
        }
        debug!("Pruned {} dead subscription(s) from {}", dead.len(), topic);
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.topics.entry(topic).or_default().push((id, tx));

        debug!("Subscription {} registered on {}", id, topic);
        Subscription { id, topic, rx }
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        let mut registry = self.registry();
        if let Some(subscribers) = registry.topics.get_mut(&subscription.topic) {
            subscribers.retain(|(id, _)| *id != subscription.id);
        }
        debug!(
            "Subscription {} removed from {}",
            subscription.id, subscription.topic
        );
    }

    async fn publish(&self, event: BusEvent) -> usize {
        let topic = event.topic();

        // Snapshot so the lock is not held across sends
        let subscribers = match self.registry().topics.get(&topic) {
            Some(subscribers) => subscribers.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in subscribers {
            match tx.send(event.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            self.prune(topic, &dead);
        }

        delivered
    }

    fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry()
            .topics
            .get(&topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}
