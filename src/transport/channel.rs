//! Pub/sub channel contract
//!
//! A channel is a named topic shared by a host and its listeners. It
//! carries broadcast messages (fire-and-forget, delivered in publish order
//! to every other subscriber) and presence membership events.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::TransportError;

/// Body of a broadcast message
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Binary(Bytes),
    Json(serde_json::Value),
}

/// A `broadcast`-type message tagged with an event name
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub event: String,
    pub payload: Payload,
}

impl BroadcastMessage {
    pub fn new(event: impl Into<String>, payload: Payload) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Message with an empty JSON object payload
    pub fn signal(event: impl Into<String>) -> Self {
        Self::new(event, Payload::Json(serde_json::Value::Object(Default::default())))
    }
}

/// Role of a room member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Listener,
}

/// State a member publishes through presence tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    /// Member key, unique within the room
    pub user_id: String,
    pub role: Role,
    pub online_at: DateTime<Utc>,
}

impl PresenceState {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            online_at: Utc::now(),
        }
    }

    pub fn host(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Host)
    }

    pub fn listener(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Listener)
    }
}

/// Membership change delivered to presence listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Full membership snapshot, sent on joining
    Sync(Vec<PresenceState>),
    Join(PresenceState),
    Leave(PresenceState),
}

/// Subscription lifecycle of a channel handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Joining,
    Joined,
}

/// A named, subscribable pub/sub channel
///
/// Listeners registered with [`on_broadcast`](Channel::on_broadcast) and
/// [`on_presence`](Channel::on_presence) receive messages only while the
/// handle is joined. Registration may happen before `subscribe`.
#[async_trait]
pub trait Channel: Send + Sync {
    fn topic(&self) -> &str;

    fn state(&self) -> ChannelState;

    /// Join the topic; resolves once joined
    async fn subscribe(&self) -> Result<(), TransportError>;

    /// Leave the topic. Idempotent.
    async fn unsubscribe(&self) -> Result<(), TransportError>;

    /// Publish to every other subscriber without waiting for delivery
    fn send(&self, message: BroadcastMessage) -> Result<(), TransportError>;

    /// Ordered stream of broadcasts tagged `event`
    fn on_broadcast(&self, event: &str) -> UnboundedReceiver<BroadcastMessage>;

    /// Stream of membership events
    fn on_presence(&self) -> UnboundedReceiver<PresenceEvent>;

    /// Publish this member's presence state
    async fn track(&self, state: PresenceState) -> Result<(), TransportError>;

    /// Withdraw this member's presence state
    async fn untrack(&self) -> Result<(), TransportError>;
}
