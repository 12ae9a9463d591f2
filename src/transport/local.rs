//! In-process pub/sub hub
//!
//! Implements the [`Channel`] contract for handles living in one process:
//! ordered fan-out, presence sync on join, and leave events on untrack,
//! unsubscribe, or when a joined handle is dropped. A topic is forgotten
//! once its last handle is dropped, unless it was closed.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::channel::{
    BroadcastMessage, Channel, ChannelState, PresenceEvent, PresenceState,
};

/// Per-handle behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelOptions {
    /// Deliver this handle's own broadcasts back to it
    pub broadcast_self: bool,
}

#[derive(Default)]
struct Topic {
    closed: AtomicBool,
    members: Mutex<HashMap<Uuid, Member>>,
}

struct Member {
    endpoint: Arc<Endpoint>,
    presence: Option<PresenceState>,
}

/// Listener registry of one handle
#[derive(Default)]
struct Endpoint {
    closed: AtomicBool,
    broadcast: Mutex<Vec<(String, UnboundedSender<BroadcastMessage>)>>,
    presence: Mutex<Vec<UnboundedSender<PresenceEvent>>>,
}

impl Endpoint {
    /// Drop every sender so the handle's receivers yield `None`
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.broadcast.lock().clear();
        self.presence.lock().clear();
    }

    fn deliver(&self, message: &BroadcastMessage) {
        self.broadcast.lock().retain(|(event, tx)| {
            if event != &message.event {
                return !tx.is_closed();
            }
            tx.send(message.clone()).is_ok()
        });
    }

    fn notify(&self, event: &PresenceEvent) {
        self.presence.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Registry of topics shared by every channel handle it creates
#[derive(Default, Clone)]
pub struct LocalHub {
    topics: Arc<DashMap<String, Arc<Topic>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// New handle on `topic`
    pub fn channel(&self, topic: &str) -> LocalChannel {
        self.channel_with(topic, ChannelOptions::default())
    }

    pub fn channel_with(&self, topic: &str, options: ChannelOptions) -> LocalChannel {
        let shared = self.topics.entry(topic.to_string()).or_default().clone();
        LocalChannel {
            id: Uuid::new_v4(),
            topic_name: topic.to_string(),
            topics: self.topics.clone(),
            topic: shared,
            endpoint: Arc::new(Endpoint::default()),
            state: Mutex::new(ChannelState::Closed),
            options,
        }
    }

    /// Refuse further subscriptions to `topic` and sends on it
    ///
    /// Every joined handle has its broadcast and presence receivers closed.
    pub fn close_topic(&self, topic: &str) {
        let shared = self.topics.entry(topic.to_string()).or_default().clone();
        shared.closed.store(true, Ordering::SeqCst);
        let members = shared.members.lock();
        for member in members.values() {
            member.endpoint.close();
        }
        tracing::info!("Topic {} closed ({} member(s) dropped)", topic, members.len());
    }

    /// Joined handles on `topic`
    pub fn member_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|t| t.members.lock().len())
            .unwrap_or(0)
    }

    /// Topics currently known to the hub
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

/// Channel handle created by a [`LocalHub`]
pub struct LocalChannel {
    id: Uuid,
    topic_name: String,
    topics: Arc<DashMap<String, Arc<Topic>>>,
    topic: Arc<Topic>,
    endpoint: Arc<Endpoint>,
    state: Mutex<ChannelState>,
    options: ChannelOptions,
}

impl LocalChannel {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn ensure_joined(&self) -> Result<(), TransportError> {
        if *self.state.lock() == ChannelState::Joined {
            Ok(())
        } else {
            Err(TransportError::NotSubscribed(self.topic_name.clone()))
        }
    }

    fn join(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if *state == ChannelState::Joined {
            return Ok(());
        }
        if self.topic.closed.load(Ordering::SeqCst) {
            return Err(TransportError::SubscribeFailed(format!(
                "topic {} is closed",
                self.topic_name
            )));
        }
        *state = ChannelState::Joining;

        let mut members = self.topic.members.lock();
        let snapshot: Vec<PresenceState> =
            members.values().filter_map(|m| m.presence.clone()).collect();
        members.insert(
            self.id,
            Member {
                endpoint: self.endpoint.clone(),
                presence: None,
            },
        );
        self.endpoint.notify(&PresenceEvent::Sync(snapshot));

        *state = ChannelState::Joined;
        tracing::debug!("Channel {} joined {}", self.id, self.topic_name);
        Ok(())
    }

    fn leave(&self) {
        let mut state = self.state.lock();
        if *state == ChannelState::Closed {
            return;
        }

        let mut members = self.topic.members.lock();
        if let Some(member) = members.remove(&self.id) {
            if let Some(presence) = member.presence {
                let event = PresenceEvent::Leave(presence);
                for other in members.values() {
                    other.endpoint.notify(&event);
                }
            }
        }

        *state = ChannelState::Closed;
        tracing::debug!("Channel {} left {}", self.id, self.topic_name);
    }

    /// Forget the topic if this is the last handle on it
    fn release_topic(&self) {
        // The registry holds one reference and this handle the other.
        let removed = self.topics.remove_if(&self.topic_name, |_, topic| {
            Arc::ptr_eq(topic, &self.topic)
                && Arc::strong_count(topic) <= 2
                && !topic.closed.load(Ordering::SeqCst)
        });
        if removed.is_some() {
            tracing::debug!("Topic {} released", self.topic_name);
        }
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn topic(&self) -> &str {
        &self.topic_name
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    async fn subscribe(&self) -> Result<(), TransportError> {
        self.join()
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.leave();
        Ok(())
    }

    fn send(&self, message: BroadcastMessage) -> Result<(), TransportError> {
        self.ensure_joined()?;
        if self.topic.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if message.event.is_empty() {
            return Err(TransportError::SendFailed(format!(
                "empty event name on {}",
                self.topic_name
            )));
        }
        let members = self.topic.members.lock();
        for (id, member) in members.iter() {
            if *id != self.id || self.options.broadcast_self {
                member.endpoint.deliver(&message);
            }
        }
        Ok(())
    }

    fn on_broadcast(&self, event: &str) -> UnboundedReceiver<BroadcastMessage> {
        let (tx, rx) = unbounded_channel();
        if !self.endpoint.closed.load(Ordering::SeqCst) {
            self.endpoint.broadcast.lock().push((event.to_string(), tx));
        }
        rx
    }

    fn on_presence(&self) -> UnboundedReceiver<PresenceEvent> {
        let (tx, rx) = unbounded_channel();
        if !self.endpoint.closed.load(Ordering::SeqCst) {
            self.endpoint.presence.lock().push(tx);
        }
        rx
    }

    async fn track(&self, state: PresenceState) -> Result<(), TransportError> {
        self.ensure_joined()?;
        let mut members = self.topic.members.lock();
        if let Some(member) = members.get_mut(&self.id) {
            member.presence = Some(state.clone());
        }
        let event = PresenceEvent::Join(state);
        for member in members.values() {
            member.endpoint.notify(&event);
        }
        Ok(())
    }

    async fn untrack(&self) -> Result<(), TransportError> {
        self.ensure_joined()?;
        let mut members = self.topic.members.lock();
        let previous = members.get_mut(&self.id).and_then(|m| m.presence.take());
        if let Some(presence) = previous {
            let event = PresenceEvent::Leave(presence);
            for member in members.values() {
                member.endpoint.notify(&event);
            }
        }
        Ok(())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.leave();
        self.release_topic();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel::{Payload, Role};

    fn message(event: &str, n: u8) -> BroadcastMessage {
        BroadcastMessage::new(event, Payload::Binary(bytes::Bytes::from(vec![n])))
    }

    #[tokio::test]
    async fn test_ordered_delivery_excludes_sender() {
        let hub = LocalHub::new();
        let host = hub.channel("room-1");
        let listener = hub.channel("room-1");

        let mut host_rx = host.on_broadcast("audio_chunk");
        let mut rx = listener.on_broadcast("audio_chunk");
        host.subscribe().await.unwrap();
        listener.subscribe().await.unwrap();

        for n in 0..10 {
            host.send(message("audio_chunk", n)).unwrap();
        }
        for n in 0..10 {
            assert_eq!(rx.recv().await.unwrap(), message("audio_chunk", n));
        }
        assert!(host_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_self_option() {
        let hub = LocalHub::new();
        let channel = hub.channel_with("room", ChannelOptions { broadcast_self: true });
        let mut rx = channel.on_broadcast("ping");
        channel.subscribe().await.unwrap();

        channel.send(message("ping", 1)).unwrap();
        assert_eq!(rx.recv().await.unwrap().event, "ping");
    }

    #[tokio::test]
    async fn test_event_filter() {
        let hub = LocalHub::new();
        let a = hub.channel("room");
        let b = hub.channel("room");
        let mut chunks = b.on_broadcast("audio_chunk");
        a.subscribe().await.unwrap();
        b.subscribe().await.unwrap();

        a.send(message("host_left", 0)).unwrap();
        a.send(message("audio_chunk", 1)).unwrap();
        assert_eq!(chunks.recv().await.unwrap(), message("audio_chunk", 1));
    }

    #[tokio::test]
    async fn test_send_requires_join() {
        let hub = LocalHub::new();
        let channel = hub.channel("room");
        assert!(matches!(
            channel.send(message("x", 0)),
            Err(TransportError::NotSubscribed(_))
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_unsubscribed_handle_receives_nothing() {
        let hub = LocalHub::new();
        let a = hub.channel("room");
        let b = hub.channel("room");
        let mut rx = b.on_broadcast("audio_chunk");
        a.subscribe().await.unwrap();
        b.subscribe().await.unwrap();

        b.unsubscribe().await.unwrap();
        b.unsubscribe().await.unwrap();
        a.send(message("audio_chunk", 0)).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_presence_sync_join_leave() {
        let hub = LocalHub::new();
        let host = hub.channel("room");
        host.subscribe().await.unwrap();
        host.track(PresenceState::host("h")).await.unwrap();

        let listener = hub.channel("room");
        let mut presence = listener.on_presence();
        listener.subscribe().await.unwrap();

        match presence.recv().await.unwrap() {
            PresenceEvent::Sync(members) => {
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].role, Role::Host);
            }
            other => panic!("unexpected {:?}", other),
        }

        listener.track(PresenceState::listener("l")).await.unwrap();
        assert!(matches!(presence.recv().await.unwrap(), PresenceEvent::Join(s) if s.user_id == "l"));

        drop(host);
        assert!(matches!(presence.recv().await.unwrap(), PresenceEvent::Leave(s) if s.role == Role::Host));
        assert_eq!(hub.member_count("room"), 1);
    }

    #[tokio::test]
    async fn test_closed_topic_refuses_subscribe() {
        let hub = LocalHub::new();
        hub.close_topic("room");
        let channel = hub.channel("room");
        assert!(matches!(
            channel.subscribe().await,
            Err(TransportError::SubscribeFailed(_))
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_closed_topic_refuses_send() {
        let hub = LocalHub::new();
        let channel = hub.channel("room");
        channel.subscribe().await.unwrap();

        hub.close_topic("room");
        assert_eq!(channel.send(message("audio_chunk", 0)), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_close_topic_ends_member_receivers() {
        let hub = LocalHub::new();
        let host = hub.channel("room");
        let listener = hub.channel("room");
        let mut chunks = listener.on_broadcast("audio_chunk");
        let mut presence = listener.on_presence();
        host.subscribe().await.unwrap();
        listener.subscribe().await.unwrap();
        assert!(matches!(presence.recv().await, Some(PresenceEvent::Sync(_))));

        hub.close_topic("room");
        assert_eq!(chunks.recv().await, None);
        assert!(presence.recv().await.is_none());
        assert!(listener.on_broadcast("host_left").recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_event_send_fails() {
        let hub = LocalHub::new();
        let channel = hub.channel("room");
        channel.subscribe().await.unwrap();

        assert!(matches!(
            channel.send(message("", 0)),
            Err(TransportError::SendFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_topic_released_with_last_handle() {
        let hub = LocalHub::new();
        let a = hub.channel("room");
        let b = hub.channel("room");
        a.subscribe().await.unwrap();
        assert_eq!(hub.topic_count(), 1);

        drop(a);
        assert_eq!(hub.topic_count(), 1);

        // A handle that never joined still keeps the topic alive.
        let c = hub.channel("room");
        drop(b);
        assert_eq!(hub.topic_count(), 1);
        drop(c);
        assert_eq!(hub.topic_count(), 0);
        assert_eq!(hub.member_count("room"), 0);

        for n in 0..5 {
            let _ = hub.channel(&format!("room-{}", n));
        }
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_topic_is_kept() {
        let hub = LocalHub::new();
        let channel = hub.channel("room");
        hub.close_topic("room");
        drop(channel);

        assert_eq!(hub.topic_count(), 1);
        assert!(hub.channel("room").subscribe().await.is_err());
    }
}
