//! Listener side of a live room
//!
//! A listener session walks `Idle → Joining → Listening → (HostLeft |
//! Error) → Idle`. Host departure is taken only from explicit signals: a
//! presence leave of the host member or the host's `host_left` broadcast.
//! Silence never counts, since jitter produces it too.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::presence::RoomPresence;
use super::CountCallback;
use crate::audio::playback::PlaybackStatsSnapshot;
use crate::constants::HOST_LEFT_EVENT;
use crate::error::Result;
use crate::service::PlaybackService;
use crate::transport::{BroadcastMessage, Channel, PresenceEvent, PresenceState};

/// Lifecycle of a listener session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Joining,
    Listening,
    HostLeft,
    Error(String),
}

/// A listener playing one room's broadcast
pub struct ListenerSession {
    user_id: String,
    channel: Arc<dyn Channel>,
    playback: Arc<PlaybackService>,
    state: Arc<Mutex<ListenerState>>,
    listener_count: Arc<AtomicUsize>,
    on_listener_count: Arc<Mutex<Option<CountCallback>>>,
    watcher: Option<JoinHandle<()>>,
}

impl ListenerSession {
    pub fn new(user_id: impl Into<String>, channel: Arc<dyn Channel>, playback: PlaybackService) -> Self {
        Self {
            user_id: user_id.into(),
            channel,
            playback: Arc::new(playback),
            state: Arc::new(Mutex::new(ListenerState::Idle)),
            listener_count: Arc::new(AtomicUsize::new(0)),
            on_listener_count: Arc::new(Mutex::new(None)),
            watcher: None,
        }
    }

    /// Called with the new listener count whenever it changes
    pub fn on_listener_count<F>(&self, callback: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        *self.on_listener_count.lock() = Some(Arc::new(callback));
    }

    /// Join the room and start playback
    ///
    /// `on_disconnect` runs once if the host leaves while this session is
    /// listening. It does not run for [`leave`](Self::leave) and there is no
    /// automatic rejoin. Any failure puts the session in
    /// [`ListenerState::Error`] and is returned.
    pub async fn join<F>(&mut self, on_disconnect: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if matches!(*state, ListenerState::Joining | ListenerState::Listening) {
                return Ok(());
            }
            *state = ListenerState::Joining;
        }

        // Registered before subscribing so the initial sync is not missed
        let presence = self.channel.on_presence();
        let host_left = self.channel.on_broadcast(HOST_LEFT_EVENT);

        if let Err(e) = self.connect().await {
            tracing::warn!("{} could not join {}: {}", self.user_id, self.channel.topic(), e);
            self.playback.stop_listening().await;
            let _ = self.channel.unsubscribe().await;
            *self.state.lock() = ListenerState::Error(e.to_string());
            return Err(e);
        }

        *self.state.lock() = ListenerState::Listening;
        tracing::info!("{} listening on {}", self.user_id, self.channel.topic());

        let watch = HostWatch {
            presence,
            host_left,
            state: self.state.clone(),
            playback: self.playback.clone(),
            listener_count: self.listener_count.clone(),
            on_listener_count: self.on_listener_count.clone(),
        };
        self.watcher = Some(tokio::spawn(watch.run(on_disconnect)));
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        self.channel.subscribe().await?;
        self.playback.start_listening(self.channel.clone()).await?;
        self.channel
            .track(PresenceState::listener(self.user_id.as_str()))
            .await?;
        Ok(())
    }

    /// Stop playback and leave the room. Idempotent.
    pub async fn leave(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        let previous = std::mem::replace(&mut *self.state.lock(), ListenerState::Idle);

        if let Err(e) = self.channel.untrack().await {
            tracing::debug!("Untrack failed: {}", e);
        }
        self.playback.stop_listening().await;
        if let Err(e) = self.channel.unsubscribe().await {
            tracing::warn!("Unsubscribe from {} failed: {}", self.channel.topic(), e);
        }

        if previous != ListenerState::Idle {
            tracing::info!("{} left {}", self.user_id, self.channel.topic());
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state.lock().clone()
    }

    /// Whether audio is currently being played
    pub fn is_active(&self) -> bool {
        self.playback.is_active()
    }

    pub fn listener_count(&self) -> usize {
        self.listener_count.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PlaybackStatsSnapshot {
        self.playback.stats()
    }
}

impl Drop for ListenerSession {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Background task watching for the host's departure
struct HostWatch {
    presence: UnboundedReceiver<PresenceEvent>,
    host_left: UnboundedReceiver<BroadcastMessage>,
    state: Arc<Mutex<ListenerState>>,
    playback: Arc<PlaybackService>,
    listener_count: Arc<AtomicUsize>,
    on_listener_count: Arc<Mutex<Option<CountCallback>>>,
}

impl HostWatch {
    async fn run<F>(mut self, on_disconnect: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let reason = self.wait_for_host_exit().await;

        {
            let mut state = self.state.lock();
            if *state != ListenerState::Listening {
                return;
            }
            *state = ListenerState::HostLeft;
        }
        tracing::info!("Host left ({}), stopping playback", reason);
        self.playback.stop_listening().await;
        on_disconnect();
    }

    async fn wait_for_host_exit(&mut self) -> &'static str {
        let mut room = RoomPresence::new();
        let mut presence_open = true;

        loop {
            tokio::select! {
                event = self.presence.recv(), if presence_open => match event {
                    Some(event) => {
                        let update = room.apply(&event);
                        if update.listeners_changed {
                            self.publish_count(room.listener_count());
                        }
                        if update.host_left {
                            return "presence";
                        }
                    }
                    None => presence_open = false,
                },
                message = self.host_left.recv() => {
                    return match message {
                        Some(_) => "host_left broadcast",
                        None => "channel closed",
                    };
                }
            }
        }
    }

    fn publish_count(&self, listeners: usize) {
        self.listener_count.store(listeners, Ordering::SeqCst);
        let callback = self.on_listener_count.lock().clone();
        if let Some(callback) = callback {
            callback(listeners);
        }
    }
}
