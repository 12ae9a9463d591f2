//! Host side of a live room

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::presence::RoomPresence;
use super::CountCallback;
use crate::audio::capture::CaptureStatsSnapshot;
use crate::constants::HOST_LEFT_EVENT;
use crate::error::{Error, Result};
use crate::service::CaptureService;
use crate::transport::{BroadcastMessage, Channel, PresenceEvent, PresenceState};

/// A host broadcasting its microphone into one room
pub struct HostSession {
    user_id: String,
    channel: Arc<dyn Channel>,
    capture: CaptureService,
    listener_count: Arc<AtomicUsize>,
    on_listener_count: Arc<Mutex<Option<CountCallback>>>,
    watcher: Option<JoinHandle<()>>,
    live: bool,
    muted: bool,
}

impl HostSession {
    pub fn new(user_id: impl Into<String>, channel: Arc<dyn Channel>, capture: CaptureService) -> Self {
        Self {
            user_id: user_id.into(),
            channel,
            capture,
            listener_count: Arc::new(AtomicUsize::new(0)),
            on_listener_count: Arc::new(Mutex::new(None)),
            watcher: None,
            live: false,
            muted: false,
        }
    }

    /// Called with the new listener count whenever it changes
    pub fn on_listener_count<F>(&self, callback: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        *self.on_listener_count.lock() = Some(Arc::new(callback));
    }

    /// Join the room, open the microphone and start broadcasting
    ///
    /// Any failure leaves the session offline with the channel released.
    pub async fn go_live(&mut self) -> Result<()> {
        if self.live {
            return Ok(());
        }

        let presence = self.channel.on_presence();
        self.channel.subscribe().await?;

        if let Err(e) = self.start_streaming().await {
            self.capture.stop_broadcast();
            let _ = self.channel.unsubscribe().await;
            return Err(e);
        }

        self.watcher = Some(tokio::spawn(watch_listeners(
            presence,
            self.listener_count.clone(),
            self.on_listener_count.clone(),
        )));
        self.live = true;
        self.muted = false;
        tracing::info!("{} is live on {}", self.user_id, self.channel.topic());
        Ok(())
    }

    async fn start_streaming(&mut self) -> Result<()> {
        self.capture.start_capture()?;
        self.capture.start_broadcast(self.channel.clone())?;
        self.channel
            .track(PresenceState::host(self.user_id.as_str()))
            .await?;
        Ok(())
    }

    /// Mute releases the microphone entirely; unmute acquires it again
    ///
    /// Muting blocks briefly while the capture threads are joined.
    pub fn set_muted(&mut self, muted: bool) -> Result<()> {
        if !self.live {
            return Err(Error::NotInitialized("host session is not live"));
        }
        if muted == self.muted {
            return Ok(());
        }

        if muted {
            self.capture.stop_broadcast();
        } else {
            self.capture.start_capture()?;
            self.capture.start_broadcast(self.channel.clone())?;
        }
        self.muted = muted;
        tracing::info!("{} {}", self.user_id, if muted { "muted" } else { "unmuted" });
        Ok(())
    }

    /// Tell listeners the broadcast is over and leave the room
    ///
    /// Joining the capture threads blocks the calling worker briefly.
    pub async fn end(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;

        if let Err(e) = self.channel.send(BroadcastMessage::signal(HOST_LEFT_EVENT)) {
            tracing::warn!("Could not announce end of broadcast: {}", e);
        }
        self.capture.stop_broadcast();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Err(e) = self.channel.untrack().await {
            tracing::debug!("Untrack failed: {}", e);
        }
        if let Err(e) = self.channel.unsubscribe().await {
            tracing::warn!("Unsubscribe from {} failed: {}", self.channel.topic(), e);
        }
        tracing::info!("{} ended the broadcast", self.user_id);
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Whether chunks are currently being published
    pub fn is_active(&self) -> bool {
        self.capture.is_active()
    }

    pub fn listener_count(&self) -> usize {
        self.listener_count.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.capture.stats()
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

async fn watch_listeners(
    mut events: UnboundedReceiver<PresenceEvent>,
    count: Arc<AtomicUsize>,
    callback: Arc<Mutex<Option<CountCallback>>>,
) {
    let mut room = RoomPresence::new();
    while let Some(event) = events.recv().await {
        if room.apply(&event).listeners_changed {
            let listeners = room.listener_count();
            count.store(listeners, Ordering::SeqCst);
            tracing::debug!("{} listener(s) in room", listeners);
            let current = callback.lock().clone();
            if let Some(notify) = current {
                notify(listeners);
            }
        }
    }
}
