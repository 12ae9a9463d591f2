//! Room sessions: presence, host liveness and mute control

pub mod presence;

#[cfg(feature = "host")]
pub mod host;
#[cfg(feature = "listener")]
pub mod listener;

use std::sync::Arc;

pub use presence::{PresenceUpdate, RoomPresence};

#[cfg(feature = "host")]
pub use host::HostSession;
#[cfg(feature = "listener")]
pub use listener::{ListenerSession, ListenerState};

/// Listener-count change callback
pub type CountCallback = Arc<dyn Fn(usize) + Send + Sync>;
