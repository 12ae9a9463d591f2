//! Room membership derived from presence events

use std::collections::HashMap;

use crate::transport::{PresenceEvent, PresenceState, Role};

/// What one presence event changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub listeners_changed: bool,
    pub host_left: bool,
}

/// Current members of a room keyed by user id
#[derive(Debug, Default)]
pub struct RoomPresence {
    members: HashMap<String, PresenceState>,
}

impl RoomPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the membership
    ///
    /// `host_left` is reported only when a host that was present is gone
    /// afterwards, never for a room that had no host to begin with.
    pub fn apply(&mut self, event: &PresenceEvent) -> PresenceUpdate {
        let listeners_before = self.listener_count();
        let host_before = self.host().is_some();

        let mut host_leave = false;
        match event {
            PresenceEvent::Sync(states) => {
                self.members = states
                    .iter()
                    .map(|s| (s.user_id.clone(), s.clone()))
                    .collect();
            }
            PresenceEvent::Join(state) => {
                self.members.insert(state.user_id.clone(), state.clone());
            }
            PresenceEvent::Leave(state) => {
                self.members.remove(&state.user_id);
                host_leave = state.role == Role::Host;
            }
        }

        PresenceUpdate {
            listeners_changed: self.listener_count() != listeners_before,
            host_left: host_leave || (host_before && self.host().is_none()),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.members
            .values()
            .filter(|s| s.role == Role::Listener)
            .count()
    }

    pub fn host(&self) -> Option<&PresenceState> {
        self.members.values().find(|s| s.role == Role::Host)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_count() {
        let mut room = RoomPresence::new();
        let update = room.apply(&PresenceEvent::Sync(vec![
            PresenceState::host("h"),
            PresenceState::listener("a"),
        ]));
        assert!(update.listeners_changed);
        assert_eq!(room.listener_count(), 1);

        let update = room.apply(&PresenceEvent::Join(PresenceState::listener("b")));
        assert!(update.listeners_changed);
        assert_eq!(room.listener_count(), 2);

        // Re-tracking the same member doesn't count twice
        let update = room.apply(&PresenceEvent::Join(PresenceState::listener("b")));
        assert!(!update.listeners_changed);

        room.apply(&PresenceEvent::Leave(PresenceState::listener("a")));
        assert_eq!(room.listener_count(), 1);
        assert_eq!(room.len(), 2);
    }

    #[test]
    fn test_host_leave() {
        let mut room = RoomPresence::new();
        room.apply(&PresenceEvent::Join(PresenceState::host("h")));
        assert!(room.host().is_some());

        let update = room.apply(&PresenceEvent::Leave(PresenceState::host("h")));
        assert!(update.host_left);
        assert!(!update.listeners_changed);
        assert!(room.host().is_none());
    }

    #[test]
    fn test_sync_without_host() {
        let mut room = RoomPresence::new();
        let update = room.apply(&PresenceEvent::Sync(vec![]));
        assert!(!update.host_left);

        room.apply(&PresenceEvent::Join(PresenceState::host("h")));
        let update = room.apply(&PresenceEvent::Sync(vec![PresenceState::listener("a")]));
        assert!(update.host_left);
    }

    #[test]
    fn test_listener_leave_is_not_host_leave() {
        let mut room = RoomPresence::new();
        room.apply(&PresenceEvent::Sync(vec![
            PresenceState::host("h"),
            PresenceState::listener("a"),
        ]));
        let update = room.apply(&PresenceEvent::Leave(PresenceState::listener("a")));
        assert!(!update.host_left);
        assert!(!room.is_empty());
    }
}
