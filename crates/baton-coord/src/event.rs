//! Notifications delivered by the coordination service
//!
//! A session owns exactly one ordered stream of [`WatchedEvent`]s. Connection
//! state changes arrive with [`EventType::None`]; watch notifications carry
//! the affected path.

use tokio::sync::mpsc;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Connection state change, see [`WatchedEvent::state`]
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Connection state of the session at the time of the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeeperState {
    SyncConnected,
    Disconnected,
    Expired,
    Closed,
}

impl KeeperState {
    /// States after which the session's ephemeral records can no longer be trusted
    pub fn is_terminal(&self) -> bool {
        !matches!(self, KeeperState::SyncConnected)
    }
}

/// A single notification from the coordination service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub state: KeeperState,
    pub path: Option<String>,
}

impl WatchedEvent {
    /// Connection state change
    pub fn session(state: KeeperState) -> Self {
        Self {
            event_type: EventType::None,
            state,
            path: None,
        }
    }

    /// Watch notification for `path` on a connected session
    pub fn node(event_type: EventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            state: KeeperState::SyncConnected,
            path: Some(path.into()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.event_type == EventType::None && self.state == KeeperState::SyncConnected
    }

    /// Session-ending connection state change
    pub fn is_terminal(&self) -> bool {
        self.event_type == EventType::None && self.state.is_terminal()
    }

    /// Deletion notification for exactly `path`
    pub fn is_deletion_of(&self, path: &str) -> bool {
        self.event_type == EventType::NodeDeleted && self.path.as_deref() == Some(path)
    }
}

/// Producer half handed to the coordination client on connect
pub type EventSink = mpsc::UnboundedSender<WatchedEvent>;

/// Consumer half drained by a single dispatch loop
pub type EventStream = mpsc::UnboundedReceiver<WatchedEvent>;

pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_events() {
        assert!(WatchedEvent::session(KeeperState::SyncConnected).is_connected());
        assert!(!WatchedEvent::session(KeeperState::SyncConnected).is_terminal());

        for state in [KeeperState::Disconnected, KeeperState::Expired, KeeperState::Closed] {
            let event = WatchedEvent::session(state);
            assert!(event.is_terminal());
            assert!(!event.is_connected());
        }
    }

    #[test]
    fn test_node_events_are_not_terminal() {
        let event = WatchedEvent::node(EventType::NodeDeleted, "/election/c_0000000001");
        assert!(!event.is_terminal());
        assert!(event.is_deletion_of("/election/c_0000000001"));
        assert!(!event.is_deletion_of("/election/c_0000000002"));

        let created = WatchedEvent::node(EventType::NodeCreated, "/election/c_0000000001");
        assert!(!created.is_deletion_of("/election/c_0000000001"));
    }
}
