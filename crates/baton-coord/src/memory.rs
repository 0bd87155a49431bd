//! In-process coordination service
//!
//! Keeps a node tree, sessions and one-shot watches behind a single lock, so
//! every mutation and the notifications it triggers happen atomically and in
//! one global order. Used by tests and the development binary; the election
//! code only sees it through [`Connector`] and [`CoordinationClient`].
//!
//! Besides the client operations it exposes administrative controls that a
//! real deployment would get from the outside world: expiring or
//! disconnecting a session, deleting nodes, and making the service briefly
//! unavailable.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::client::{
    node_name, parent_path, validate_path, Acl, Connector, CoordinationClient,
    CreateMode, SessionId, Stat,
};
use crate::error::{CoordinationError, Result};
use crate::event::{EventSink, EventType, KeeperState, WatchedEvent};

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    czxid: i64,
    mzxid: i64,
    version: i32,
    ephemeral_owner: Option<SessionId>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Node {
    fn new(data: Vec<u8>, zxid: i64, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            data,
            czxid: zxid,
            mzxid: zxid,
            version: 0,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            czxid: self.czxid,
            mzxid: self.mzxid,
            version: self.version,
            ephemeral_owner: self.ephemeral_owner,
            data_length: self.data.len(),
            num_children: self.children.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Live,
    Expired,
    Closed,
}

#[derive(Debug)]
struct Session {
    status: SessionStatus,
    events: EventSink,
    timeout: Duration,
}

#[derive(Debug)]
struct State {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, Session>,
    data_watches: HashMap<String, HashSet<SessionId>>,
    child_watches: HashMap<String, HashSet<SessionId>>,
    zxid: i64,
    available: bool,
}

impl State {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(Vec::new(), 0, None));
        Self {
            nodes,
            sessions: HashMap::new(),
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            zxid: 0,
            available: true,
        }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn check_session(&self, session: SessionId) -> Result<()> {
        match self.sessions.get(&session).map(|s| s.status) {
            Some(SessionStatus::Live) if self.available => Ok(()),
            Some(SessionStatus::Live) => Err(CoordinationError::ConnectionLoss),
            Some(SessionStatus::Expired) => Err(CoordinationError::SessionExpired),
            Some(SessionStatus::Closed) | None => Err(CoordinationError::SessionClosed),
        }
    }

    fn notify(&self, session: SessionId, event: WatchedEvent) {
        if let Some(entry) = self.sessions.get(&session) {
            if entry.status == SessionStatus::Live {
                // A dropped receiver means the client stopped listening.
                let _ = entry.events.send(event);
            }
        }
    }

    fn take_watches(&mut self, table: WatchTable, path: &str) -> HashSet<SessionId> {
        let watches = match table {
            WatchTable::Data => &mut self.data_watches,
            WatchTable::Children => &mut self.child_watches,
        };
        watches.remove(path).unwrap_or_default()
    }

    fn deliver(&self, sessions: HashSet<SessionId>, event_type: EventType, path: &str) {
        let mut sessions: Vec<_> = sessions.into_iter().collect();
        sessions.sort();
        for session in sessions {
            self.notify(session, WatchedEvent::node(event_type, path));
        }
    }

    fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        owner: Option<SessionId>,
    ) -> Result<String> {
        let parent = parent_path(path)
            .ok_or_else(|| CoordinationError::NodeExists(path.to_string()))?
            .to_string();

        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| CoordinationError::NoNode(parent.clone()))?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(CoordinationError::NoChildrenForEphemerals(parent));
        }

        let full_path = if mode.is_sequential() {
            let sequence = parent_node.next_sequence;
            format!("{}{:010}", path, sequence)
        } else {
            path.to_string()
        };
        validate_path(&full_path)?;

        if self.nodes.contains_key(&full_path) {
            return Err(CoordinationError::NodeExists(full_path));
        }

        let zxid = self.next_zxid();
        let owner = if mode.is_ephemeral() { owner } else { None };
        let name = node_name(&full_path).to_string();
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(name);
            parent_node.next_sequence += 1;
        }
        self.nodes.insert(full_path.clone(), Node::new(data.to_vec(), zxid, owner));

        let created = self.take_watches(WatchTable::Data, &full_path);
        self.deliver(created, EventType::NodeCreated, &full_path);
        let changed = self.take_watches(WatchTable::Children, &parent);
        self.deliver(changed, EventType::NodeChildrenChanged, &parent);

        Ok(full_path)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if path == "/" {
            return Err(CoordinationError::InvalidPath(path.to_string()));
        }
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        if !node.children.is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        self.next_zxid();
        if let Some(parent) = parent_path(path) {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.remove(node_name(path));
            }
        }

        let mut deleted = self.take_watches(WatchTable::Data, path);
        deleted.extend(self.take_watches(WatchTable::Children, path));
        self.deliver(deleted, EventType::NodeDeleted, path);

        if let Some(parent) = parent_path(path) {
            let changed = self.take_watches(WatchTable::Children, parent);
            self.deliver(changed, EventType::NodeChildrenChanged, parent);
        }

        Ok(())
    }

    fn set_data(&mut self, path: &str, data: &[u8]) -> Result<Stat> {
        let zxid = self.next_zxid();
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        node.data = data.to_vec();
        node.mzxid = zxid;
        node.version += 1;
        let stat = node.stat();

        let changed = self.take_watches(WatchTable::Data, path);
        self.deliver(changed, EventType::NodeDataChanged, path);

        Ok(stat)
    }

    /// Remove every ephemeral node owned by `session` and drop its watches
    fn end_session(&mut self, session: SessionId, status: SessionStatus) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        // Mark first so the ending session is not notified about its own records.
        if let Some(entry) = self.sessions.get_mut(&session) {
            entry.status = status;
        }
        for watchers in self.data_watches.values_mut() {
            watchers.remove(&session);
        }
        for watchers in self.child_watches.values_mut() {
            watchers.remove(&session);
        }

        for path in owned {
            // Ephemerals never have children, so the delete cannot fail.
            let _ = self.delete(&path);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WatchTable {
    Data,
    Children,
}

/// Shared handle to an in-process coordination service
#[derive(Debug, Clone)]
pub struct MemoryCoordinator {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
        }
    }

    /// Open a session directly, without going through [`Connector`]
    pub fn open_session(&self, session_timeout: Duration, events: EventSink) -> Result<MemoryClient> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(CoordinationError::Connection(
                "coordination service unavailable".to_string(),
            ));
        }

        let session = SessionId::new();
        // Queue the first notification before the session becomes visible.
        let _ = events.send(WatchedEvent::session(KeeperState::SyncConnected));
        state.sessions.insert(
            session,
            Session {
                status: SessionStatus::Live,
                events,
                timeout: session_timeout,
            },
        );
        debug!(%session, timeout_ms = session_timeout.as_millis() as u64, "Session opened");

        Ok(MemoryClient {
            session,
            coordinator: self.clone(),
        })
    }

    /// Expire a session: its ephemeral nodes are removed and it is told so
    pub fn expire_session(&self, session: SessionId) {
        let mut state = self.state.lock();
        if state.sessions.get(&session).map(|s| s.status) != Some(SessionStatus::Live) {
            return;
        }
        state.notify(session, WatchedEvent::session(KeeperState::Expired));
        state.end_session(session, SessionStatus::Expired);
        info!(%session, "Session expired");
    }

    /// Tell a session its connection dropped. The session and its ephemeral
    /// nodes stay until the client closes it or it is expired.
    pub fn disconnect_session(&self, session: SessionId) {
        let state = self.state.lock();
        state.notify(session, WatchedEvent::session(KeeperState::Disconnected));
        debug!(%session, "Session disconnected");
    }

    /// Toggle availability. While unavailable, calls on live sessions fail
    /// with [`CoordinationError::ConnectionLoss`] and new connections are
    /// refused; restoring availability re-announces every live session as
    /// connected.
    pub fn set_available(&self, available: bool) {
        let mut state = self.state.lock();
        let restored = available && !state.available;
        state.available = available;

        if restored {
            let mut live: Vec<SessionId> = state
                .sessions
                .iter()
                .filter(|(_, s)| s.status == SessionStatus::Live)
                .map(|(id, _)| *id)
                .collect();
            live.sort();
            for session in live {
                state.notify(session, WatchedEvent::session(KeeperState::SyncConnected));
            }
        }
    }

    /// Create a node outside of any session
    pub fn create_node(&self, path: &str, data: &[u8]) -> Result<String> {
        validate_path(path)?;
        self.state.lock().create(path, data, CreateMode::Persistent, None)
    }

    pub fn delete_node(&self, path: &str) -> Result<()> {
        self.state.lock().delete(path)
    }

    pub fn set_data(&self, path: &str, data: &[u8]) -> Result<Stat> {
        self.state.lock().set_data(path, data)
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    /// Sorted child names of `path`, empty if it does not exist
    pub fn children(&self, path: &str) -> Vec<String> {
        self.state
            .lock()
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sessions holding an existence or data watch on `path`
    pub fn data_watchers(&self, path: &str) -> Vec<SessionId> {
        let state = self.state.lock();
        let mut watchers: Vec<_> = state
            .data_watches
            .get(path)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default();
        watchers.sort();
        watchers
    }

    /// Owner of an ephemeral node
    pub fn ephemeral_owner(&self, path: &str) -> Option<SessionId> {
        self.state.lock().nodes.get(path).and_then(|node| node.ephemeral_owner)
    }

    pub fn live_sessions(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Live)
            .count()
    }

    pub fn session_timeout(&self, session: SessionId) -> Option<Duration> {
        self.state.lock().sessions.get(&session).map(|s| s.timeout)
    }
}

#[async_trait]
impl Connector for MemoryCoordinator {
    async fn connect(
        &self,
        address: &str,
        session_timeout: Duration,
        events: EventSink,
    ) -> Result<Arc<dyn CoordinationClient>> {
        debug!(address, "Connecting to in-process coordination service");
        let client = self.open_session(session_timeout, events)?;
        Ok(Arc::new(client))
    }
}

/// A session on a [`MemoryCoordinator`]
#[derive(Debug, Clone)]
pub struct MemoryClient {
    session: SessionId,
    coordinator: MemoryCoordinator,
}

impl MemoryClient {
    fn read<T>(&self, path: &str, f: impl FnOnce(&mut State, &str) -> Result<T>) -> Result<T> {
        validate_path(path)?;
        let mut state = self.coordinator.state.lock();
        state.check_session(self.session)?;
        f(&mut *state, path)
    }

    fn watch(state: &mut State, table: WatchTable, path: &str, session: SessionId) {
        let watches = match table {
            WatchTable::Data => &mut state.data_watches,
            WatchTable::Children => &mut state.child_watches,
        };
        watches.entry(path.to_string()).or_default().insert(session);
    }

    fn children_of(state: &State, path: &str) -> Result<Vec<String>> {
        state
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    fn data_of(state: &State, path: &str) -> Result<(Vec<u8>, Stat)> {
        state
            .nodes
            .get(path)
            .map(|node| (node.data.clone(), node.stat()))
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    fn session_id(&self) -> SessionId {
        self.session
    }

    async fn create(&self, path: &str, data: &[u8], _acl: Acl, mode: CreateMode) -> Result<String> {
        // Sequential creates may name only the parent plus a prefix.
        let check = if mode.is_sequential() { format!("{}0", path) } else { path.to_string() };
        validate_path(&check)?;

        let mut state = self.coordinator.state.lock();
        state.check_session(self.session)?;
        state.create(path, data, mode, Some(self.session))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        self.read(path, |state, path| Self::children_of(state, path))
    }

    async fn get_children_watch(&self, path: &str) -> Result<Vec<String>> {
        let session = self.session;
        self.read(path, |state, path| {
            let children = Self::children_of(state, path)?;
            Self::watch(state, WatchTable::Children, path, session);
            Ok(children)
        })
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.read(path, |state, path| Ok(state.nodes.get(path).map(Node::stat)))
    }

    async fn exists_watch(&self, path: &str) -> Result<Option<Stat>> {
        let session = self.session;
        self.read(path, |state, path| {
            Self::watch(state, WatchTable::Data, path, session);
            Ok(state.nodes.get(path).map(Node::stat))
        })
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        self.read(path, |state, path| Self::data_of(state, path))
    }

    async fn get_data_watch(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let session = self.session;
        self.read(path, |state, path| {
            let data = Self::data_of(state, path)?;
            Self::watch(state, WatchTable::Data, path, session);
            Ok(data)
        })
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.coordinator.state.lock();
        match state.sessions.get(&self.session).map(|s| s.status) {
            Some(SessionStatus::Live) => {
                state.end_session(self.session, SessionStatus::Closed);
                debug!(session = %self.session, "Session closed");
                Ok(())
            }
            Some(SessionStatus::Expired) => Err(CoordinationError::SessionExpired),
            _ => Err(CoordinationError::SessionClosed),
        }
    }
}
