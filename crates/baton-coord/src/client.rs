//! Coordination service client interface
//!
//! The election only depends on these primitives. A client is bound to one
//! session: every ephemeral node it creates disappears when that session
//! ends, and every watch it registers reports through the [`EventSink`]
//! passed to [`Connector::connect`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{CoordinationError, Result};
use crate::event::EventSink;

/// Identifier of a coordination service session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Node lifetime and naming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    PersistentSequential,
    Ephemeral,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, CreateMode::PersistentSequential | CreateMode::EphemeralSequential)
    }
}

/// Access control attached to a created node. Enforcement belongs to the
/// service; clients only pass it through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    OpenUnsafe,
    CreatorAll,
    ReadUnsafe,
}

/// Node metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Transaction id of the create
    pub czxid: i64,
    /// Transaction id of the last modification
    pub mzxid: i64,
    /// Data version, incremented on every write
    pub version: i32,
    pub ephemeral_owner: Option<SessionId>,
    pub data_length: usize,
    pub num_children: usize,
}

/// Operations available on an established session
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    fn session_id(&self) -> SessionId;

    /// Create a node and return its full path. Sequential modes append a
    /// monotonically increasing, zero-padded suffix unique within the parent.
    async fn create(&self, path: &str, data: &[u8], acl: Acl, mode: CreateMode) -> Result<String>;

    /// Child names of `path`, in no guaranteed order
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// Like [`get_children`](Self::get_children), and registers a one-shot
    /// watch that fires when a child is added or removed, or `path` is deleted.
    async fn get_children_watch(&self, path: &str) -> Result<Vec<String>>;

    async fn exists(&self, path: &str) -> Result<Option<Stat>>;

    /// Presence of `path`, registering a one-shot watch that fires on
    /// create, delete or data change of exactly that path. The watch is
    /// installed whether or not the node exists.
    async fn exists_watch(&self, path: &str) -> Result<Option<Stat>>;

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat)>;

    /// Like [`get_data`](Self::get_data), and registers a one-shot watch
    /// that fires on data change or delete of `path`.
    async fn get_data_watch(&self, path: &str) -> Result<(Vec<u8>, Stat)>;

    /// Release the session. The service removes the session's ephemeral
    /// nodes as a side effect.
    async fn close(&self) -> Result<()>;
}

/// Establishes sessions
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session. The first notification on `events` reports whether
    /// the session became connected.
    async fn connect(
        &self,
        address: &str,
        session_timeout: Duration,
        events: EventSink,
    ) -> Result<Arc<dyn CoordinationClient>>;
}

/// Join a parent path and a child name
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent of an absolute path; `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Reject paths the service would refuse
pub fn validate_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    let invalid = !path.starts_with('/')
        || path.ends_with('/')
        || path[1..].split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        Err(CoordinationError::InvalidPath(path.to_string()))
    } else {
        Ok(())
    }
}
