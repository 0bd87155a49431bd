//! Error types for coordination service calls

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection to the coordination service was lost")]
    ConnectionLoss,

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session closed")]
    SessionClosed,

    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Ephemeral nodes may not have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl CoordinationError {
    /// The call may succeed if repeated on the same session.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinationError::ConnectionLoss | CoordinationError::Interrupted)
    }

    /// The session is gone; every record it owned is gone with it.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            CoordinationError::SessionExpired | CoordinationError::SessionClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
