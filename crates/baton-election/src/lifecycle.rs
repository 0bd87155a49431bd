//! Session lifecycle shared by the election and the node monitor
//!
//! Every signal here is a latched `watch` value rather than an edge: a
//! shutdown requested before the run loop starts, or a termination recorded
//! before anyone waits for it, is still observed.

use std::sync::atomic::{AtomicBool, Ordering};
use baton_coord::{CoordinationClient, CoordinationError, KeeperState};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{ElectionError, Result};

/// Connection lifecycle of the session owned by a run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started, or waiting for the first connected notification
    Connecting,
    Connected,
    Disconnected,
    Expired,
    Closed,
}

/// Why a run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The service reported the connection lost
    Disconnected,
    /// The service expired the session
    Expired,
    /// The session was closed, by request or by the service
    Closed,
    /// The run loop stopped on an error
    Failed,
}

impl Termination {
    pub(crate) fn from_keeper_state(state: KeeperState) -> Self {
        match state {
            KeeperState::Disconnected => Termination::Disconnected,
            KeeperState::Expired => Termination::Expired,
            KeeperState::Closed | KeeperState::SyncConnected => Termination::Closed,
        }
    }

    /// Termination implied by a call failing because the session is gone
    pub(crate) fn from_session_error(error: &ElectionError) -> Option<Self> {
        match error {
            ElectionError::Coordination(CoordinationError::SessionExpired) => Some(Termination::Expired),
            ElectionError::Coordination(CoordinationError::SessionClosed) => Some(Termination::Closed),
            _ => None,
        }
    }

    fn session_state(&self) -> SessionState {
        match self {
            Termination::Disconnected => SessionState::Disconnected,
            Termination::Expired => SessionState::Expired,
            Termination::Closed | Termination::Failed => SessionState::Closed,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    session_tx: watch::Sender<SessionState>,
    termination_tx: watch::Sender<Option<Termination>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            shutdown_tx: watch::Sender::new(false),
            session_tx: watch::Sender::new(SessionState::Connecting),
            termination_tx: watch::Sender::new(None),
        }
    }

    /// Claim the single run of this lifecycle. A finished lifecycle cannot
    /// be restarted; callers build a new one with a new session.
    pub(crate) fn begin(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ElectionError::AlreadyRunning);
        }
        Ok(())
    }

    pub(crate) fn set_session(&self, state: SessionState) {
        self.session_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn session(&self) -> SessionState {
        *self.session_tx.borrow()
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Record the termination. Only the first call has any effect.
    pub(crate) fn finish(&self, termination: Termination) -> bool {
        let recorded = self.termination_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(termination);
                true
            } else {
                false
            }
        });
        if recorded {
            self.set_session(termination.session_state());
        }
        recorded
    }

    pub(crate) fn termination(&self) -> Option<Termination> {
        *self.termination_tx.borrow()
    }

    pub(crate) async fn wait_terminated(&self) -> Termination {
        let mut rx = self.termination_tx.subscribe();
        let termination = match rx.wait_for(Option::is_some).await {
            Ok(termination) => (*termination).unwrap_or(Termination::Closed),
            Err(_) => Termination::Closed,
        };
        termination
    }
}

/// Release a session, tolerating one the service already ended
pub(crate) async fn close_session(client: &dyn CoordinationClient) {
    match client.close().await {
        Ok(()) => debug!(session = %client.session_id(), "Session released"),
        Err(CoordinationError::SessionExpired | CoordinationError::SessionClosed) => {}
        Err(e) => warn!(session = %client.session_id(), error = %e, "Failed to release session"),
    }
}
