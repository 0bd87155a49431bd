//! Target node monitor
//!
//! Keeps existence, data and child watches armed on one path and publishes
//! a fresh [`NodeSnapshot`] after every notification about it. Watches are
//! one-shot, so each refresh re-installs all of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use baton_coord::{event_channel, Connector, CoordinationClient, CoordinationError, EventType, WatchedEvent};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::lifecycle::{close_session, Lifecycle, SessionState, Termination};

#[derive(Debug, Clone)]
pub struct NodeMonitorConfig {
    pub address: String,
    pub session_timeout: Duration,
    pub target_path: String,
}

impl NodeMonitorConfig {
    pub fn new(address: String, target_path: String) -> Self {
        Self {
            address,
            session_timeout: Duration::from_millis(3000),
            target_path,
        }
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
}

/// Observed state of the target node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub exists: bool,
    pub data: Vec<u8>,
    pub version: Option<i32>,
    /// Sorted child names
    pub children: Vec<String>,
}

pub struct NodeMonitor {
    config: NodeMonitorConfig,
    connector: Arc<dyn Connector>,
    lifecycle: Lifecycle,
    snapshot_tx: watch::Sender<NodeSnapshot>,
    refreshes: AtomicU64,
}

impl NodeMonitor {
    pub fn new(config: NodeMonitorConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            lifecycle: Lifecycle::new(),
            snapshot_tx: watch::Sender::new(NodeSnapshot::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Completed refreshes, including ones that found nothing new
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.lifecycle.request_shutdown();
    }

    pub async fn wait_terminated(&self) -> Termination {
        self.lifecycle.wait_terminated().await
    }

    /// Watch the target until the session ends
    pub async fn run(&self) -> Result<Termination> {
        self.lifecycle.begin()?;
        info!(target_path = %self.config.target_path, "Starting node monitor");

        let (events, mut stream) = event_channel();
        let client = match self
            .connector
            .connect(&self.config.address, self.config.session_timeout, events)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                self.lifecycle.finish(Termination::Failed);
                return Err(e.into());
            }
        };

        let mut shutdown_rx = self.lifecycle.shutdown_receiver();
        let outcome = loop {
            tokio::select! {
                biased;

                _ = async { shutdown_rx.wait_for(|requested| *requested).await.is_ok() } => {
                    break Ok(Termination::Closed);
                }

                event = stream.recv() => {
                    let Some(event) = event else {
                        break Ok(Termination::Disconnected);
                    };
                    match self.handle_event(client.as_ref(), event).await {
                        Ok(Some(termination)) => break Ok(termination),
                        Ok(None) => {}
                        Err(e) => match Termination::from_session_error(&e) {
                            Some(termination) => break Ok(termination),
                            None => break Err(e),
                        },
                    }
                }
            }
        };

        close_session(client.as_ref()).await;
        match &outcome {
            Ok(termination) => {
                self.lifecycle.finish(*termination);
                info!(target_path = %self.config.target_path, ?termination, "Node monitor ended");
            }
            Err(e) => {
                self.lifecycle.finish(Termination::Failed);
                error!(target_path = %self.config.target_path, error = %e, "Node monitor failed");
            }
        }
        outcome
    }

    async fn handle_event(
        &self,
        client: &dyn CoordinationClient,
        event: WatchedEvent,
    ) -> Result<Option<Termination>> {
        if event.is_terminal() {
            warn!(state = ?event.state, "Monitor session ended");
            return Ok(Some(Termination::from_keeper_state(event.state)));
        }

        if event.is_connected() {
            self.lifecycle.set_session(SessionState::Connected);
        } else if event.path.as_deref() == Some(self.config.target_path.as_str()) {
            let change = match event.event_type {
                EventType::NodeCreated => "created",
                EventType::NodeDeleted => "deleted",
                EventType::NodeDataChanged => "data changed",
                EventType::NodeChildrenChanged => "children changed",
                EventType::None => "state changed",
            };
            info!(target_path = %self.config.target_path, change, "Target node changed");
        } else {
            debug!(event_type = ?event.event_type, path = ?event.path, "Ignoring notification");
            return Ok(None);
        }

        match self.refresh(client).await {
            Ok(()) => Ok(None),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Refresh failed, waiting for the session to reconnect");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Re-arm every watch and publish what they saw
    async fn refresh(&self, client: &dyn CoordinationClient) -> Result<()> {
        let path = self.config.target_path.as_str();
        let snapshot = loop {
            if client.exists_watch(path).await?.is_none() {
                break NodeSnapshot::default();
            }

            // The node can vanish between the calls; the existence watch then
            // reports NodeCreated, so look again instead of failing.
            let (data, stat) = match client.get_data_watch(path).await {
                Ok(found) => found,
                Err(CoordinationError::NoNode(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let mut children = match client.get_children_watch(path).await {
                Ok(children) => children,
                Err(CoordinationError::NoNode(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            children.sort();

            break NodeSnapshot {
                exists: true,
                data,
                version: Some(stat.version),
                children,
            };
        };

        self.refreshes.fetch_add(1, Ordering::SeqCst);
        debug!(
            target_path = path,
            exists = snapshot.exists,
            data = %String::from_utf8_lossy(&snapshot.data),
            children = ?snapshot.children,
            "Refreshed target node"
        );
        self.snapshot_tx.send_replace(snapshot);
        Ok(())
    }
}
