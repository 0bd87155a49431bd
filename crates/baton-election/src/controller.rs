//! Election controller
//!
//! Owns one coordination session for its whole life:
//! - registers a candidacy once the session is connected
//! - resolves the role and watches the predecessor
//! - re-resolves from a fresh snapshot when the predecessor is deleted
//! - stops for good when the session disconnects or expires
//!
//! A controller runs once. After termination the hosting application builds
//! a new one, which opens a new session and registers a new record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use baton_coord::{event_channel, Connector, CoordinationClient, EventStream, EventType, WatchedEvent};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ElectionError, Result};
use crate::lifecycle::{close_session, Lifecycle, SessionState, Termination};
use crate::record::CandidacyRecord;
use crate::registrar::CandidateRegistrar;
use crate::resolver::LeadershipResolver;
use crate::role::RoleState;

/// Configuration for leader election
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    /// Coordination service endpoint
    pub address: String,

    /// Session expiry absent heartbeats
    pub session_timeout: Duration,

    /// Path holding the candidacy records
    pub namespace: String,

    /// Record name prefix
    pub prefix: String,

    /// Create the namespace if it is missing
    pub create_namespace: bool,

    /// Delay before retrying after a transient failure
    pub retry_backoff: Duration,

    /// Consecutive transient failures tolerated
    pub max_retries: u32,

    /// Identifier used in logs
    pub instance_id: String,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            address: "localhost:2181".to_string(),
            session_timeout: Duration::from_millis(3000),
            namespace: "/election".to_string(),
            prefix: "c_".to_string(),
            create_namespace: true,
            retry_backoff: Duration::from_millis(200),
            max_retries: 5,
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

impl LeaderElectionConfig {
    pub fn new(address: String) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: String) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_prefix(mut self, prefix: String) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_create_namespace(mut self, create: bool) -> Self {
        self.create_namespace = create;
        self
    }

    pub fn with_retry(mut self, backoff: Duration, max_retries: u32) -> Self {
        self.retry_backoff = backoff;
        self.max_retries = max_retries;
        self
    }

    pub fn with_instance_id(mut self, id: String) -> Self {
        self.instance_id = id;
        self
    }
}

/// State owned by one run of the dispatch loop
struct ElectionSession {
    client: Arc<dyn CoordinationClient>,
    record: Option<CandidacyRecord>,
    /// Full path of the watched predecessor
    watched: Option<String>,
    failures: u32,
    retry_at: Option<Instant>,
}

impl ElectionSession {
    fn new(client: Arc<dyn CoordinationClient>) -> Self {
        Self {
            client,
            record: None,
            watched: None,
            failures: 0,
            retry_at: None,
        }
    }
}

/// Leader election over a coordination service
pub struct LeaderElection {
    config: LeaderElectionConfig,
    connector: Arc<dyn Connector>,
    registrar: CandidateRegistrar,
    resolver: LeadershipResolver,
    lifecycle: Lifecycle,
    status_tx: watch::Sender<RoleState>,
    status_rx: watch::Receiver<RoleState>,
    record_tx: watch::Sender<Option<CandidacyRecord>>,
    resolutions: AtomicU64,
}

impl LeaderElection {
    pub fn new(config: LeaderElectionConfig, connector: Arc<dyn Connector>) -> Self {
        let registrar = CandidateRegistrar::new(config.namespace.clone(), config.prefix.clone())
            .with_create_namespace(config.create_namespace);
        let resolver = LeadershipResolver::new(config.namespace.clone(), config.prefix.clone());
        let (status_tx, status_rx) = watch::channel(RoleState::Unknown);

        Self {
            config,
            connector,
            registrar,
            resolver,
            lifecycle: Lifecycle::new(),
            status_tx,
            status_rx,
            record_tx: watch::Sender::new(None),
            resolutions: AtomicU64::new(0),
        }
    }

    /// Check if this instance is currently the leader
    pub fn is_leader(&self) -> bool {
        self.status_rx.borrow().is_leader()
    }

    pub fn role(&self) -> RoleState {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to role changes. Repeated resolutions that end in the same
    /// role do not notify.
    pub fn subscribe(&self) -> watch::Receiver<RoleState> {
        self.status_rx.clone()
    }

    pub fn session_state(&self) -> SessionState {
        self.lifecycle.session()
    }

    /// Record registered on the live session, if any
    pub fn record(&self) -> Option<CandidacyRecord> {
        self.record_tx.borrow().clone()
    }

    /// Number of resolution passes started by this controller
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::SeqCst)
    }

    pub fn termination(&self) -> Option<Termination> {
        self.lifecycle.termination()
    }

    /// Wait until the run loop has terminated
    pub async fn wait_terminated(&self) -> Termination {
        self.lifecycle.wait_terminated().await
    }

    /// Ask the run loop to close its session. The service then removes the
    /// record, and the next candidate takes over.
    pub fn shutdown(&self) {
        info!(instance_id = %self.config.instance_id, "Stopping leader election");
        self.lifecycle.request_shutdown();
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// Join the election and block until the session ends.
    ///
    /// Returns how the session ended, or the error that stopped the loop.
    /// Either way the session is released before returning.
    pub async fn run(&self) -> Result<Termination> {
        self.lifecycle.begin()?;

        info!(
            instance_id = %self.config.instance_id,
            address = %self.config.address,
            namespace = %self.config.namespace,
            "Starting leader election"
        );

        let (events, stream) = event_channel();
        let client = match self
            .connector
            .connect(&self.config.address, self.config.session_timeout, events)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                error!(instance_id = %self.config.instance_id, error = %e, "Failed to connect");
                self.lifecycle.finish(Termination::Failed);
                return Err(e.into());
            }
        };

        let mut session = ElectionSession::new(client);
        let outcome = match self.dispatch(&mut session, stream).await {
            Err(e) => match Termination::from_session_error(&e) {
                Some(termination) => {
                    warn!(instance_id = %self.config.instance_id, error = %e, "Session ended during a call");
                    Ok(termination)
                }
                None => Err(e),
            },
            ended => ended,
        };

        close_session(session.client.as_ref()).await;
        self.record_tx.send_replace(None);
        self.set_role(RoleState::Unknown);

        match &outcome {
            Ok(termination) => {
                self.lifecycle.finish(*termination);
                info!(instance_id = %self.config.instance_id, ?termination, "Leader election ended");
            }
            Err(e) => {
                self.lifecycle.finish(Termination::Failed);
                error!(
                    instance_id = %self.config.instance_id,
                    error = %e,
                    class = ?e.class(),
                    "Leader election failed"
                );
            }
        }
        outcome
    }

    /// Consume notifications until the session ends
    async fn dispatch(&self, session: &mut ElectionSession, mut stream: EventStream) -> Result<Termination> {
        let mut shutdown_rx = self.lifecycle.shutdown_receiver();

        loop {
            let retry_at = session.retry_at;
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown_rx) => {
                    return Ok(Termination::Closed);
                }

                event = stream.recv() => {
                    let Some(event) = event else {
                        warn!(instance_id = %self.config.instance_id, "Notification stream closed");
                        return Ok(Termination::Disconnected);
                    };
                    if let Some(termination) = self.handle_event(session, event).await? {
                        return Ok(termination);
                    }
                }

                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    session.retry_at = None;
                    self.advance(session).await?;
                }
            }
        }
    }

    async fn handle_event(
        &self,
        session: &mut ElectionSession,
        event: WatchedEvent,
    ) -> Result<Option<Termination>> {
        if event.is_terminal() {
            warn!(instance_id = %self.config.instance_id, state = ?event.state, "Session ended");
            return Ok(Some(Termination::from_keeper_state(event.state)));
        }

        if event.is_connected() {
            info!(
                instance_id = %self.config.instance_id,
                session = %session.client.session_id(),
                "Connected to coordination service"
            );
            self.lifecycle.set_session(SessionState::Connected);
            session.retry_at = None;
            self.advance(session).await?;
            return Ok(None);
        }

        // Watches are one-shot: any notification on the predecessor consumed
        // ours, so resolve again to re-arm it or to take over.
        let on_predecessor = session.watched.is_some() && event.path == session.watched;

        if on_predecessor && event.event_type == EventType::NodeDeleted {
            info!(
                instance_id = %self.config.instance_id,
                predecessor = ?event.path,
                "Predecessor left, resolving leadership"
            );
            session.watched = None;
            self.advance(session).await?;
        } else if on_predecessor {
            debug!(
                instance_id = %self.config.instance_id,
                event_type = ?event.event_type,
                predecessor = ?event.path,
                "Predecessor watch fired, re-arming"
            );
            session.watched = None;
            self.advance(session).await?;
        } else {
            debug!(event_type = ?event.event_type, path = ?event.path, "Ignoring notification");
        }

        Ok(None)
    }

    /// Register if needed, then resolve. Transient failures schedule a retry
    /// instead of failing the loop, up to `max_retries` in a row.
    async fn advance(&self, session: &mut ElectionSession) -> Result<()> {
        match self.elect(session).await {
            Ok(()) => {
                session.failures = 0;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                session.failures += 1;
                if session.failures > self.config.max_retries {
                    return Err(ElectionError::RetriesExhausted {
                        attempts: session.failures,
                        source: Box::new(e),
                    });
                }
                warn!(
                    instance_id = %self.config.instance_id,
                    error = %e,
                    attempt = session.failures,
                    max_retries = self.config.max_retries,
                    backoff_ms = self.config.retry_backoff.as_millis() as u64,
                    "Transient failure, retrying"
                );
                session.retry_at = Some(Instant::now() + self.config.retry_backoff);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn elect(&self, session: &mut ElectionSession) -> Result<()> {
        let record = match &session.record {
            Some(record) => record.clone(),
            None => {
                let record = self.registrar.register_candidacy(session.client.as_ref()).await?;
                session.record = Some(record.clone());
                self.record_tx.send_replace(Some(record.clone()));
                record
            }
        };

        self.resolutions.fetch_add(1, Ordering::SeqCst);
        let role = self.resolver.resolve(session.client.as_ref(), &record).await?;
        session.watched = role.predecessor().map(|name| self.resolver.record_path(name));
        self.set_role(role);
        Ok(())
    }

    /// Publish a role, announcing only actual changes
    fn set_role(&self, role: RoleState) {
        let previous = self.status_rx.borrow().clone();
        if previous == role {
            debug!(instance_id = %self.config.instance_id, %role, "Role unchanged");
            return;
        }

        let record = self.record_tx.borrow().as_ref().map(|r| r.name().to_string());
        match (&previous, &role) {
            (_, RoleState::Leader) => {
                info!(instance_id = %self.config.instance_id, ?record, "Became leader");
            }
            (RoleState::Leader, _) => {
                warn!(instance_id = %self.config.instance_id, "Lost leadership");
            }
            (RoleState::Unknown, RoleState::Follower { predecessor }) => {
                info!(instance_id = %self.config.instance_id, ?record, %predecessor, "Became follower");
            }
            (_, RoleState::Follower { predecessor }) => {
                info!(instance_id = %self.config.instance_id, ?record, %predecessor, "Watching new predecessor");
            }
            (_, RoleState::Unknown) => {
                debug!(instance_id = %self.config.instance_id, "Left the election");
            }
        }

        self.status_tx.send_replace(role);
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // The sender lives as long as the controller, so this only returns on a request.
    let _ = rx.wait_for(|requested| *requested).await;
}
