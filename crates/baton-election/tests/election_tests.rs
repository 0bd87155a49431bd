//! End-to-end election tests against the in-process coordination service

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use baton_coord::{
    event_channel, Acl, Connector, CoordinationClient, CoordinationError, CreateMode, EventSink,
    EventStream, MemoryClient, MemoryCoordinator, SessionId, Stat,
};
use baton_election::{
    CandidacyRecord, CandidateRegistrar, ElectionError, LeaderElection, LeaderElectionConfig,
    LeaderGuard, LeadershipResolver, NodeMonitor, NodeMonitorConfig, RoleState, SessionState,
    Termination,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const NAMESPACE: &str = "/election";

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

fn config(id: &str) -> LeaderElectionConfig {
    LeaderElectionConfig::new("memory:2181".to_string())
        .with_instance_id(id.to_string())
        .with_retry(Duration::from_millis(10), 5)
}

struct Candidate {
    election: Arc<LeaderElection>,
    handle: JoinHandle<baton_election::Result<Termination>>,
}

impl Candidate {
    fn record_path(&self) -> String {
        let record = self.election.record().expect("candidate is registered");
        format!("{}/{}", NAMESPACE, record.name())
    }

    fn session(&self, service: &MemoryCoordinator) -> SessionId {
        service
            .ephemeral_owner(&self.record_path())
            .expect("record is owned by a session")
    }

    async fn finished(self) -> baton_election::Result<Termination> {
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("run loop finished")
            .expect("run loop did not panic")
    }
}

/// Start a candidate and wait until it has resolved a role
async fn start(service: &Arc<MemoryCoordinator>, config: LeaderElectionConfig) -> Candidate {
    let election = Arc::new(LeaderElection::new(config, service.clone()));
    let runner = election.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    eventually("candidate to resolve", || {
        election.record().is_some() && election.role() != RoleState::Unknown
    })
    .await;

    Candidate { election, handle }
}

async fn start_many(service: &Arc<MemoryCoordinator>, count: usize) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(count);
    for i in 0..count {
        candidates.push(start(service, config(&format!("candidate-{}", i))).await);
    }
    candidates
}

fn leaders(candidates: &[Candidate]) -> usize {
    candidates.iter().filter(|c| c.election.is_leader()).count()
}

/// A raw session holding one record, outside of any election
async fn hold_record(service: &MemoryCoordinator) -> (MemoryClient, EventStream, String) {
    let (events, stream) = event_channel();
    let client = service.open_session(Duration::from_secs(3), events).unwrap();
    let path = client
        .create("/election/c_", b"", Acl::OpenUnsafe, CreateMode::EphemeralSequential)
        .await
        .unwrap();
    (client, stream, path)
}

#[tokio::test]
async fn test_single_candidate_leads_without_watching() {
    let service = Arc::new(MemoryCoordinator::new());
    let candidate = start(&service, config("solo")).await;

    assert!(candidate.election.is_leader());
    assert_eq!(candidate.election.session_state(), SessionState::Connected);
    assert_eq!(candidate.election.record().unwrap().name(), "c_0000000000");
    assert_eq!(candidate.election.resolution_count(), 1);
    assert!(service.data_watchers(&candidate.record_path()).is_empty());
}

#[tokio::test]
async fn test_followers_watch_distinct_predecessors() {
    let service = Arc::new(MemoryCoordinator::new());
    let candidates = start_many(&service, 5).await;

    assert_eq!(leaders(&candidates), 1);
    assert!(candidates[0].election.is_leader());

    for pair in candidates.windows(2) {
        let (ahead, behind) = (&pair[0], &pair[1]);
        let ahead_name = ahead.election.record().unwrap().name().to_string();
        assert_eq!(behind.election.role().predecessor(), Some(ahead_name.as_str()));
        assert_eq!(
            service.data_watchers(&ahead.record_path()),
            vec![behind.session(&service)],
            "exactly one watcher per record"
        );
    }

    let last = candidates.last().unwrap();
    assert!(service.data_watchers(&last.record_path()).is_empty());
}

#[tokio::test]
async fn test_resolve_is_idempotent() {
    let service = MemoryCoordinator::new();
    service.create_node(NAMESPACE, b"").unwrap();
    let (_leader, _leader_rx, _) = hold_record(&service).await;

    let (events, _rx) = event_channel();
    let client = service.open_session(Duration::from_secs(3), events).unwrap();
    let record = CandidateRegistrar::new(NAMESPACE, "c_")
        .register_candidacy(&client)
        .await
        .unwrap();
    let resolver = LeadershipResolver::new(NAMESPACE, "c_");

    let first = resolver.resolve(&client, &record).await.unwrap();
    let second = resolver.resolve(&client, &record).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.predecessor(), Some("c_0000000000"));
    assert_eq!(
        service.data_watchers("/election/c_0000000000"),
        vec![client.session_id()]
    );
}

/// Deletes the first path it is asked to watch just before the watch lands
struct RacingClient {
    inner: MemoryClient,
    service: MemoryCoordinator,
    raced: Mutex<Option<String>>,
}

#[async_trait]
impl CoordinationClient for RacingClient {
    fn session_id(&self) -> SessionId {
        self.inner.session_id()
    }

    async fn create(&self, path: &str, data: &[u8], acl: Acl, mode: CreateMode) -> baton_coord::Result<String> {
        self.inner.create(path, data, acl, mode).await
    }

    async fn get_children(&self, path: &str) -> baton_coord::Result<Vec<String>> {
        self.inner.get_children(path).await
    }

    async fn get_children_watch(&self, path: &str) -> baton_coord::Result<Vec<String>> {
        self.inner.get_children_watch(path).await
    }

    async fn exists(&self, path: &str) -> baton_coord::Result<Option<Stat>> {
        self.inner.exists(path).await
    }

    async fn exists_watch(&self, path: &str) -> baton_coord::Result<Option<Stat>> {
        let first = {
            let mut raced = self.raced.lock();
            if raced.is_none() {
                *raced = Some(path.to_string());
                true
            } else {
                false
            }
        };
        if first {
            self.service.delete_node(path)?;
        }
        self.inner.exists_watch(path).await
    }

    async fn get_data(&self, path: &str) -> baton_coord::Result<(Vec<u8>, Stat)> {
        self.inner.get_data(path).await
    }

    async fn get_data_watch(&self, path: &str) -> baton_coord::Result<(Vec<u8>, Stat)> {
        self.inner.get_data_watch(path).await
    }

    async fn close(&self) -> baton_coord::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_predecessor_vanishing_before_watch_resolves_again() {
    let service = MemoryCoordinator::new();
    service.create_node(NAMESPACE, b"").unwrap();
    let (_c0, _c0_rx, c0_path) = hold_record(&service).await;
    let (_c1, _c1_rx, c1_path) = hold_record(&service).await;

    let (events, _rx) = event_channel();
    let client = RacingClient {
        inner: service.open_session(Duration::from_secs(3), events).unwrap(),
        service: service.clone(),
        raced: Mutex::new(None),
    };
    let record = CandidateRegistrar::new(NAMESPACE, "c_")
        .register_candidacy(&client)
        .await
        .unwrap();
    assert_eq!(record.name(), "c_0000000002");

    let role = LeadershipResolver::new(NAMESPACE, "c_")
        .resolve(&client, &record)
        .await
        .unwrap();

    assert_eq!(client.raced.lock().as_deref(), Some(c1_path.as_str()));
    assert!(!service.node_exists(&c1_path));
    assert_eq!(role.predecessor(), Some("c_0000000000"));
    assert!(service.data_watchers(&c0_path).contains(&client.session_id()));
}

#[tokio::test]
async fn test_leader_expiry_promotes_only_its_successor() {
    let service = Arc::new(MemoryCoordinator::new());
    let mut candidates = start_many(&service, 3).await;
    let third_resolutions = candidates[2].election.resolution_count();

    let leader = candidates.remove(0);
    service.expire_session(leader.session(&service));
    let election = leader.election.clone();
    assert_eq!(leader.finished().await.unwrap(), Termination::Expired);
    assert!(!election.is_leader());
    assert_eq!(election.session_state(), SessionState::Expired);

    eventually("successor to lead", || candidates[0].election.is_leader()).await;
    assert_eq!(leaders(&candidates), 1);
    assert_eq!(candidates[0].election.resolution_count(), 2);

    // Not watching the removed record, so never woken.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(candidates[1].election.resolution_count(), third_resolutions);
    assert_eq!(
        candidates[1].election.role().predecessor(),
        candidates[0].election.record().as_ref().map(CandidacyRecord::name)
    );
}

#[tokio::test]
async fn test_predecessor_data_change_rearms_watch() {
    let service = Arc::new(MemoryCoordinator::new());
    let mut candidates = start_many(&service, 2).await;
    let leader_path = candidates[0].record_path();
    let follower_session = candidates[1].session(&service);

    service.set_data(&leader_path, b"busy").unwrap();
    eventually("watch to be re-armed", || {
        service.data_watchers(&leader_path) == vec![follower_session]
    })
    .await;
    assert_eq!(candidates[1].election.resolution_count(), 2);
    assert!(!candidates[1].election.is_leader());

    let leader = candidates.remove(0);
    service.expire_session(leader.session(&service));
    assert_eq!(leader.finished().await.unwrap(), Termination::Expired);

    eventually("follower to lead", || candidates[0].election.is_leader()).await;
}

#[tokio::test]
async fn test_middle_departure_relinks_chain() {
    let service = Arc::new(MemoryCoordinator::new());
    let mut candidates = start_many(&service, 3).await;
    let first_name = candidates[0].election.record().unwrap().name().to_string();

    let middle = candidates.remove(1);
    service.expire_session(middle.session(&service));
    assert_eq!(middle.finished().await.unwrap(), Termination::Expired);

    eventually("last candidate to follow the leader", || {
        candidates[1].election.role().predecessor() == Some(first_name.as_str())
    })
    .await;
    assert!(candidates[0].election.is_leader());
    assert_eq!(candidates[0].election.resolution_count(), 1);
    assert_eq!(
        service.data_watchers(&candidates[0].record_path()),
        vec![candidates[1].session(&service)]
    );
}

#[tokio::test]
async fn test_only_predecessor_removal_triggers_resolution() {
    let service = Arc::new(MemoryCoordinator::new());
    service.create_node(NAMESPACE, b"").unwrap();
    let (_c0, _c0_rx, c0_path) = hold_record(&service).await;
    let (_c1, _c1_rx, c1_path) = hold_record(&service).await;
    let (_c2, _c2_rx, c2_path) = hold_record(&service).await;

    let candidate = start(&service, config("last")).await;
    let election = candidate.election.clone();
    assert_eq!(election.record().unwrap().name(), "c_0000000003");
    assert_eq!(election.role().predecessor(), Some("c_0000000002"));
    assert_eq!(election.resolution_count(), 1);

    service.delete_node(&c0_path).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(election.resolution_count(), 1);

    service.delete_node(&c2_path).unwrap();
    eventually("second resolution", || election.resolution_count() == 2).await;
    assert_eq!(election.role().predecessor(), Some("c_0000000001"));

    service.delete_node(&c1_path).unwrap();
    eventually("leadership", || election.is_leader()).await;
    assert_eq!(election.resolution_count(), 3);
}

#[tokio::test]
async fn test_disconnect_terminates_once_and_releases_record() {
    let service = Arc::new(MemoryCoordinator::new());
    let mut candidates = start_many(&service, 2).await;

    let leader = candidates.remove(0);
    let record_path = leader.record_path();
    service.disconnect_session(leader.session(&service));
    let election = leader.election.clone();
    assert_eq!(leader.finished().await.unwrap(), Termination::Disconnected);

    assert!(!service.node_exists(&record_path));
    assert!(election.record().is_none());
    assert_eq!(election.role(), RoleState::Unknown);
    assert_eq!(election.termination(), Some(Termination::Disconnected));
    assert_eq!(election.wait_terminated().await, Termination::Disconnected);
    assert!(matches!(election.run().await, Err(ElectionError::AlreadyRunning)));

    eventually("successor to lead", || candidates[0].election.is_leader()).await;
}

#[tokio::test]
async fn test_waiter_sees_termination_recorded_before_it_waits() {
    let service = Arc::new(MemoryCoordinator::new());
    let candidate = start(&service, config("early")).await;
    let election = candidate.election.clone();

    service.expire_session(candidate.session(&service));
    candidate.finished().await.unwrap();

    let waited = timeout(Duration::from_secs(1), election.wait_terminated()).await;
    assert_eq!(waited.unwrap(), Termination::Expired);
}

#[tokio::test]
async fn test_shutdown_closes_session_and_hands_over() {
    let service = Arc::new(MemoryCoordinator::new());
    let mut candidates = start_many(&service, 2).await;
    assert_eq!(service.live_sessions(), 2);

    let leader = candidates.remove(0);
    let record_path = leader.record_path();
    leader.election.shutdown();
    assert_eq!(leader.finished().await.unwrap(), Termination::Closed);

    assert!(!service.node_exists(&record_path));
    assert_eq!(service.live_sessions(), 1);
    eventually("successor to lead", || candidates[0].election.is_leader()).await;
}

#[tokio::test]
async fn test_shutdown_before_run_registers_nothing() {
    let service = Arc::new(MemoryCoordinator::new());
    let election = LeaderElection::new(config("idle"), service.clone());

    election.shutdown();
    assert_eq!(election.run().await.unwrap(), Termination::Closed);
    assert!(service.children(NAMESPACE).is_empty());
    assert_eq!(election.resolution_count(), 0);
}

#[tokio::test]
async fn test_transient_failure_recovers_on_reconnect() {
    let service = Arc::new(MemoryCoordinator::new());
    let leader = start(&service, config("leader")).await;
    let follower = start(
        &service,
        config("follower").with_retry(Duration::from_millis(20), 1000),
    )
    .await;

    service.set_available(false);
    service.expire_session(leader.session(&service));
    assert_eq!(leader.finished().await.unwrap(), Termination::Expired);

    eventually("a failed resolution", || follower.election.resolution_count() >= 2).await;
    assert!(!follower.election.is_leader());

    service.set_available(true);
    eventually("follower to lead", || follower.election.is_leader()).await;
    assert!(follower.election.termination().is_none());
}

#[tokio::test]
async fn test_transient_failures_exhaust_retries() {
    let service = Arc::new(MemoryCoordinator::new());
    let leader = start(&service, config("leader")).await;
    let follower = start(
        &service,
        config("follower").with_retry(Duration::from_millis(5), 2),
    )
    .await;

    service.set_available(false);
    service.expire_session(leader.session(&service));

    let election = follower.election.clone();
    match follower.finished().await {
        Err(ElectionError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhausted retries, got {:?}", other),
    }
    assert_eq!(election.termination(), Some(Termination::Failed));
    assert_eq!(election.role(), RoleState::Unknown);
}

#[tokio::test]
async fn test_missing_namespace_is_fatal_without_creation() {
    let service = Arc::new(MemoryCoordinator::new());
    let election = LeaderElection::new(config("strict").with_create_namespace(false), service.clone());

    let err = election.run().await.unwrap_err();
    assert!(matches!(err, ElectionError::NoNamespace(ref ns) if ns == NAMESPACE));
    assert_eq!(election.termination(), Some(Termination::Failed));
    assert_eq!(service.live_sessions(), 0);
}

#[tokio::test]
async fn test_connect_failure_reports_error() {
    let service = Arc::new(MemoryCoordinator::new());
    service.set_available(false);
    let election = LeaderElection::new(config("offline"), service.clone());

    let err = election.run().await.unwrap_err();
    assert!(matches!(err, ElectionError::Coordination(_)));
    assert_eq!(election.termination(), Some(Termination::Failed));
}

#[tokio::test]
async fn test_role_subscription_announces_changes_only() {
    let service = Arc::new(MemoryCoordinator::new());
    let first = start(&service, config("first")).await;
    let second = start(&service, config("second")).await;

    let mut roles = second.election.subscribe();
    roles.mark_unchanged();

    service.expire_session(first.session(&service));
    first.finished().await.unwrap();

    timeout(Duration::from_secs(5), roles.changed()).await.unwrap().unwrap();
    assert!(roles.borrow_and_update().is_leader());
    assert!(!roles.has_changed().unwrap());
}

#[tokio::test]
async fn test_leader_guard_gates_work() {
    let service = Arc::new(MemoryCoordinator::new());
    let leader = start(&service, config("leader")).await;
    let follower = start(&service, config("follower")).await;

    let leader_guard = LeaderGuard::new(leader.election.clone());
    let follower_guard = LeaderGuard::new(follower.election.clone());

    assert!(leader_guard.should_process());
    assert_eq!(leader_guard.run_if_leader(|| async { 7 }).await, Some(7));
    assert!(!follower_guard.should_process());
    assert_eq!(follower_guard.run_if_leader(|| async { 7 }).await, None);

    let waiter = tokio::spawn(async move { follower_guard.wait_for_leadership().await });
    leader.election.shutdown();
    leader.finished().await.unwrap();
    assert!(timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap());

    assert!(!leader_guard.should_process());
    assert_eq!(leader_guard.run_if_leader(|| async { 7 }).await, None);
}

#[tokio::test]
async fn test_leader_guard_gives_up_when_election_ends() {
    let service = Arc::new(MemoryCoordinator::new());
    let _leader = start(&service, config("leader")).await;
    let follower = start(&service, config("follower")).await;

    let guard = LeaderGuard::new(follower.election.clone());
    follower.election.shutdown();
    let led = timeout(Duration::from_secs(5), guard.wait_for_leadership()).await.unwrap();
    assert!(!led);
}

#[tokio::test]
async fn test_node_monitor_tracks_target() {
    let service = Arc::new(MemoryCoordinator::new());
    let monitor = Arc::new(NodeMonitor::new(
        NodeMonitorConfig::new("memory:2181".to_string(), "/target_znode".to_string()),
        service.clone(),
    ));
    let runner = monitor.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    eventually("initial refresh", || monitor.refresh_count() >= 1).await;
    assert!(!monitor.snapshot().exists);

    service.create_node("/target_znode", b"v1").unwrap();
    eventually("target to appear", || monitor.snapshot().exists).await;
    assert_eq!(monitor.snapshot().data, b"v1".to_vec());
    assert_eq!(monitor.snapshot().version, Some(0));

    service.set_data("/target_znode", b"v2").unwrap();
    eventually("data change", || monitor.snapshot().data == b"v2".to_vec()).await;
    assert_eq!(monitor.snapshot().version, Some(1));

    service.create_node("/target_znode/b", b"").unwrap();
    service.create_node("/target_znode/a", b"").unwrap();
    eventually("children", || monitor.snapshot().children.len() == 2).await;
    assert_eq!(monitor.snapshot().children, vec!["a".to_string(), "b".to_string()]);

    service.delete_node("/target_znode/a").unwrap();
    service.delete_node("/target_znode/b").unwrap();
    service.delete_node("/target_znode").unwrap();
    eventually("target to vanish", || !monitor.snapshot().exists).await;

    monitor.shutdown();
    let ended = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(ended.unwrap(), Termination::Closed);
    assert_eq!(service.live_sessions(), 0);
}

/// Hands out sessions whose existence watches report the session as expired
struct ExpiringConnector {
    service: MemoryCoordinator,
}

struct ExpiringClient {
    inner: MemoryClient,
}

#[async_trait]
impl Connector for ExpiringConnector {
    async fn connect(
        &self,
        _address: &str,
        session_timeout: Duration,
        events: EventSink,
    ) -> baton_coord::Result<Arc<dyn CoordinationClient>> {
        let inner = self.service.open_session(session_timeout, events)?;
        Ok(Arc::new(ExpiringClient { inner }))
    }
}

#[async_trait]
impl CoordinationClient for ExpiringClient {
    fn session_id(&self) -> SessionId {
        self.inner.session_id()
    }

    async fn create(&self, path: &str, data: &[u8], acl: Acl, mode: CreateMode) -> baton_coord::Result<String> {
        self.inner.create(path, data, acl, mode).await
    }

    async fn get_children(&self, path: &str) -> baton_coord::Result<Vec<String>> {
        self.inner.get_children(path).await
    }

    async fn get_children_watch(&self, path: &str) -> baton_coord::Result<Vec<String>> {
        self.inner.get_children_watch(path).await
    }

    async fn exists(&self, path: &str) -> baton_coord::Result<Option<Stat>> {
        self.inner.exists(path).await
    }

    async fn exists_watch(&self, _path: &str) -> baton_coord::Result<Option<Stat>> {
        Err(CoordinationError::SessionExpired)
    }

    async fn get_data(&self, path: &str) -> baton_coord::Result<(Vec<u8>, Stat)> {
        self.inner.get_data(path).await
    }

    async fn get_data_watch(&self, path: &str) -> baton_coord::Result<(Vec<u8>, Stat)> {
        self.inner.get_data_watch(path).await
    }

    async fn close(&self) -> baton_coord::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_session_expiry_during_resolution_reports_expired() {
    let service = Arc::new(MemoryCoordinator::new());
    let _leader = start(&service, config("leader")).await;

    let connector = Arc::new(ExpiringConnector {
        service: (*service).clone(),
    });
    let election = LeaderElection::new(config("expiring"), connector);

    let ended = timeout(Duration::from_secs(5), election.run()).await.unwrap();
    assert_eq!(ended.unwrap(), Termination::Expired);
    assert_eq!(election.termination(), Some(Termination::Expired));
    assert_eq!(election.session_state(), SessionState::Expired);
    assert_eq!(election.role(), RoleState::Unknown);
    assert_eq!(service.children(NAMESPACE).len(), 1);
}
