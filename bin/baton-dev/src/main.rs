//! Baton Development Runner
//!
//! Runs a fleet of election candidates in one process against the
//! in-process coordination service:
//! - every candidate holds its own session and record
//! - the current leader's session is expired on a fixed interval
//! - the expired candidate rejoins with a new session
//! - an optional node monitor follows the configured target path

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

use baton_config::{AppConfig, ConfigLoader};
use baton_coord::{CoordinationError, MemoryCoordinator};
use baton_election::{
    LeaderElection, LeaderElectionConfig, NodeMonitor, NodeMonitorConfig, Termination,
};

/// Baton Development Runner
#[derive(Parser, Debug)]
#[command(name = "baton-dev")]
#[command(about = "Run a churning leader election fleet in one process")]
struct Args {
    /// Configuration file (otherwise BATON_CONFIG or the standard search paths)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of candidates
    #[arg(long, env = "BATON_DEV_CANDIDATES", default_value = "3")]
    candidates: usize,

    /// Expire the leader's session this often; 0 disables churn
    #[arg(long, env = "BATON_DEV_CHURN_INTERVAL_MS", default_value = "5000")]
    churn_interval_ms: u64,

    /// Run the node monitor even if the config leaves it disabled
    #[arg(long)]
    monitor: bool,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_config: bool,
}

struct Candidate {
    name: String,
    generation: u32,
    election: Arc<LeaderElection>,
    handle: JoinHandle<baton_election::Result<Termination>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    baton_common::init_logging("baton-dev");

    let args = Args::parse();
    if args.print_config {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;
    if args.candidates == 0 {
        anyhow::bail!("--candidates must be at least 1");
    }

    info!(
        candidates = args.candidates,
        churn_interval_ms = args.churn_interval_ms,
        namespace = %config.election.namespace,
        "Starting Baton dev runner"
    );

    let service = MemoryCoordinator::new();
    if !config.election.create_namespace {
        // Candidates will not create it, and nothing else populates the
        // in-process service.
        seed_namespace(&service, &config.election.namespace)?;
    }

    let monitor = if config.monitor.enabled || args.monitor {
        Some(start_monitor(&service, &config)?)
    } else {
        None
    };

    let mut fleet: Vec<Candidate> = (0..args.candidates)
        .map(|i| spawn_candidate(&service, &config, format!("candidate-{}", i), 0))
        .collect();

    let settle = config.coordination.session_timeout();
    match await_single_leader(&fleet, settle).await {
        Some(leader) => info!(leader = %fleet[leader].name, "Fleet converged"),
        None => warn!("No single leader after startup"),
    }

    let churn = (args.churn_interval_ms > 0).then(|| Duration::from_millis(args.churn_interval_ms));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Press Ctrl+C to shutdown");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping candidates");
                break;
            }
            _ = churn_tick(churn) => {
                churn_leader(&service, &config, &mut fleet, monitor.as_ref()).await;
            }
        }
    }

    for candidate in &fleet {
        candidate.election.shutdown();
    }
    for candidate in fleet {
        report(&candidate.name, candidate.handle).await;
    }
    if let Some((monitor, handle)) = monitor {
        monitor.shutdown();
        report("monitor", handle).await;
    }

    info!("Baton dev runner shutdown complete");
    Ok(())
}

fn spawn_candidate(
    service: &MemoryCoordinator,
    config: &AppConfig,
    name: String,
    generation: u32,
) -> Candidate {
    let election_config = LeaderElectionConfig::new(config.coordination.address.clone())
        .with_session_timeout(config.coordination.session_timeout())
        .with_namespace(config.election.namespace.clone())
        .with_prefix(config.election.prefix.clone())
        .with_create_namespace(config.election.create_namespace)
        .with_retry(config.election.retry_backoff(), config.election.max_retries)
        .with_instance_id(format!("{}#{}", name, generation));

    let election = Arc::new(LeaderElection::new(election_config, Arc::new(service.clone())));
    let runner = election.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    Candidate {
        name,
        generation,
        election,
        handle,
    }
}

/// Create every missing segment of the election namespace
fn seed_namespace(service: &MemoryCoordinator, namespace: &str) -> Result<()> {
    let mut path = String::new();
    for segment in namespace.split('/').filter(|s| !s.is_empty()) {
        path.push('/');
        path.push_str(segment);
        match service.create_node(&path, b"") {
            Ok(_) | Err(CoordinationError::NodeExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    info!(%namespace, "Seeded election namespace");
    Ok(())
}

fn start_monitor(
    service: &MemoryCoordinator,
    config: &AppConfig,
) -> Result<(Arc<NodeMonitor>, JoinHandle<baton_election::Result<Termination>>)> {
    let target = config.monitor.target_path.clone();
    if !target.starts_with('/') {
        anyhow::bail!("monitor.target_path must be absolute, got {:?}", target);
    }

    let monitor_config = NodeMonitorConfig::new(config.coordination.address.clone(), target)
        .with_session_timeout(config.coordination.session_timeout());
    let monitor = Arc::new(NodeMonitor::new(monitor_config, Arc::new(service.clone())));
    let runner = monitor.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    Ok((monitor, handle))
}

async fn churn_tick(interval: Option<Duration>) {
    match interval {
        Some(interval) => sleep(interval).await,
        None => std::future::pending().await,
    }
}

/// Expire the leader's session, rejoin it under a new session and wait for
/// the fleet to settle on one leader again
async fn churn_leader(
    service: &MemoryCoordinator,
    config: &AppConfig,
    fleet: &mut [Candidate],
    monitor: Option<&(Arc<NodeMonitor>, JoinHandle<baton_election::Result<Termination>>)>,
) {
    let Some(index) = fleet.iter().position(|c| c.election.is_leader()) else {
        warn!("No leader to expire");
        return;
    };

    let session = fleet[index].election.record().and_then(|record| {
        service.ephemeral_owner(&format!("{}/{}", config.election.namespace, record.name()))
    });
    let Some(session) = session else {
        warn!(candidate = %fleet[index].name, "Leader has no live record");
        return;
    };

    info!(candidate = %fleet[index].name, %session, "Expiring leader session");
    service.expire_session(session);

    let name = fleet[index].name.clone();
    let generation = fleet[index].generation + 1;
    let replacement = spawn_candidate(service, config, name, generation);
    let expired = std::mem::replace(&mut fleet[index], replacement);
    report(&expired.name, expired.handle).await;

    let settle = config.coordination.session_timeout();
    match await_single_leader(fleet, settle).await {
        Some(leader) => {
            let record = fleet[leader].election.record();
            info!(
                leader = %fleet[leader].name,
                generation = fleet[leader].generation,
                record = ?record.as_ref().map(|r| r.name().to_string()),
                "Fleet converged"
            );
            if monitor.is_some() {
                publish_leader(service, config, &fleet[leader].name);
            }
        }
        None => warn!(within_ms = settle.as_millis() as u64, "Fleet did not converge"),
    }
}

/// Poll until exactly one candidate reports leadership
async fn await_single_leader(fleet: &[Candidate], within: Duration) -> Option<usize> {
    let deadline = Instant::now() + within;
    loop {
        let leaders: Vec<usize> = fleet
            .iter()
            .enumerate()
            .filter(|(_, c)| c.election.is_leader())
            .map(|(i, _)| i)
            .collect();
        if leaders.len() == 1 {
            return Some(leaders[0]);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Write the leader's name to the monitored node so the monitor has
/// something to report
fn publish_leader(service: &MemoryCoordinator, config: &AppConfig, leader: &str) {
    let target = &config.monitor.target_path;
    let written = if service.node_exists(target) {
        service.set_data(target, leader.as_bytes()).map(|_| ())
    } else {
        service.create_node(target, leader.as_bytes()).map(|_| ())
    };
    if let Err(e) = written {
        warn!(target_path = %target, error = %e, "Failed to publish leader");
    }
}

async fn report(name: &str, handle: JoinHandle<baton_election::Result<Termination>>) {
    match timeout(Duration::from_secs(5), handle).await {
        Ok(Ok(Ok(termination))) => info!(candidate = name, ?termination, "Run loop ended"),
        Ok(Ok(Err(e))) => error!(candidate = name, error = %e, "Run loop failed"),
        Ok(Err(e)) => error!(candidate = name, error = %e, "Run loop panicked"),
        Err(_) => warn!(candidate = name, "Run loop did not stop in time"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
