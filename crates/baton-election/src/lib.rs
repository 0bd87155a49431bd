//! Baton Leader Election
//!
//! Predecessor-watch leader election over a coordination service. Each
//! candidate holds one ephemeral sequential record under a shared namespace;
//! the smallest ordinal leads, and every other candidate watches only the
//! record immediately before its own. Deleting a record wakes exactly one
//! successor.
//!
//! ## Usage
//!
//! ```no_run
//! use baton_coord::MemoryCoordinator;
//! use baton_election::{LeaderElection, LeaderElectionConfig, LeaderGuard};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let service = Arc::new(MemoryCoordinator::new());
//!     let config = LeaderElectionConfig::new("localhost:2181".to_string());
//!     let election = Arc::new(LeaderElection::new(config, service));
//!
//!     let runner = election.clone();
//!     tokio::spawn(async move { runner.run().await });
//!
//!     let guard = LeaderGuard::new(election.clone());
//!     if guard.wait_for_leadership().await {
//!         println!("leading as {:?}", election.record());
//!     }
//! }
//! ```

mod controller;
mod error;
mod guard;
mod lifecycle;
mod monitor;
mod record;
mod registrar;
mod resolver;
mod role;

pub use controller::{LeaderElection, LeaderElectionConfig};
pub use error::{ElectionError, ErrorClass, Result};
pub use guard::LeaderGuard;
pub use lifecycle::{SessionState, Termination};
pub use monitor::{NodeMonitor, NodeMonitorConfig, NodeSnapshot};
pub use record::{CandidacyRecord, CandidateSet};
pub use registrar::CandidateRegistrar;
pub use resolver::LeadershipResolver;
pub use role::RoleState;
