use std::future::Future;
use std::sync::Arc;

use crate::controller::LeaderElection;

/// Gates application work on this candidate's role
pub struct LeaderGuard {
    election: Arc<LeaderElection>,
}

impl LeaderGuard {
    pub fn new(election: Arc<LeaderElection>) -> Self {
        Self { election }
    }

    /// Run `f` if the latest resolution made this candidate leader.
    ///
    /// Followers get `None`, and so does a candidate whose election has not
    /// resolved yet or has ended, since its role is `Unknown` then. The role
    /// is sampled once; losing the session while `f` runs does not stop it.
    pub async fn run_if_leader<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.election.is_leader() {
            Some(f().await)
        } else {
            None
        }
    }

    /// `true` only while the live session holds the lowest ordinal
    pub fn should_process(&self) -> bool {
        self.election.is_leader()
    }

    /// Wait for this candidate to take the lead. Returns `false` once the
    /// election terminates without it, as a finished controller never
    /// leads again.
    pub async fn wait_for_leadership(&self) -> bool {
        let mut rx = self.election.subscribe();

        tokio::select! {
            led = async { rx.wait_for(|role| role.is_leader()).await.is_ok() } => led,
            _ = self.election.wait_terminated() => self.election.is_leader(),
        }
    }
}
