//! Leader determination
//!
//! The lowest ordinal leads. Every other candidate watches only the record
//! immediately before its own, so a departure wakes exactly one follower
//! instead of the whole fleet.

use baton_coord::{join_path, CoordinationClient};
use tracing::debug;

use crate::error::{ElectionError, Result};
use crate::record::{CandidacyRecord, CandidateSet};
use crate::role::RoleState;

#[derive(Debug, Clone)]
pub struct LeadershipResolver {
    namespace: String,
    prefix: String,
}

impl LeadershipResolver {
    pub fn new(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            prefix: prefix.into(),
        }
    }

    /// Decide the role of `current` from a fresh candidate listing.
    ///
    /// As a follower, an existence watch is installed on the predecessor
    /// before returning. A predecessor that disappears between the listing
    /// and the watch is never returned: the listing is fetched again until
    /// the watch lands on a live record or `current` leads.
    pub async fn resolve(
        &self,
        client: &dyn CoordinationClient,
        current: &CandidacyRecord,
    ) -> Result<RoleState> {
        let mut pass = 0u32;
        loop {
            pass += 1;
            let candidates = self.candidates(client).await?;
            if candidates.is_empty() {
                return Err(ElectionError::EmptyCandidateSet(self.namespace.clone()));
            }

            let predecessor = candidates
                .predecessor(current)
                .ok_or_else(|| ElectionError::CandidateMissing(current.name().to_string()))?;

            let Some(predecessor) = predecessor else {
                debug!(record = %current, candidates = candidates.len(), pass, "Resolved as leader");
                return Ok(RoleState::Leader);
            };

            let path = join_path(&self.namespace, predecessor.name());
            if client.exists_watch(&path).await?.is_some() {
                debug!(
                    record = %current,
                    predecessor = %predecessor,
                    candidates = candidates.len(),
                    pass,
                    "Resolved as follower"
                );
                return Ok(RoleState::Follower {
                    predecessor: predecessor.name().to_string(),
                });
            }

            debug!(
                record = %current,
                predecessor = %predecessor,
                pass,
                "Predecessor vanished before its watch was installed, resolving again"
            );
        }
    }

    pub async fn candidates(&self, client: &dyn CoordinationClient) -> Result<CandidateSet> {
        let children = client.get_children(&self.namespace).await?;
        Ok(CandidateSet::from_children(&self.prefix, children))
    }

    /// Full path of a namespace-relative record name
    pub fn record_path(&self, name: &str) -> String {
        join_path(&self.namespace, name)
    }
}
