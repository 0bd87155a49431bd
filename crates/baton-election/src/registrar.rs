//! Candidacy registration

use baton_coord::{join_path, Acl, CoordinationClient, CoordinationError, CreateMode};
use tracing::{debug, info};

use crate::error::{ElectionError, Result};
use crate::record::CandidacyRecord;

/// Creates this process's ephemeral, sequential record under the election
/// namespace. One record per session; a new session always gets a new record.
#[derive(Debug, Clone)]
pub struct CandidateRegistrar {
    namespace: String,
    prefix: String,
    create_namespace: bool,
}

impl CandidateRegistrar {
    pub fn new(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            prefix: prefix.into(),
            create_namespace: false,
        }
    }

    /// Create missing namespace nodes (persistent) before registering
    pub fn with_create_namespace(mut self, create: bool) -> Self {
        self.create_namespace = create;
        self
    }

    pub async fn register_candidacy(&self, client: &dyn CoordinationClient) -> Result<CandidacyRecord> {
        if self.create_namespace {
            self.ensure_namespace(client).await?;
        }

        let full_path = client
            .create(
                &join_path(&self.namespace, &self.prefix),
                &[],
                Acl::OpenUnsafe,
                CreateMode::EphemeralSequential,
            )
            .await
            .map_err(|e| match e {
                CoordinationError::NoNode(_) => ElectionError::NoNamespace(self.namespace.clone()),
                other => other.into(),
            })?;

        let name = full_path
            .strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| ElectionError::MalformedRecord(full_path.clone()))?;
        let record = CandidacyRecord::parse(&self.prefix, name)
            .ok_or_else(|| ElectionError::MalformedRecord(full_path.clone()))?;

        info!(
            session = %client.session_id(),
            path = %full_path,
            ordinal = record.ordinal(),
            "Registered candidacy"
        );
        Ok(record)
    }

    /// Create each missing segment of the namespace path
    async fn ensure_namespace(&self, client: &dyn CoordinationClient) -> Result<()> {
        let mut path = String::new();
        for segment in self.namespace.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);

            match client.create(&path, &[], Acl::OpenUnsafe, CreateMode::Persistent).await {
                Ok(_) => debug!(%path, "Created namespace node"),
                Err(CoordinationError::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
