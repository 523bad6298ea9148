use replication_api::cluster::ClusterMetadata;
use replication_api::domain::DomainCache;
use replication_api::engine::{HistoryEngine, SyncShardStatusRequest};
use replication_api::task::{ReplicationTask, SyncShardStatus, TaskAttributes};
use replication_api::Result;
use std::sync::Arc;

/// Stateless dispatch of one replication task onto the matching
/// history-engine entry point.
///
/// The executor also enforces the domain replication filter: a task whose
/// domain is not registered locally, or is not provisioned in this cluster,
/// is consumed as a no-op. Failover markers bypass the filter; they carry
/// per-domain bookkeeping the local cluster tracks regardless of where the
/// domain currently runs.
pub struct TaskExecutor {
    source_cluster: String,
    shard_id: i32,
    engine: Arc<dyn HistoryEngine>,
    domains: Arc<dyn DomainCache>,
    cluster: Arc<dyn ClusterMetadata>,
}

impl TaskExecutor {
    pub fn new(
        source_cluster: impl Into<String>,
        shard_id: i32,
        engine: Arc<dyn HistoryEngine>,
        domains: Arc<dyn DomainCache>,
        cluster: Arc<dyn ClusterMetadata>,
    ) -> Self {
        Self {
            source_cluster: source_cluster.into(),
            shard_id,
            engine,
            domains,
            cluster,
        }
    }

    /// Apply `task`. `force_apply` bypasses the domain filter; DLQ re-merge
    /// tooling uses it to re-drive tasks whose domain has since failed over.
    pub async fn execute(&self, task: &ReplicationTask, force_apply: bool) -> Result<()> {
        match &task.attributes {
            TaskAttributes::SyncActivity(attrs) => {
                if !force_apply && !self.should_apply(&attrs.domain_id).await? {
                    return self.skip(task);
                }
                self.engine.sync_activity(attrs.into()).await
            }
            TaskAttributes::HistoryV2(attrs) => {
                if !force_apply && !self.should_apply(&attrs.domain_id).await? {
                    return self.skip(task);
                }
                self.engine.replicate_events(attrs.into()).await
            }
            TaskAttributes::SyncWorkflowState(attrs) => {
                if !force_apply && !self.should_apply(&attrs.domain_id).await? {
                    return self.skip(task);
                }
                self.engine.sync_workflow_state(attrs.into()).await
            }
            TaskAttributes::FailoverMarker(attrs) => {
                self.engine
                    .notify_failover_markers(vec![attrs.clone()])
                    .await
            }
        }
    }

    /// Forward a source-shard liveness heartbeat to the engine.
    pub async fn handle_sync_shard_status(&self, status: &SyncShardStatus) -> Result<()> {
        self.engine
            .sync_shard_status(SyncShardStatusRequest {
                source_cluster: self.source_cluster.clone(),
                shard_id: self.shard_id,
                timestamp: status.timestamp,
            })
            .await
    }

    async fn should_apply(&self, domain_id: &str) -> Result<bool> {
        let Some(entry) = self.domains.domain(domain_id).await? else {
            return Ok(false);
        };
        Ok(entry.replicates_to(self.cluster.current_cluster_name()))
    }

    fn skip(&self, task: &ReplicationTask) -> Result<()> {
        metrics::counter!(
            "replication_tasks_skipped",
            "task_type" => task.task_type().as_str(),
            "source_cluster" => self.source_cluster.clone(),
        )
        .increment(1);
        tracing::debug!(
            source_task_id = task.source_task_id,
            task_type = %task.task_type(),
            "skipping task for domain not replicated locally"
        );
        Ok(())
    }
}
