use crate::config::Property;
use crate::retry::RetryPolicy;
use replication_api::cluster::ClusterMetadata;
use replication_api::dlq::{DlqTaskType, PutReplicationTaskToDlqRequest, ReplicationTaskInfo};
use replication_api::frontend::{
    FrontendClient, SignalWithStartWorkflowRequest, WorkflowIdReusePolicy,
};
use replication_api::store::DlqStore;
use replication_api::task::{ReplicationTask, TaskAttributes};
use replication_api::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Well-known identifiers of the data-corruption check workflow, which runs
/// in the system local domain and repairs executions whose replicated state
/// is inconsistent.
pub mod repair {
    use std::time::Duration;

    pub const SYSTEM_LOCAL_DOMAIN: &str = "system-local";
    pub const WORKFLOW_ID_PREFIX: &str = "CheckDataCorruption";
    pub const WORKFLOW_TYPE: &str = "check-data-corruption-workflow";
    pub const TASK_LIST: &str = "check-data-corruption-tasklist";
    pub const SIGNAL_NAME: &str = "check-data-corruption-signal";
    pub const WORKFLOW_TIMEOUT: Duration = Duration::from_secs(300);
}

/// Signal payload identifying one execution to scan. Serialized as JSON;
/// field names match what the checker workflow deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    #[serde(rename = "DomainID")]
    pub domain_id: String,
    #[serde(rename = "WorkflowID")]
    pub workflow_id: String,
    #[serde(rename = "RunID")]
    pub run_id: String,
    #[serde(rename = "ShardID")]
    pub shard_id: i32,
}

/// Project a poisoned replication task into its DLQ record.
///
/// For history tasks the event-ID range is derived from the head of the
/// encoded batch; a batch that cannot be decoded cannot be projected, and
/// the error surfaces to the caller.
pub fn generate_dlq_request(
    source_cluster: &str,
    task: &ReplicationTask,
) -> Result<PutReplicationTaskToDlqRequest> {
    let task_info = match &task.attributes {
        TaskAttributes::SyncActivity(attrs) => ReplicationTaskInfo {
            domain_id: attrs.domain_id.clone(),
            workflow_id: attrs.workflow_id.clone(),
            run_id: attrs.run_id.clone(),
            task_type: DlqTaskType::SyncActivity,
            task_id: task.source_task_id,
            version: attrs.version,
            scheduled_id: attrs.scheduled_id,
            ..Default::default()
        },
        TaskAttributes::HistoryV2(attrs) => {
            let events = attrs.events.decode_history_events()?;
            let first_event_id = events[0].event_id;
            ReplicationTaskInfo {
                domain_id: attrs.domain_id.clone(),
                workflow_id: attrs.workflow_id.clone(),
                run_id: attrs.run_id.clone(),
                task_type: DlqTaskType::History,
                task_id: task.source_task_id,
                version: events[0].version,
                first_event_id,
                next_event_id: first_event_id + events.len() as i64,
                ..Default::default()
            }
        }
        TaskAttributes::FailoverMarker(attrs) => ReplicationTaskInfo {
            domain_id: attrs.domain_id.clone(),
            task_type: DlqTaskType::FailoverMarker,
            task_id: task.source_task_id,
            version: attrs.failover_version,
            creation_time: attrs.creation_time,
            ..Default::default()
        },
        TaskAttributes::SyncWorkflowState(attrs) => ReplicationTaskInfo {
            domain_id: attrs.domain_id.clone(),
            workflow_id: attrs.workflow_id.clone(),
            run_id: attrs.run_id.clone(),
            task_type: DlqTaskType::SyncWorkflowState,
            task_id: task.source_task_id,
            version: attrs.version,
            ..Default::default()
        },
    };

    Ok(PutReplicationTaskToDlqRequest {
        source_cluster_name: source_cluster.to_string(),
        task_info,
    })
}

/// Converts poisoned tasks into durable DLQ records and escalates
/// recoverable inconsistencies to the data-corruption check workflow.
pub struct DlqBridge {
    source_cluster: String,
    shard_id: i32,
    store: Arc<dyn DlqStore>,
    frontend: Arc<dyn FrontendClient>,
    cluster: Arc<dyn ClusterMetadata>,
    retry_policy: Property<RetryPolicy>,
}

impl DlqBridge {
    pub fn new(
        source_cluster: impl Into<String>,
        shard_id: i32,
        store: Arc<dyn DlqStore>,
        frontend: Arc<dyn FrontendClient>,
        cluster: Arc<dyn ClusterMetadata>,
        retry_policy: Property<RetryPolicy>,
    ) -> Self {
        Self {
            source_cluster: source_cluster.into(),
            shard_id,
            store,
            frontend,
            cluster,
            retry_policy,
        }
    }

    /// Durably record `task` in the DLQ, retrying transient persistence
    /// errors. An error return means the record could not be written and
    /// the caller must halt: the DLQ entry is the only durable trace of a
    /// task the watermark is about to skip.
    pub async fn put_task(
        &self,
        task: &ReplicationTask,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = generate_dlq_request(&self.source_cluster, task)?;
        let mut retry = self.retry_policy.get().start();

        loop {
            match self
                .store
                .put_replication_task_to_dlq(request.clone())
                .await
            {
                Ok(()) => {
                    metrics::counter!(
                        "replication_tasks_dlq",
                        "task_type" => task.task_type().as_str(),
                        "source_cluster" => self.source_cluster.clone(),
                    )
                    .increment(1);
                    tracing::warn!(
                        source_task_id = task.source_task_id,
                        task_type = %task.task_type(),
                        source_cluster = self.source_cluster,
                        "replication task routed to DLQ"
                    );
                    return Ok(());
                }
                Err(error) if error.is_transient() => {
                    let Some(delay) = retry.next_backoff() else {
                        return Err(error);
                    };
                    tracing::warn!(
                        %error,
                        source_task_id = task.source_task_id,
                        attempt = retry.attempt(),
                        "retrying DLQ write"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(error),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Start-or-signal the corruption-check workflow for the execution the
    /// task refers to, if the *local* cluster is authoritative for the
    /// task's failover version. When a remote cluster is authoritative this
    /// is a no-op: that cluster will re-emit the authoritative state.
    ///
    /// The checker deduplicates by execution tuple, so duplicate signals
    /// are harmless.
    pub async fn trigger_data_inconsistency_scan(&self, task: &ReplicationTask) -> Result<()> {
        let Some((execution, failover_version)) = self.scan_target(task) else {
            return Ok(());
        };

        let Some(owner) = self
            .cluster
            .cluster_name_for_failover_version(failover_version)
        else {
            tracing::warn!(
                failover_version,
                source_task_id = task.source_task_id,
                "no cluster owns the task's failover version; skipping scan"
            );
            return Ok(());
        };
        if owner != self.cluster.current_cluster_name() {
            return Ok(());
        }

        let request = SignalWithStartWorkflowRequest {
            domain: repair::SYSTEM_LOCAL_DOMAIN.to_string(),
            workflow_id: format!("{}-{}", repair::WORKFLOW_ID_PREFIX, self.shard_id),
            workflow_type: repair::WORKFLOW_TYPE.to_string(),
            task_list: repair::TASK_LIST.to_string(),
            execution_start_to_close_timeout: repair::WORKFLOW_TIMEOUT,
            signal_name: repair::SIGNAL_NAME.to_string(),
            signal_input: serde_json::to_vec(&execution)?,
            workflow_id_reuse_policy: WorkflowIdReusePolicy::AllowDuplicate,
        };
        self.frontend
            .signal_with_start_workflow_execution(request)
            .await?;

        metrics::counter!(
            "replication_tasks_repair",
            "task_type" => task.task_type().as_str(),
            "source_cluster" => self.source_cluster.clone(),
        )
        .increment(1);
        tracing::info!(
            source_task_id = task.source_task_id,
            domain_id = execution.domain_id,
            workflow_id = execution.workflow_id,
            "triggered data-inconsistency scan"
        );
        Ok(())
    }

    /// The execution a scan would cover, and the failover version that
    /// routes authority. Failover markers name no execution.
    fn scan_target(&self, task: &ReplicationTask) -> Option<(Execution, i64)> {
        let (domain_id, workflow_id, run_id, version) = match &task.attributes {
            TaskAttributes::SyncActivity(attrs) => (
                &attrs.domain_id,
                &attrs.workflow_id,
                &attrs.run_id,
                attrs.version,
            ),
            TaskAttributes::HistoryV2(attrs) => {
                let version = attrs.version_history_items.last()?.version;
                (&attrs.domain_id, &attrs.workflow_id, &attrs.run_id, version)
            }
            TaskAttributes::SyncWorkflowState(attrs) => (
                &attrs.domain_id,
                &attrs.workflow_id,
                &attrs.run_id,
                attrs.version,
            ),
            TaskAttributes::FailoverMarker(_) => return None,
        };
        Some((
            Execution {
                domain_id: domain_id.clone(),
                workflow_id: workflow_id.clone(),
                run_id: run_id.clone(),
                shard_id: self.shard_id,
            },
            version,
        ))
    }
}
