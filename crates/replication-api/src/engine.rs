//! Contract of the local history engine, the component which materialises
//! replicated state-machine transitions. This crate only drives it; the
//! engine itself lives with the history service.

use crate::task::{
    DataBlob, FailoverMarkerAttributes, HistoryV2Attributes, SyncActivityAttributes,
    SyncWorkflowStateAttributes, VersionHistoryItem,
};
use crate::Result;
use std::time::SystemTime;

#[async_trait::async_trait]
pub trait HistoryEngine: Send + Sync + 'static {
    /// Mirror the state of one activity from the source cluster.
    async fn sync_activity(&self, request: SyncActivityRequest) -> Result<()>;

    /// Replay a batch of history events onto the local branch.
    async fn replicate_events(&self, request: ReplicateEventsRequest) -> Result<()>;

    /// Apply a full mutable-state snapshot.
    async fn sync_workflow_state(&self, request: SyncWorkflowStateRequest) -> Result<()>;

    /// Advance per-domain failover versions. Local bookkeeping only; the
    /// engine must not fail this for per-domain reasons.
    async fn notify_failover_markers(&self, markers: Vec<FailoverMarkerAttributes>) -> Result<()>;

    /// Record a liveness heartbeat of the source shard.
    async fn sync_shard_status(&self, request: SyncShardStatusRequest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncActivityRequest {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub version: i64,
    pub scheduled_id: i64,
    pub scheduled_time: Option<SystemTime>,
    pub started_id: i64,
    pub started_time: Option<SystemTime>,
    pub last_heartbeat_time: Option<SystemTime>,
    pub attempt: i32,
    pub details: Vec<u8>,
}

impl From<&SyncActivityAttributes> for SyncActivityRequest {
    fn from(attrs: &SyncActivityAttributes) -> Self {
        Self {
            domain_id: attrs.domain_id.clone(),
            workflow_id: attrs.workflow_id.clone(),
            run_id: attrs.run_id.clone(),
            version: attrs.version,
            scheduled_id: attrs.scheduled_id,
            scheduled_time: attrs.scheduled_time,
            started_id: attrs.started_id,
            started_time: attrs.started_time,
            last_heartbeat_time: attrs.last_heartbeat_time,
            attempt: attrs.attempt,
            details: attrs.details.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateEventsRequest {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub version_history_items: Vec<VersionHistoryItem>,
    pub events: DataBlob,
    pub new_run_events: Option<DataBlob>,
}

impl From<&HistoryV2Attributes> for ReplicateEventsRequest {
    fn from(attrs: &HistoryV2Attributes) -> Self {
        Self {
            domain_id: attrs.domain_id.clone(),
            workflow_id: attrs.workflow_id.clone(),
            run_id: attrs.run_id.clone(),
            version_history_items: attrs.version_history_items.clone(),
            events: attrs.events.clone(),
            new_run_events: attrs.new_run_events.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncWorkflowStateRequest {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub version: i64,
    pub workflow_state: DataBlob,
}

impl From<&SyncWorkflowStateAttributes> for SyncWorkflowStateRequest {
    fn from(attrs: &SyncWorkflowStateAttributes) -> Self {
        Self {
            domain_id: attrs.domain_id.clone(),
            workflow_id: attrs.workflow_id.clone(),
            run_id: attrs.run_id.clone(),
            version: attrs.version,
            workflow_state: attrs.workflow_state.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncShardStatusRequest {
    pub source_cluster: String,
    pub shard_id: i32,
    pub timestamp: SystemTime,
}
