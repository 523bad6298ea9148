//! Persistence-layer projection of a replication task which could not be
//! applied. The DLQ record intentionally keeps only the identifiers needed
//! to re-fetch and re-merge the task later.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutReplicationTaskToDlqRequest {
    /// Cluster the poisoned task was pulled from.
    pub source_cluster_name: String,
    pub task_info: ReplicationTaskInfo,
}

/// Projection of one replication task into the DLQ table's row shape.
/// Fields which do not apply to a given task type are left at zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplicationTaskInfo {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub task_type: DlqTaskType,
    /// `source_task_id` of the original task.
    pub task_id: i64,
    pub version: i64,
    pub first_event_id: i64,
    pub next_event_id: i64,
    pub scheduled_id: i64,
    pub creation_time: Option<SystemTime>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DlqTaskType {
    #[default]
    SyncActivity,
    History,
    FailoverMarker,
    SyncWorkflowState,
}
