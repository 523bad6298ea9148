use crate::ReplicationError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One unit of the ordered replication stream emitted by a source cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTask {
    /// Monotone position of this task within its shard's stream.
    pub source_task_id: i64,
    /// When the source cluster created the task. Used for lag metrics only.
    pub creation_time: Option<SystemTime>,
    pub attributes: TaskAttributes,
}

impl ReplicationTask {
    pub fn task_type(&self) -> TaskType {
        self.attributes.task_type()
    }
}

/// Type-specific payload of a replication task. The set of variants is
/// closed: the executor is a single match over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskAttributes {
    SyncActivity(SyncActivityAttributes),
    HistoryV2(HistoryV2Attributes),
    FailoverMarker(FailoverMarkerAttributes),
    SyncWorkflowState(SyncWorkflowStateAttributes),
}

impl TaskAttributes {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::SyncActivity(_) => TaskType::SyncActivity,
            Self::HistoryV2(_) => TaskType::HistoryV2,
            Self::FailoverMarker(_) => TaskType::FailoverMarker,
            Self::SyncWorkflowState(_) => TaskType::SyncWorkflowState,
        }
    }
}

/// Discriminant of [`TaskAttributes`], used as a metrics label.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    SyncActivity,
    HistoryV2,
    FailoverMarker,
    SyncWorkflowState,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncActivity => "sync_activity",
            Self::HistoryV2 => "history_v2",
            Self::FailoverMarker => "failover_marker",
            Self::SyncWorkflowState => "sync_workflow_state",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one activity being mirrored from the source cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncActivityAttributes {
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

/// A batch of history events to replay through the local history engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryV2Attributes {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    /// Version history of the branch the events extend.
    pub version_history_items: Vec<VersionHistoryItem>,
    /// Encoded batch of history events.
    pub events: DataBlob,
    /// Events of the new run, when this batch closes one run and opens
    /// another (continue-as-new).
    pub new_run_events: Option<DataBlob>,
}

/// Marks that the source cluster observed a domain failover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverMarkerAttributes {
    pub domain_id: String,
    pub failover_version: i64,
    pub creation_time: Option<SystemTime>,
}

/// Full mutable-state snapshot, sent on reset/recovery instead of an
/// incremental event batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWorkflowStateAttributes {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub version: i64,
    pub workflow_state: DataBlob,
}

/// `(event_id, version)` boundary within a branch's version history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryItem {
    pub event_id: i64,
    pub version: i64,
}

/// Batched long-poll reply for one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMessages {
    /// Tasks in strictly increasing `source_task_id` order.
    pub tasks: Vec<ReplicationTask>,
    /// Highest task ID the source cluster read on our behalf, which may
    /// exceed the last task in `tasks` (e.g. filtered or empty ranges).
    pub last_retrieved_message_id: i64,
    /// More data was immediately available when the reply was cut.
    pub has_more: bool,
    pub sync_shard_status: Option<SyncShardStatus>,
}

/// Source-shard liveness heartbeat piggy-backed on a reply.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncShardStatus {
    pub timestamp: SystemTime,
}

/// An encoded payload plus its encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlob {
    pub encoding: BlobEncoding,
    pub data: Vec<u8>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobEncoding {
    Json,
    /// Legacy binary encoding some source clusters still emit. This crate
    /// cannot decode it; tasks carrying it are routed to the DLQ.
    ThriftRw,
}

impl DataBlob {
    pub fn json(data: impl Into<Vec<u8>>) -> Self {
        Self {
            encoding: BlobEncoding::Json,
            data: data.into(),
        }
    }

    /// Decodes the blob as a batch of history events.
    ///
    /// An empty batch is rejected as corruption: every history replication
    /// task must carry at least one event, and downstream projections read
    /// the head of the batch.
    pub fn decode_history_events(&self) -> Result<Vec<HistoryEvent>, ReplicationError> {
        let events: Vec<HistoryEvent> = match self.encoding {
            BlobEncoding::Json => serde_json::from_slice(&self.data)?,
            BlobEncoding::ThriftRw => {
                return Err(ReplicationError::Corrupted(
                    "unsupported event batch encoding: thriftrw".into(),
                ))
            }
        };
        if events.is_empty() {
            return Err(ReplicationError::Corrupted(
                "history replication task carries an empty event batch".into(),
            ));
        }
        Ok(events)
    }
}

/// The subset of a history event this subsystem inspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub version: i64,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<SystemTime>,
}
