//! Persistence seams: the replication DLQ table and the shard's durable
//! replication ack levels.

use crate::dlq::PutReplicationTaskToDlqRequest;
use crate::Result;

#[async_trait::async_trait]
pub trait DlqStore: Send + Sync + 'static {
    /// Durably record a task which could not be applied. Must be idempotent
    /// on `(source_cluster, task_id)`.
    async fn put_replication_task_to_dlq(
        &self,
        request: PutReplicationTaskToDlqRequest,
    ) -> Result<()>;
}

/// The shard's view of persisted replication progress. Watermarks are
/// initialised from here at processor start and flushed back periodically;
/// the apply path itself never writes persisted state.
#[async_trait::async_trait]
pub trait ShardState: Send + Sync + 'static {
    fn shard_id(&self) -> i32;

    /// Last `last_processed_message_id` durably acknowledged for
    /// `source_cluster`, or [`crate::EMPTY_MESSAGE_ID`] if none.
    async fn cluster_replication_level(&self, source_cluster: &str) -> Result<i64>;

    async fn update_cluster_replication_level(
        &self,
        source_cluster: &str,
        last_processed_message_id: i64,
    ) -> Result<()>;
}
