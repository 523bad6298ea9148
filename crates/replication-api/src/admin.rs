//! Contract of the remote cluster's admin RPC surface. One long-poll call
//! fetches replication messages for many shards at once.

use crate::task::ReplicationMessages;
use crate::Result;
use std::collections::HashMap;

/// Per-shard read position carried by a fetch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReplicationToken {
    pub shard_id: i32,
    pub last_processed_message_id: i64,
    pub last_retrieved_message_id: i64,
}

#[async_trait::async_trait]
pub trait AdminClient: Send + Sync + 'static {
    /// Long-poll the source cluster for replication messages on behalf of
    /// every shard in `tokens`. `cluster_name` identifies the *calling*
    /// cluster, so the source can maintain per-consumer ack levels.
    ///
    /// The reply maps shard ID to that shard's messages; shards with
    /// nothing to report may be absent.
    async fn get_replication_messages(
        &self,
        tokens: &[ReplicationToken],
        cluster_name: &str,
    ) -> Result<HashMap<i32, ReplicationMessages>>;
}
