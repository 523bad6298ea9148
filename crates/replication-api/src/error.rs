/// Error surface shared by every collaborator trait and by the replication
/// components themselves.
///
/// The processor never matches on error strings: classification happens
/// through the variant and the `is_transient` / `is_fatal` helpers.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// Transient infrastructure failure (network, timeout, leader change).
    /// Retried under the task retry policy; never advances a watermark.
    #[error("transient replication failure: {0}")]
    Transient(String),

    /// The callee is shedding load; equivalent to `Transient` for retry
    /// purposes but kept distinct so callers can apply extra backpressure.
    #[error("service busy: {0}")]
    ServiceBusy(String),

    /// Optimistic-concurrency conflict while updating mutable state.
    /// The conflicting writer wins; the apply is retried from scratch.
    #[error("mutable state update conflict")]
    Conflict,

    /// The workflow or activity the task refers to does not exist locally.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Replication state is internally inconsistent (corrupted mutable
    /// state, impossible event ranges). Routed to the DLQ and escalated to
    /// the data-inconsistency scan.
    #[error("replication state corrupted: {0}")]
    Corrupted(String),

    /// The task itself is malformed.
    #[error("bad replication task: {0}")]
    BadRequest(String),

    /// An embedded event batch could not be deserialized.
    #[error("failed to decode event batch")]
    Decode(#[from] serde_json::Error),

    /// This host no longer owns the shard. Fatal: the processor halts and
    /// the shard owner is expected to tear it down.
    #[error("shard ownership lost: {0}")]
    ShardOwnershipLost(String),
}

impl ReplicationError {
    /// Errors which are retried in place with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::ServiceBusy(_) | Self::Conflict
        )
    }

    /// Errors which terminate the owning processor.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ShardOwnershipLost(_))
    }

    /// Errors which indicate the replicated state itself is damaged,
    /// as opposed to the request or the transport.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted(_) | Self::Decode(_))
    }
}
