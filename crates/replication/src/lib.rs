//! Per-shard replication task processing.
//!
//! A local cluster consumes the ordered replication stream of each remote
//! ("source") cluster through two cooperating components:
//!
//! * [`fetcher::TaskFetcher`] — one per source cluster. Owns the long-poll
//!   RPC channel to the source's admin service, coalescing the fetch
//!   requests of every local shard into a single rate-limited call and
//!   demultiplexing the reply back to each shard.
//! * [`processor::TaskProcessor`] — one per `(shard, source)` pair. Drives
//!   the pull loop, applies tasks through the history engine in stream
//!   order, retries transient failures, forwards poisoned tasks to the DLQ,
//!   and advances the shard's acknowledgement watermarks.
//!
//! The stateless [`executor::TaskExecutor`] maps each task variant onto the
//! matching history-engine entry point, and [`dlq`] converts unappliable
//! tasks into DLQ records and (for recoverable inconsistencies) signals the
//! data-corruption check workflow.
//!
//! All collaborator contracts live in the `replication-api` crate,
//! re-exported here as [`api`].

pub use replication_api as api;

pub mod config;
pub mod dlq;
pub mod executor;
pub mod fetcher;
pub mod limit;
pub mod processor;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;
