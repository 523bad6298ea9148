use crate::config::Config;
use crate::dlq::DlqBridge;
use crate::executor::TaskExecutor;
use crate::fetcher::{FetchRequest, TaskFetcher};
use replication_api::admin::ReplicationToken;
use replication_api::store::ShardState;
use replication_api::task::{ReplicationMessages, ReplicationTask, SyncShardStatus};
use replication_api::{ReplicationError, Result};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`TaskProcessor`]. Transitions are driven only by
/// `start` and `stop`; a processor that halts on a fatal error moves to
/// `Stopped` and is never restarted automatically.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessorState {
    Initialised,
    Running,
    Stopping,
    Stopped,
}

const STATE_INITIALISED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Pulls one shard's slice of a source cluster's replication stream and
/// applies it locally.
///
/// The processor is the sole writer of the shard's two watermarks:
///
/// * `last_processed_message_id` — highest task ID fully handled (applied,
///   DLQ-ed, or consumed as a no-op).
/// * `last_retrieved_message_id` — highest task ID observed in any reply.
///
/// Both move only forward, and `last_processed ≤ last_retrieved` always
/// holds. The persisted ack level trails `last_processed` and is advanced
/// only by the periodic flusher, never by the apply path.
pub struct TaskProcessor {
    shard_id: i32,
    source_cluster: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

struct Shared {
    state: AtomicU8,
    last_processed: AtomicI64,
    last_retrieved: AtomicI64,
}

impl Shared {
    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::SeqCst);
    }
}

struct Lifecycle {
    pending: Option<(Worker, mpsc::Receiver<ReplicationMessages>)>,
    worker: Option<JoinHandle<()>>,
}

impl TaskProcessor {
    pub fn new(
        shard_state: Arc<dyn ShardState>,
        fetcher: &TaskFetcher,
        executor: TaskExecutor,
        dlq: DlqBridge,
        config: Config,
    ) -> Self {
        let shard_id = shard_state.shard_id();
        let source_cluster = fetcher.source_cluster().to_string();
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(STATE_INITIALISED),
            last_processed: AtomicI64::new(replication_api::EMPTY_MESSAGE_ID),
            last_retrieved: AtomicI64::new(replication_api::EMPTY_MESSAGE_ID),
        });

        // The reply channel is this processor's alone: capacity one, the
        // fetcher is the only producer, and a dropped reply is recovered
        // by re-requesting with unchanged watermarks.
        let (reply_tx, reply_rx) = mpsc::channel(1);

        let worker = Worker {
            shard_id,
            source_cluster: source_cluster.clone(),
            config,
            executor,
            dlq,
            shard_state,
            request_tx: fetcher.request_sender(),
            reply_tx,
            shared: shared.clone(),
            cancel: cancel.clone(),
        };

        Self {
            shard_id,
            source_cluster,
            shared,
            cancel,
            lifecycle: Mutex::new(Lifecycle {
                pending: Some((worker, reply_rx)),
                worker: None,
            }),
        }
    }

    pub fn shard_id(&self) -> i32 {
        self.shard_id
    }

    pub fn source_cluster(&self) -> &str {
        &self.source_cluster
    }

    pub fn state(&self) -> ProcessorState {
        match self.shared.state.load(Ordering::SeqCst) {
            STATE_INITIALISED => ProcessorState::Initialised,
            STATE_RUNNING => ProcessorState::Running,
            STATE_STOPPING => ProcessorState::Stopping,
            _ => ProcessorState::Stopped,
        }
    }

    /// Highest task ID fully handled so far.
    pub fn last_processed_message_id(&self) -> i64 {
        self.shared.last_processed.load(Ordering::SeqCst)
    }

    /// Highest task ID observed in any reply so far.
    pub fn last_retrieved_message_id(&self) -> i64 {
        self.shared.last_retrieved.load(Ordering::SeqCst)
    }

    /// Launch the pull loop. Must be called after the shard context is
    /// ready; no-op if already started or stopped.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        let Some((worker, reply_rx)) = lifecycle.pending.take() else {
            return;
        };
        self.shared.set_state(STATE_RUNNING);
        lifecycle.worker = Some(tokio::spawn(worker.run(reply_rx)));
    }

    /// Request cancellation and wait for the pull loop to wind down. The
    /// persisted ack level is never advanced past the last fully-applied
    /// task. Idempotent.
    pub async fn stop(&self) {
        if self.state() == ProcessorState::Running {
            self.shared.set_state(STATE_STOPPING);
        }
        self.cancel.cancel();
        let worker = self.lifecycle.lock().unwrap().worker.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        self.shared.set_state(STATE_STOPPED);
    }
}

/// Whether a reply's batch of tasks was worked through to the end.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Batch {
    Completed,
    /// Transient failures outlasted the retry policy (or cancellation
    /// interrupted the batch); the unprocessed remainder of the range will
    /// be re-fetched.
    Aborted,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TaskOutcome {
    /// Applied, DLQ-ed, or discarded; the watermark may pass the task.
    Consumed,
    Aborted,
}

struct Worker {
    shard_id: i32,
    source_cluster: String,
    config: Config,
    executor: TaskExecutor,
    dlq: DlqBridge,
    shard_state: Arc<dyn ShardState>,
    request_tx: mpsc::Sender<FetchRequest>,
    reply_tx: mpsc::Sender<ReplicationMessages>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut reply_rx: mpsc::Receiver<ReplicationMessages>) {
        let level = match self
            .shard_state
            .cluster_replication_level(&self.source_cluster)
            .await
        {
            Ok(level) => level,
            Err(error) => {
                tracing::error!(
                    %error,
                    shard_id = self.shard_id,
                    source_cluster = self.source_cluster,
                    "failed to read the persisted replication ack level"
                );
                self.shared.set_state(STATE_STOPPED);
                return;
            }
        };

        let mut last_processed = level;
        let mut last_retrieved = level;
        let mut last_flushed = level;
        self.shared.last_processed.store(level, Ordering::SeqCst);
        self.shared.last_retrieved.store(level, Ordering::SeqCst);

        let flush_period = self.config.flush_interval.get();
        let mut flush = tokio::time::interval_at(
            tokio::time::Instant::now() + flush_period,
            flush_period,
        );
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            shard_id = self.shard_id,
            source_cluster = self.source_cluster,
            ack_level = level,
            "replication task processor started"
        );

        'pull: while !self.cancel.is_cancelled() {
            // Ask for more data. A full queue is fine: an earlier request
            // of ours is still pending and replies to the same channel.
            let request = FetchRequest {
                token: ReplicationToken {
                    shard_id: self.shard_id,
                    last_processed_message_id: last_processed,
                    last_retrieved_message_id: last_retrieved,
                },
                reply: self.reply_tx.clone(),
            };
            match self.request_tx.try_send(request) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(
                        shard_id = self.shard_id,
                        "fetch request queue is full; awaiting previous reply"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!(
                        shard_id = self.shard_id,
                        source_cluster = self.source_cluster,
                        "task fetcher is gone; stopping processor"
                    );
                    break 'pull;
                }
            }

            // A reply must arrive within the long-poll window plus slack;
            // past that the fetch (or its reply) is considered lost and we
            // re-request. Watermark flushes keep ticking while we wait.
            let wait = self.config.long_poll_timeout.get() + self.config.reply_wait_slack.get();
            let deadline = tokio::time::sleep(wait);
            tokio::pin!(deadline);
            let reply = loop {
                tokio::select! {
                    () = self.cancel.cancelled() => break 'pull,
                    () = &mut deadline => break None,
                    _ = flush.tick() => {
                        if !self.flush_watermark(&mut last_flushed, last_processed).await {
                            break 'pull;
                        }
                    }
                    reply = reply_rx.recv() => break reply,
                }
            };

            let Some(reply) = reply else {
                tracing::debug!(
                    shard_id = self.shard_id,
                    "no reply within the long-poll window; re-requesting"
                );
                continue;
            };

            let batch = match self
                .process_response(&reply, &mut last_processed, &mut last_retrieved)
                .await
            {
                Ok(batch) => batch,
                Err(error) => {
                    if !self.cancel.is_cancelled() {
                        tracing::error!(
                            %error,
                            shard_id = self.shard_id,
                            source_cluster = self.source_cluster,
                            "replication task processor halting"
                        );
                    }
                    break 'pull;
                }
            };

            metrics::gauge!(
                "replication_task_lag",
                "source_cluster" => self.source_cluster.clone(),
                "shard_id" => self.shard_id.to_string(),
            )
            .set((last_retrieved - last_processed) as f64);

            if let Some(status) = reply.sync_shard_status {
                self.forward_sync_shard_status(status).await;
            }

            let idle = reply.tasks.is_empty() && !reply.has_more;
            if idle || batch == Batch::Aborted {
                let wait = self.config.no_task_retry_wait.get();
                tokio::select! {
                    () = self.cancel.cancelled() => break 'pull,
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }

        let _ = self.flush_watermark(&mut last_flushed, last_processed).await;
        self.shared.set_state(STATE_STOPPED);
        tracing::info!(
            shard_id = self.shard_id,
            source_cluster = self.source_cluster,
            ack_level = last_processed,
            "replication task processor stopped"
        );
    }

    /// Apply one reply's batch in stream order.
    ///
    /// `last_retrieved` tracks the highest reply watermark seen; replies of
    /// superseded fetches may arrive late and must not rewind it. Each
    /// consumed task advances `last_processed`; once a batch completes
    /// cleanly the processed watermark catches up to the retrieved one,
    /// accounting for ranges the source filtered out.
    async fn process_response(
        &self,
        reply: &ReplicationMessages,
        last_processed: &mut i64,
        last_retrieved: &mut i64,
    ) -> Result<Batch> {
        *last_retrieved = (*last_retrieved).max(reply.last_retrieved_message_id);
        self.shared
            .last_retrieved
            .store(*last_retrieved, Ordering::SeqCst);

        let mut aborted = false;
        for task in &reply.tasks {
            if self.cancel.is_cancelled() {
                aborted = true;
                break;
            }
            // Duplicate delivery of an already-handled prefix.
            if task.source_task_id <= *last_processed {
                continue;
            }
            match self.process_single_task(task).await? {
                TaskOutcome::Consumed => {
                    *last_processed = task.source_task_id;
                    self.shared
                        .last_processed
                        .store(*last_processed, Ordering::SeqCst);
                }
                TaskOutcome::Aborted => {
                    aborted = true;
                    break;
                }
            }
        }

        if aborted {
            return Ok(Batch::Aborted);
        }

        *last_processed = (*last_processed).max(*last_retrieved);
        self.shared
            .last_processed
            .store(*last_processed, Ordering::SeqCst);
        Ok(Batch::Completed)
    }

    /// Apply one task under the retry policy, then classify the outcome.
    /// `Err` is reserved for conditions that must halt the processor.
    async fn process_single_task(&self, task: &ReplicationTask) -> Result<TaskOutcome> {
        let mut retry = self.config.task_retry_policy.get().start();

        loop {
            match self.execute_once(task).await {
                Ok(()) => return Ok(TaskOutcome::Consumed),
                Err(error) if error.is_transient() => {
                    let Some(delay) = retry.next_backoff() else {
                        tracing::warn!(
                            %error,
                            source_task_id = task.source_task_id,
                            shard_id = self.shard_id,
                            attempts = retry.attempt() + 1,
                            "transient failures exhausted the retry policy; re-fetching the range"
                        );
                        return Ok(TaskOutcome::Aborted);
                    };
                    tracing::debug!(
                        %error,
                        source_task_id = task.source_task_id,
                        attempt = retry.attempt(),
                        "retrying replication task"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return Ok(TaskOutcome::Aborted),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => return self.handle_terminal_error(task, error).await,
            }
        }
    }

    async fn execute_once(&self, task: &ReplicationTask) -> Result<()> {
        let injection_rate = self.config.error_injection_rate.get();
        if injection_rate > 0.0 && rand::random::<f64>() < injection_rate {
            return Err(ReplicationError::Transient(
                "injected replication error".into(),
            ));
        }

        let started = std::time::Instant::now();
        let result = self.executor.execute(task, false).await;

        metrics::histogram!(
            "replication_task_apply_seconds",
            "task_type" => task.task_type().as_str(),
            "source_cluster" => self.source_cluster.clone(),
        )
        .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(()) => {
                metrics::counter!(
                    "replication_tasks_applied",
                    "task_type" => task.task_type().as_str(),
                    "source_cluster" => self.source_cluster.clone(),
                )
                .increment(1);
                if let Some(created) = task.creation_time {
                    if let Ok(lag) = SystemTime::now().duration_since(created) {
                        metrics::histogram!(
                            "replication_task_latency_seconds",
                            "task_type" => task.task_type().as_str(),
                            "source_cluster" => self.source_cluster.clone(),
                        )
                        .record(lag.as_secs_f64());
                    }
                }
            }
            Err(_) => {
                metrics::counter!(
                    "replication_tasks_failed",
                    "task_type" => task.task_type().as_str(),
                    "source_cluster" => self.source_cluster.clone(),
                )
                .increment(1);
            }
        }
        result
    }

    async fn handle_terminal_error(
        &self,
        task: &ReplicationTask,
        error: ReplicationError,
    ) -> Result<TaskOutcome> {
        if error.is_fatal() {
            return Err(error);
        }

        match &error {
            // The execution does not exist here. If this cluster is
            // authoritative for the task's failover version the scan will
            // rebuild it; if a remote cluster is, it will re-emit the
            // authoritative state. Either way the task is consumed.
            ReplicationError::NotFound(_) => {
                self.trigger_scan(task).await;
                Ok(TaskOutcome::Consumed)
            }
            error if error.is_corruption() => {
                self.dlq.put_task(task, &self.cancel).await?;
                self.trigger_scan(task).await;
                Ok(TaskOutcome::Consumed)
            }
            // Everything else is a poisoned task: the DLQ row becomes the
            // durable record and the watermark passes the task.
            _ => {
                self.dlq.put_task(task, &self.cancel).await?;
                Ok(TaskOutcome::Consumed)
            }
        }
    }

    async fn trigger_scan(&self, task: &ReplicationTask) {
        if let Err(error) = self.dlq.trigger_data_inconsistency_scan(task).await {
            tracing::warn!(
                %error,
                source_task_id = task.source_task_id,
                shard_id = self.shard_id,
                "failed to trigger data-inconsistency scan"
            );
        }
    }

    async fn forward_sync_shard_status(&self, status: SyncShardStatus) {
        let staleness = self.config.sync_shard_staleness.get();
        let fresh = match SystemTime::now().duration_since(status.timestamp) {
            Ok(age) => age <= staleness,
            // Ahead of our clock; treat as fresh.
            Err(_) => true,
        };
        if !fresh {
            tracing::debug!(
                shard_id = self.shard_id,
                source_cluster = self.source_cluster,
                "dropping stale sync-shard heartbeat"
            );
            return;
        }
        if let Err(error) = self.executor.handle_sync_shard_status(&status).await {
            tracing::warn!(
                %error,
                shard_id = self.shard_id,
                source_cluster = self.source_cluster,
                "failed to forward sync-shard status"
            );
        }
    }

    /// Persist `last_processed` as the shard's ack level for this source.
    /// Returns `false` only for fatal persistence errors.
    async fn flush_watermark(&self, last_flushed: &mut i64, last_processed: i64) -> bool {
        if last_processed == *last_flushed {
            return true;
        }
        match self
            .shard_state
            .update_cluster_replication_level(&self.source_cluster, last_processed)
            .await
        {
            Ok(()) => {
                *last_flushed = last_processed;
                true
            }
            Err(error) if error.is_fatal() => {
                if !self.cancel.is_cancelled() {
                    tracing::error!(
                        %error,
                        shard_id = self.shard_id,
                        "cannot persist replication ack level; halting"
                    );
                }
                false
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    shard_id = self.shard_id,
                    "failed to persist replication ack level; will retry"
                );
                true
            }
        }
    }
}
