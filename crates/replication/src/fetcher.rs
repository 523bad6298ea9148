use crate::config::Config;
use crate::limit::SourceRateLimiter;
use replication_api::admin::{AdminClient, ReplicationToken};
use replication_api::task::ReplicationMessages;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A processor's request for more replication messages.
pub struct FetchRequest {
    /// The requesting shard's current read position.
    pub token: ReplicationToken,
    /// Where this shard's slice of the reply is delivered. The fetcher
    /// never blocks on it: if the processor is slow the reply is dropped,
    /// and the processor re-requests with the same watermarks.
    pub reply: mpsc::Sender<ReplicationMessages>,
}

/// Pulls replication messages from one source cluster on behalf of every
/// local shard.
///
/// Shards enqueue [`FetchRequest`]s onto the shared request channel; a
/// single background worker coalesces them, spends one rate-limiter token,
/// issues one `get_replication_messages` long-poll carrying every distinct
/// shard's token, and routes the per-shard replies back out.
pub struct TaskFetcher {
    source_cluster: String,
    consumer_cluster: String,
    config: Config,
    limiter: Arc<SourceRateLimiter>,
    admin: Arc<dyn AdminClient>,
    request_tx: mpsc::Sender<FetchRequest>,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

struct Lifecycle {
    request_rx: Option<mpsc::Receiver<FetchRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl TaskFetcher {
    /// `shard_count` bounds the request channel: at most one outstanding
    /// request per local shard.
    pub fn new(
        source_cluster: impl Into<String>,
        consumer_cluster: impl Into<String>,
        shard_count: usize,
        admin: Arc<dyn AdminClient>,
        config: Config,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(shard_count.max(1));
        let limiter = Arc::new(SourceRateLimiter::new(config.fetch_qps.clone()));

        Self {
            source_cluster: source_cluster.into(),
            consumer_cluster: consumer_cluster.into(),
            config,
            limiter,
            admin,
            request_tx,
            cancel: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle {
                request_rx: Some(request_rx),
                worker: None,
            }),
        }
    }

    /// Name of the remote cluster this fetcher pulls from.
    pub fn source_cluster(&self) -> &str {
        &self.source_cluster
    }

    /// Handle processors use to enqueue fetch requests.
    pub fn request_sender(&self) -> mpsc::Sender<FetchRequest> {
        self.request_tx.clone()
    }

    /// The token bucket shared by all consumers of this source cluster.
    pub fn rate_limiter(&self) -> Arc<SourceRateLimiter> {
        self.limiter.clone()
    }

    /// Launch the background worker. No-op if already started.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        let Some(request_rx) = lifecycle.request_rx.take() else {
            return;
        };

        let worker = Worker {
            source_cluster: self.source_cluster.clone(),
            consumer_cluster: self.consumer_cluster.clone(),
            config: self.config.clone(),
            limiter: self.limiter.clone(),
            admin: self.admin.clone(),
            cancel: self.cancel.clone(),
        };
        lifecycle.worker = Some(tokio::spawn(worker.run(request_rx)));
    }

    /// Signal shutdown and wait for the worker to drain its in-flight
    /// reply. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let worker = self.lifecycle.lock().unwrap().worker.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

struct Worker {
    source_cluster: String,
    consumer_cluster: String,
    config: Config,
    limiter: Arc<SourceRateLimiter>,
    admin: Arc<dyn AdminClient>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut request_rx: mpsc::Receiver<FetchRequest>) {
        tracing::info!(
            source_cluster = self.source_cluster,
            "replication task fetcher started"
        );

        loop {
            // Block until at least one shard wants data.
            let first = tokio::select! {
                () = self.cancel.cancelled() => break,
                request = request_rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            // Coalesce whatever else is queued, without blocking. Requests
            // are deduplicated by shard, newest watermarks winning.
            let mut pending: HashMap<i32, FetchRequest> = HashMap::new();
            pending.insert(first.token.shard_id, first);
            let limit = self.config.fetch_batch_limit.get().max(1);
            while pending.len() < limit {
                match request_rx.try_recv() {
                    Ok(request) => {
                        pending.insert(request.token.shard_id, request);
                    }
                    Err(_) => break,
                }
            }

            // One token per RPC, shared with every other consumer of the
            // source cluster.
            if !self.limiter.acquire(&self.cancel).await {
                break;
            }

            self.fetch_and_distribute(pending).await;
        }

        tracing::info!(
            source_cluster = self.source_cluster,
            "replication task fetcher stopped"
        );
    }

    async fn fetch_and_distribute(&self, mut pending: HashMap<i32, FetchRequest>) {
        let tokens: Vec<ReplicationToken> =
            pending.values().map(|request| request.token).collect();

        metrics::histogram!(
            "replication_fetch_batch_size",
            "source_cluster" => self.source_cluster.clone(),
        )
        .record(tokens.len() as f64);

        let mut by_shard = match self
            .admin
            .get_replication_messages(&tokens, &self.consumer_cluster)
            .await
        {
            Ok(by_shard) => by_shard,
            // Transient by construction: the affected processors time out
            // on their reply channels and re-request, and the next
            // iteration is rate-limited like any other.
            Err(error) => {
                tracing::warn!(
                    %error,
                    source_cluster = self.source_cluster,
                    shards = tokens.len(),
                    "failed to fetch replication messages"
                );
                return;
            }
        };

        for (shard_id, request) in pending.drain() {
            let Some(messages) = by_shard.remove(&shard_id) else {
                continue;
            };
            if request.reply.try_send(messages).is_err() {
                tracing::debug!(
                    shard_id,
                    source_cluster = self.source_cluster,
                    "dropping replication reply for slow processor"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{empty_messages, sync_activity_task, MockAdmin};
    use std::time::Duration;

    fn token(shard_id: i32, processed: i64, retrieved: i64) -> ReplicationToken {
        ReplicationToken {
            shard_id,
            last_processed_message_id: processed,
            last_retrieved_message_id: retrieved,
        }
    }

    fn fetcher_with(admin: Arc<MockAdmin>) -> TaskFetcher {
        TaskFetcher::new("standby", "active", 4, admin, Config::default())
    }

    async fn recv_reply(rx: &mut mpsc::Receiver<ReplicationMessages>) -> ReplicationMessages {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for reply")
            .expect("reply channel closed")
    }

    #[tokio::test]
    async fn coalesces_requests_and_keeps_latest_watermarks() {
        let admin = Arc::new(MockAdmin::default());
        admin.enqueue_reply(HashMap::from([(7, empty_messages(42))]));

        let fetcher = fetcher_with(admin.clone());
        let sender = fetcher.request_sender();
        let (reply_tx, mut reply_rx) = mpsc::channel(1);

        // Both queued before the worker starts; the second supersedes the
        // first for shard 7.
        sender
            .send(FetchRequest {
                token: token(7, 10, 12),
                reply: reply_tx.clone(),
            })
            .await
            .unwrap();
        sender
            .send(FetchRequest {
                token: token(7, 11, 13),
                reply: reply_tx.clone(),
            })
            .await
            .unwrap();
        fetcher.start();

        let reply = recv_reply(&mut reply_rx).await;
        assert_eq!(reply.last_retrieved_message_id, 42);

        let calls = admin.calls();
        assert_eq!(calls.len(), 1);
        let (tokens, cluster) = &calls[0];
        assert_eq!(cluster, "active");
        assert_eq!(tokens.as_slice(), &[token(7, 11, 13)]);

        fetcher.stop().await;
    }

    #[tokio::test]
    async fn multiplexes_distinct_shards_into_one_rpc() {
        let admin = Arc::new(MockAdmin::default());
        admin.enqueue_reply(HashMap::from([
            (1, empty_messages(5)),
            (2, empty_messages(9)),
        ]));

        let fetcher = fetcher_with(admin.clone());
        let sender = fetcher.request_sender();
        let (tx1, mut rx1) = mpsc::channel(1);
        let (tx2, mut rx2) = mpsc::channel(1);

        sender
            .send(FetchRequest {
                token: token(1, -1, -1),
                reply: tx1,
            })
            .await
            .unwrap();
        sender
            .send(FetchRequest {
                token: token(2, 3, 4),
                reply: tx2,
            })
            .await
            .unwrap();
        fetcher.start();

        assert_eq!(recv_reply(&mut rx1).await.last_retrieved_message_id, 5);
        assert_eq!(recv_reply(&mut rx2).await.last_retrieved_message_id, 9);

        let calls = admin.calls();
        assert_eq!(calls.len(), 1);
        let mut shards: Vec<i32> = calls[0].0.iter().map(|t| t.shard_id).collect();
        shards.sort();
        assert_eq!(shards, vec![1, 2]);

        fetcher.stop().await;
    }

    #[tokio::test]
    async fn drops_reply_when_processor_is_slow() {
        let admin = Arc::new(MockAdmin::default());
        let mut messages = empty_messages(8);
        messages.tasks.push(sync_activity_task(8));
        admin.enqueue_reply(HashMap::from([(3, messages)]));
        admin.enqueue_reply(HashMap::from([(3, empty_messages(9))]));

        let fetcher = fetcher_with(admin.clone());
        let sender = fetcher.request_sender();

        // A full reply channel models a processor that has not drained its
        // previous reply yet.
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        reply_tx.try_send(empty_messages(1)).unwrap();

        sender
            .send(FetchRequest {
                token: token(3, 0, 0),
                reply: reply_tx.clone(),
            })
            .await
            .unwrap();
        fetcher.start();

        // The fetcher completed its RPC and dropped the reply.
        while admin.calls().len() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            recv_reply(&mut reply_rx).await.last_retrieved_message_id,
            1
        );

        // Once the processor drains and re-requests, it catches up.
        sender
            .send(FetchRequest {
                token: token(3, 0, 0),
                reply: reply_tx,
            })
            .await
            .unwrap();
        assert_eq!(recv_reply(&mut reply_rx).await.last_retrieved_message_id, 9);

        fetcher.stop().await;
    }

    #[tokio::test]
    async fn rpc_error_produces_no_reply_and_does_not_kill_the_worker() {
        let admin = Arc::new(MockAdmin::default());
        admin.enqueue_error("socket closed");
        admin.enqueue_reply(HashMap::from([(4, empty_messages(2))]));

        let fetcher = fetcher_with(admin.clone());
        let sender = fetcher.request_sender();
        let (reply_tx, mut reply_rx) = mpsc::channel(1);

        sender
            .send(FetchRequest {
                token: token(4, -1, -1),
                reply: reply_tx.clone(),
            })
            .await
            .unwrap();
        fetcher.start();

        while admin.calls().len() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(reply_rx.try_recv().is_err(), "errored fetch must not reply");

        // The worker survives to serve the retry.
        sender
            .send(FetchRequest {
                token: token(4, -1, -1),
                reply: reply_tx,
            })
            .await
            .unwrap();
        assert_eq!(recv_reply(&mut reply_rx).await.last_retrieved_message_id, 2);

        fetcher.stop().await;
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let admin = Arc::new(MockAdmin::default());
        let fetcher = fetcher_with(admin);

        fetcher.start();
        fetcher.start();
        fetcher.stop().await;
        fetcher.stop().await;

        assert_eq!(fetcher.source_cluster(), "standby");
        // The shared bucket outlives the worker and stays usable for other
        // consumers of the source cluster.
        let limiter = fetcher.rate_limiter();
        assert!(limiter.acquire(&CancellationToken::new()).await);
    }
}
