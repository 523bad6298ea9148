//! Recording in-memory collaborators for unit tests.

use replication_api::admin::{AdminClient, ReplicationToken};
use replication_api::domain::{DomainCache, DomainEntry};
use replication_api::dlq::PutReplicationTaskToDlqRequest;
use replication_api::engine::{
    HistoryEngine, ReplicateEventsRequest, SyncActivityRequest, SyncShardStatusRequest,
    SyncWorkflowStateRequest,
};
use replication_api::frontend::{FrontendClient, SignalWithStartWorkflowRequest};
use replication_api::store::{DlqStore, ShardState};
use replication_api::task::{
    DataBlob, FailoverMarkerAttributes, HistoryEvent, HistoryV2Attributes, ReplicationMessages,
    ReplicationTask, SyncActivityAttributes, SyncWorkflowStateAttributes, TaskAttributes,
    VersionHistoryItem,
};
use replication_api::{ReplicationError, Result, EMPTY_MESSAGE_ID};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct MockAdmin {
    calls: Mutex<Vec<(Vec<ReplicationToken>, String)>>,
    script: Mutex<VecDeque<Result<HashMap<i32, ReplicationMessages>>>>,
}

impl MockAdmin {
    pub fn enqueue_reply(&self, by_shard: HashMap<i32, ReplicationMessages>) {
        self.script.lock().unwrap().push_back(Ok(by_shard));
    }

    pub fn enqueue_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(ReplicationError::Transient(message.into())));
    }

    pub fn calls(&self) -> Vec<(Vec<ReplicationToken>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AdminClient for MockAdmin {
    async fn get_replication_messages(
        &self,
        tokens: &[ReplicationToken],
        cluster_name: &str,
    ) -> Result<HashMap<i32, ReplicationMessages>> {
        self.calls
            .lock()
            .unwrap()
            .push((tokens.to_vec(), cluster_name.to_string()));
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            // An unscripted poll returns nothing for any shard.
            None => Ok(HashMap::new()),
        }
    }
}

/// History engine double. Calls are recorded before the scripted error (if
/// any) fires, so retry tests can count attempts.
#[derive(Default)]
pub(crate) struct MockEngine {
    pub sync_activity_calls: Mutex<Vec<SyncActivityRequest>>,
    pub replicate_events_calls: Mutex<Vec<ReplicateEventsRequest>>,
    pub sync_workflow_state_calls: Mutex<Vec<SyncWorkflowStateRequest>>,
    pub failover_marker_calls: Mutex<Vec<Vec<FailoverMarkerAttributes>>>,
    pub sync_shard_status_calls: Mutex<Vec<SyncShardStatusRequest>>,
    errors: Mutex<VecDeque<ReplicationError>>,
}

impl MockEngine {
    pub fn fail_next(&self, error: ReplicationError) {
        self.errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_n(&self, n: usize, make: impl Fn() -> ReplicationError) {
        let mut errors = self.errors.lock().unwrap();
        for _ in 0..n {
            errors.push_back(make());
        }
    }

    fn take_scripted(&self) -> Result<()> {
        match self.errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl HistoryEngine for MockEngine {
    async fn sync_activity(&self, request: SyncActivityRequest) -> Result<()> {
        self.sync_activity_calls.lock().unwrap().push(request);
        self.take_scripted()
    }

    async fn replicate_events(&self, request: ReplicateEventsRequest) -> Result<()> {
        self.replicate_events_calls.lock().unwrap().push(request);
        self.take_scripted()
    }

    async fn sync_workflow_state(&self, request: SyncWorkflowStateRequest) -> Result<()> {
        self.sync_workflow_state_calls.lock().unwrap().push(request);
        self.take_scripted()
    }

    async fn notify_failover_markers(
        &self,
        markers: Vec<FailoverMarkerAttributes>,
    ) -> Result<()> {
        self.failover_marker_calls.lock().unwrap().push(markers);
        self.take_scripted()
    }

    async fn sync_shard_status(&self, request: SyncShardStatusRequest) -> Result<()> {
        self.sync_shard_status_calls.lock().unwrap().push(request);
        self.take_scripted()
    }
}

#[derive(Default)]
pub(crate) struct MockDlqStore {
    pub requests: Mutex<Vec<PutReplicationTaskToDlqRequest>>,
    errors: Mutex<VecDeque<ReplicationError>>,
}

impl MockDlqStore {
    pub fn fail_next(&self, error: ReplicationError) {
        self.errors.lock().unwrap().push_back(error);
    }
}

#[async_trait::async_trait]
impl DlqStore for MockDlqStore {
    async fn put_replication_task_to_dlq(
        &self,
        request: PutReplicationTaskToDlqRequest,
    ) -> Result<()> {
        if let Some(error) = self.errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockFrontend {
    pub requests: Mutex<Vec<SignalWithStartWorkflowRequest>>,
}

#[async_trait::async_trait]
impl FrontendClient for MockFrontend {
    async fn signal_with_start_workflow_execution(
        &self,
        request: SignalWithStartWorkflowRequest,
    ) -> Result<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockDomains {
    entries: Mutex<HashMap<String, DomainEntry>>,
}

impl MockDomains {
    pub fn with(entry: DomainEntry) -> Self {
        let domains = Self::default();
        domains.insert(entry);
        domains
    }

    pub fn insert(&self, entry: DomainEntry) {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.id.clone(), entry);
    }
}

#[async_trait::async_trait]
impl DomainCache for MockDomains {
    async fn domain(&self, domain_id: &str) -> Result<Option<DomainEntry>> {
        Ok(self.entries.lock().unwrap().get(domain_id).cloned())
    }
}

pub(crate) struct MockShardState {
    shard_id: i32,
    levels: Mutex<HashMap<String, i64>>,
    pub updates: Mutex<Vec<(String, i64)>>,
}

impl MockShardState {
    pub fn new(shard_id: i32) -> Self {
        Self {
            shard_id,
            levels: Mutex::new(HashMap::new()),
            updates: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ShardState for MockShardState {
    fn shard_id(&self) -> i32 {
        self.shard_id
    }

    async fn cluster_replication_level(&self, source_cluster: &str) -> Result<i64> {
        Ok(*self
            .levels
            .lock()
            .unwrap()
            .get(source_cluster)
            .unwrap_or(&EMPTY_MESSAGE_ID))
    }

    async fn update_cluster_replication_level(
        &self,
        source_cluster: &str,
        last_processed_message_id: i64,
    ) -> Result<()> {
        self.levels
            .lock()
            .unwrap()
            .insert(source_cluster.to_string(), last_processed_message_id);
        self.updates
            .lock()
            .unwrap()
            .push((source_cluster.to_string(), last_processed_message_id));
        Ok(())
    }
}

pub(crate) fn test_domain() -> DomainEntry {
    DomainEntry {
        id: "domain-1".into(),
        name: "orders".into(),
        is_global: true,
        clusters: vec!["active".into(), "standby".into()],
    }
}

pub(crate) fn empty_messages(last_retrieved: i64) -> ReplicationMessages {
    ReplicationMessages {
        tasks: Vec::new(),
        last_retrieved_message_id: last_retrieved,
        has_more: false,
        sync_shard_status: None,
    }
}

pub(crate) fn sync_activity_task(source_task_id: i64) -> ReplicationTask {
    ReplicationTask {
        source_task_id,
        creation_time: None,
        attributes: TaskAttributes::SyncActivity(SyncActivityAttributes {
            domain_id: "domain-1".into(),
            workflow_id: "wf-1".into(),
            run_id: "run-1".into(),
            version: 100,
            scheduled_id: 1,
            scheduled_time: None,
            started_id: 2,
            started_time: None,
            last_heartbeat_time: None,
            attempt: 0,
            details: Vec::new(),
        }),
    }
}

pub(crate) fn history_task(source_task_id: i64, events: &[(i64, i64)]) -> ReplicationTask {
    let events: Vec<HistoryEvent> = events
        .iter()
        .map(|&(event_id, version)| HistoryEvent {
            event_id,
            version,
            event_type: None,
            timestamp: None,
        })
        .collect();
    let version_history_items = events
        .last()
        .map(|event| VersionHistoryItem {
            event_id: event.event_id,
            version: event.version,
        })
        .into_iter()
        .collect();

    ReplicationTask {
        source_task_id,
        creation_time: None,
        attributes: TaskAttributes::HistoryV2(HistoryV2Attributes {
            domain_id: "domain-1".into(),
            workflow_id: "wf-1".into(),
            run_id: "run-1".into(),
            version_history_items,
            events: DataBlob::json(serde_json::to_vec(&events).unwrap()),
            new_run_events: None,
        }),
    }
}

pub(crate) fn failover_marker_task(source_task_id: i64, failover_version: i64) -> ReplicationTask {
    ReplicationTask {
        source_task_id,
        creation_time: None,
        attributes: TaskAttributes::FailoverMarker(FailoverMarkerAttributes {
            domain_id: "domain-1".into(),
            failover_version,
            creation_time: None,
        }),
    }
}

pub(crate) fn sync_workflow_state_task(source_task_id: i64) -> ReplicationTask {
    ReplicationTask {
        source_task_id,
        creation_time: None,
        attributes: TaskAttributes::SyncWorkflowState(SyncWorkflowStateAttributes {
            domain_id: "domain-1".into(),
            workflow_id: "wf-1".into(),
            run_id: "run-1".into(),
            version: 100,
            workflow_state: DataBlob::json(b"{}".as_slice()),
        }),
    }
}
