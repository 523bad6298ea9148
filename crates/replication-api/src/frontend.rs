//! Contract of the local frontend's signalling API, used by the repair
//! bridge to start-or-signal the data-corruption check workflow.

use crate::Result;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SignalWithStartWorkflowRequest {
    /// Target domain; the repair bridge always uses the system local domain.
    pub domain: String,
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_list: String,
    pub execution_start_to_close_timeout: Duration,
    pub signal_name: String,
    /// Serialized signal payload, opaque to the frontend.
    pub signal_input: Vec<u8>,
    pub workflow_id_reuse_policy: WorkflowIdReusePolicy,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkflowIdReusePolicy {
    AllowDuplicate,
    RejectDuplicate,
}

#[async_trait::async_trait]
pub trait FrontendClient: Send + Sync + 'static {
    /// Signal the workflow, starting it first if it is not running.
    async fn signal_with_start_workflow_execution(
        &self,
        request: SignalWithStartWorkflowRequest,
    ) -> Result<()>;
}
