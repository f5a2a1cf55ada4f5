//! Backend API abstraction
//!
//! `BackendApi` covers the six calls the test flow makes against the
//! evaluation platform:
//! - `current_user`: identity of the API key owner
//! - `create_agent` / `delete_agent`: proxied agent records
//! - `trigger_check` / `most_recent_check`: controller health checks
//! - `create_assessment`: tau-bench submission
//!
//! `HttpBackend` is the reqwest implementation; `fakes::MemoryBackend`
//! is a scripted in-memory stand-in for tests.

mod http;

use async_trait::async_trait;

use crate::domain::{AgentRecord, AssessmentRequest, CheckReport, NewAgentRequest, RecordId, UserInfo};
use crate::error::BackendResult;

pub use http::{HttpBackend, API_KEY_COOKIE};

/// Outcome of `GET /agents/{id}/most_recent_check` that reached the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckStatus {
    /// A check has completed; the report may or may not say "ready".
    Report(CheckReport),
    /// 404: the backend has not finished any check for this agent yet.
    NoChecksYet,
    /// Any other non-success status.
    Unexpected { status: u16 },
}

/// Calls made against the evaluation backend.
///
/// Non-success statuses on setup calls surface as `BackendError::Status`
/// carrying the response body. `trigger_check` ignores the status and
/// only fails on transport errors.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// `GET /user`
    async fn current_user(&self) -> BackendResult<UserInfo>;

    /// `POST /agents/`
    async fn create_agent(&self, request: &NewAgentRequest) -> BackendResult<AgentRecord>;

    /// `GET /agents/{id}/check_again`
    async fn trigger_check(&self, agent_id: &RecordId) -> BackendResult<()>;

    /// `GET /agents/{id}/most_recent_check`
    async fn most_recent_check(&self, agent_id: &RecordId) -> BackendResult<CheckStatus>;

    /// `POST /assessments/`, returning one id per repetition.
    async fn create_assessment(&self, request: &AssessmentRequest)
        -> BackendResult<Vec<RecordId>>;

    /// `DELETE /agents/{id}`
    async fn delete_agent(&self, agent_id: &RecordId) -> BackendResult<()>;
}
