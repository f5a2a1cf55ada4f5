//! In-memory fake backend (testing only)
//!
//! `MemoryBackend` implements [`BackendApi`] with scripted responses and
//! records every call so tests can assert on what the flow sent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backend::{BackendApi, CheckStatus};
use crate::domain::{AgentRecord, AssessmentRequest, CheckReport, NewAgentRequest, RecordId, UserInfo};
use crate::error::{BackendError, BackendResult};

/// One scripted answer to `most_recent_check`.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeCheck {
    Report(CheckReport),
    NotFound,
    Status(u16),
    TransportError,
}

impl FakeCheck {
    /// Controller reachable with `agent_count` sub-agents.
    pub fn ready(agent_count: u64) -> Self {
        FakeCheck::Report(CheckReport {
            is_ctrl_reachable: Some(true),
            agent_count: Some(agent_count),
        })
    }

    /// Controller not reachable yet.
    pub fn unreachable() -> Self {
        FakeCheck::Report(CheckReport {
            is_ctrl_reachable: Some(false),
            agent_count: Some(0),
        })
    }
}

/// A call received by the fake, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CurrentUser,
    CreateAgent(NewAgentRequest),
    TriggerCheck(RecordId),
    MostRecentCheck(RecordId),
    CreateAssessment(AssessmentRequest),
    DeleteAgent(RecordId),
}

#[derive(Debug)]
struct FakeState {
    user: Option<UserInfo>,
    agent_ids: VecDeque<RecordId>,
    next_agent_id: i64,
    fail_agent_creation_at: Option<usize>,
    agents_created: usize,
    checks: HashMap<RecordId, VecDeque<FakeCheck>>,
    assessment: Result<Vec<RecordId>, u16>,
    failing_deletes: HashSet<RecordId>,
    failing_triggers: HashSet<RecordId>,
    calls: Vec<BackendCall>,
}

impl Default for FakeState {
    fn default() -> Self {
        FakeState {
            user: None,
            agent_ids: VecDeque::new(),
            next_agent_id: 1,
            fail_agent_creation_at: None,
            agents_created: 0,
            checks: HashMap::new(),
            assessment: Ok(Vec::new()),
            failing_deletes: HashSet::new(),
            failing_triggers: HashSet::new(),
            calls: Vec::new(),
        }
    }
}

/// Scripted in-memory backend.
///
/// Defaults: no user (401), sequential integer agent ids starting at 1,
/// no checks (404), empty assessment list, triggers and deletes succeed.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<FakeState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_user(self, user: UserInfo) -> Self {
        self.state().user = Some(user);
        self
    }

    /// Ids handed out by successive `create_agent` calls.
    pub fn with_agent_ids(self, ids: Vec<RecordId>) -> Self {
        self.state().agent_ids = ids.into();
        self
    }

    /// Make the `index`-th (zero-based) `create_agent` call return 500.
    pub fn fail_agent_creation_at(self, index: usize) -> Self {
        self.state().fail_agent_creation_at = Some(index);
        self
    }

    /// Answers for `most_recent_check` on `agent_id`. The last entry
    /// repeats once the script is exhausted.
    pub fn script_checks(self, agent_id: RecordId, checks: Vec<FakeCheck>) -> Self {
        self.state().checks.insert(agent_id, checks.into());
        self
    }

    pub fn with_assessment_ids(self, ids: Vec<RecordId>) -> Self {
        self.state().assessment = Ok(ids);
        self
    }

    pub fn fail_assessment(self, status: u16) -> Self {
        self.state().assessment = Err(status);
        self
    }

    /// Make every `trigger_check` on `agent_id` fail at the transport level.
    pub fn fail_triggers_for(self, agent_id: RecordId) -> Self {
        self.state().failing_triggers.insert(agent_id);
        self
    }

    pub fn fail_delete_of(self, agent_id: RecordId) -> Self {
        self.state().failing_deletes.insert(agent_id);
        self
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    /// Payloads of all `create_agent` calls.
    pub fn created_agents(&self) -> Vec<NewAgentRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::CreateAgent(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    /// Ids passed to `delete_agent`, including failed deletes.
    pub fn deleted_agents(&self) -> Vec<RecordId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::DeleteAgent(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Number of `most_recent_check` calls for `agent_id`.
    pub fn check_polls(&self, agent_id: &RecordId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::MostRecentCheck(id) if id == agent_id))
            .count()
    }
}

fn status(operation: &'static str, code: u16) -> BackendError {
    BackendError::Status {
        operation,
        status: code,
        body: format!("{{\"detail\":\"fake {} failure\"}}", code),
    }
}

#[async_trait]
impl BackendApi for MemoryBackend {
    async fn current_user(&self) -> BackendResult<UserInfo> {
        let mut state = self.state();
        state.calls.push(BackendCall::CurrentUser);
        state
            .user
            .clone()
            .ok_or_else(|| status("fetch user info", 401))
    }

    async fn create_agent(&self, request: &NewAgentRequest) -> BackendResult<AgentRecord> {
        let mut state = self.state();
        state.calls.push(BackendCall::CreateAgent(request.clone()));

        if state.fail_agent_creation_at == Some(state.agents_created) {
            return Err(status("create agent", 500));
        }
        state.agents_created += 1;

        let id = match state.agent_ids.pop_front() {
            Some(id) => id,
            None => {
                let id = RecordId::Int(state.next_agent_id);
                state.next_agent_id += 1;
                id
            }
        };
        Ok(AgentRecord {
            id,
            name: Some(request.name.clone()),
        })
    }

    async fn trigger_check(&self, agent_id: &RecordId) -> BackendResult<()> {
        let mut state = self.state();
        state.calls.push(BackendCall::TriggerCheck(agent_id.clone()));
        if state.failing_triggers.contains(agent_id) {
            return Err(BackendError::Transport {
                url: format!("memory:///agents/{}/check_again", agent_id),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn most_recent_check(&self, agent_id: &RecordId) -> BackendResult<CheckStatus> {
        let mut state = self.state();
        state
            .calls
            .push(BackendCall::MostRecentCheck(agent_id.clone()));

        let next = match state.checks.get_mut(agent_id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };

        match next.unwrap_or(FakeCheck::NotFound) {
            FakeCheck::Report(report) => Ok(CheckStatus::Report(report)),
            FakeCheck::NotFound => Ok(CheckStatus::NoChecksYet),
            FakeCheck::Status(code) => Ok(CheckStatus::Unexpected { status: code }),
            FakeCheck::TransportError => Err(BackendError::Transport {
                url: format!("memory:///agents/{}/most_recent_check", agent_id),
                reason: "connection reset".to_string(),
            }),
        }
    }

    async fn create_assessment(
        &self,
        request: &AssessmentRequest,
    ) -> BackendResult<Vec<RecordId>> {
        let mut state = self.state();
        state
            .calls
            .push(BackendCall::CreateAssessment(request.clone()));
        state
            .assessment
            .clone()
            .map_err(|code| status("create assessment", code))
    }

    async fn delete_agent(&self, agent_id: &RecordId) -> BackendResult<()> {
        let mut state = self.state();
        state.calls.push(BackendCall::DeleteAgent(agent_id.clone()));
        if state.failing_deletes.contains(agent_id) {
            return Err(status("delete agent", 500));
        }
        Ok(())
    }
}
