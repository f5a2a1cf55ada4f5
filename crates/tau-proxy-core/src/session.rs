//! Tracked run state and teardown.
//!
//! `Session` records exactly what this run created: agent records on the
//! backend and controller processes on this machine. Cleanup acts only on
//! those, drains them as it goes, and never fails.

use std::time::Duration;

use crate::backend::BackendApi;
use crate::controller::{ControllerProcess, StopOutcome};
use crate::domain::{AgentRole, RecordId, TrackedAgent};
use crate::obs;

/// A controller found to have exited while the run was idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerExit {
    pub agent_name: String,
    pub pid: Option<u32>,
    pub code: Option<i32>,
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// `(agent name, outcome)` per controller, in launch order.
    pub stopped: Vec<(String, StopOutcome)>,
    /// Agents whose delete call succeeded.
    pub deleted: Vec<RecordId>,
    /// Agents whose delete call failed; they may still exist on the backend.
    pub failed_deletes: Vec<RecordId>,
}

impl CleanupReport {
    pub fn is_noop(&self) -> bool {
        self.stopped.is_empty() && self.deleted.is_empty() && self.failed_deletes.is_empty()
    }

    /// Tolerated errors during the pass.
    pub fn failures(&self) -> usize {
        let stop_failures = self
            .stopped
            .iter()
            .filter(|(_, o)| matches!(o, StopOutcome::Failed(_)))
            .count();
        stop_failures + self.failed_deletes.len()
    }
}

/// Resources owned by the current run.
#[derive(Debug, Default)]
pub struct Session {
    agents: Vec<TrackedAgent>,
    controllers: Vec<ControllerProcess>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_agent(&mut self, agent: TrackedAgent) {
        self.agents.push(agent);
    }

    pub fn track_controller(&mut self, controller: ControllerProcess) {
        self.controllers.push(controller);
    }

    pub fn agents(&self) -> &[TrackedAgent] {
        &self.agents
    }

    pub fn agent(&self, role: AgentRole) -> Option<&TrackedAgent> {
        self.agents.iter().find(|a| a.role == role)
    }

    pub fn controllers(&self) -> &[ControllerProcess] {
        &self.controllers
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty() && self.controllers.is_empty()
    }

    /// Controllers that exited since the last call.
    pub fn poll_controller_exits(&mut self) -> Vec<ControllerExit> {
        self.controllers
            .iter_mut()
            .filter_map(|c| {
                c.take_new_exit().map(|status| ControllerExit {
                    agent_name: c.agent_name().to_string(),
                    pid: c.pid(),
                    code: status.code(),
                })
            })
            .collect()
    }

    /// Stop every tracked controller, then delete every tracked agent.
    ///
    /// Controllers get `grace` to exit after SIGTERM before being killed.
    /// Delete failures are logged and recorded, never propagated. Tracked
    /// state is drained, so a second call is a no-op.
    pub async fn cleanup<B>(&mut self, backend: &B, grace: Duration) -> CleanupReport
    where
        B: BackendApi + ?Sized,
    {
        let mut report = CleanupReport::default();
        if self.is_empty() {
            return report;
        }

        obs::emit_cleanup_started(self.controllers.len(), self.agents.len());

        for mut controller in std::mem::take(&mut self.controllers) {
            let outcome = controller.stop(grace).await;
            obs::emit_controller_stopped(controller.agent_name(), controller.pid(), &outcome);
            report
                .stopped
                .push((controller.agent_name().to_string(), outcome));
        }

        for agent in std::mem::take(&mut self.agents) {
            match backend.delete_agent(&agent.id).await {
                Ok(()) => {
                    obs::emit_agent_deleted(&agent.name, &agent.id);
                    report.deleted.push(agent.id);
                }
                Err(e) => {
                    obs::emit_agent_delete_failed(&agent.name, &agent.id, &e);
                    report.failed_deletes.push(agent.id);
                }
            }
        }

        obs::emit_cleanup_finished(report.failures());
        report
    }
}
