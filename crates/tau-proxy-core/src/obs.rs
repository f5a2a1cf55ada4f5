//! Structured observability hooks for the proxy test lifecycle.
//!
//! This module provides:
//! - A run-scoped tracing span via the `RunSpan` RAII guard
//! - Emission functions for agent, controller, readiness, assessment and
//!   cleanup events, each tagged with a stable `event` field
//!
//! Lifecycle events are emitted at `info!`; failures that the flow
//! tolerates are emitted at `warn!`.

use tracing::{info, warn};

use crate::controller::StopOutcome;
use crate::domain::{AgentRole, RecordId};

/// RAII guard that enters a span tagged with the run's instance id.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("3f9a01bc");
/// // every event below carries instance_id = "3f9a01bc"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(instance_id: &str) -> Self {
        let span = tracing::info_span!("tau_proxy.run", instance_id = %instance_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: agent record created on the backend.
pub fn emit_agent_created(role: AgentRole, name: &str, id: &RecordId) {
    info!(event = "agent.created", role = %role, agent_name = %name, agent_id = %id);
}

/// Emit event: agent record deleted during cleanup.
pub fn emit_agent_deleted(name: &str, id: &RecordId) {
    info!(event = "agent.deleted", agent_name = %name, agent_id = %id);
}

/// Emit event: agent deletion failed (warning level, cleanup continues).
pub fn emit_agent_delete_failed(name: &str, id: &RecordId, error: &dyn std::fmt::Display) {
    warn!(event = "agent.delete_failed", agent_name = %name, agent_id = %id, error = %error);
}

/// Emit event: controller process spawned.
pub fn emit_controller_started(name: &str, pid: Option<u32>, port: u16) {
    info!(event = "controller.started", agent_name = %name, pid = ?pid, port = port);
}

/// Emit event: controller stopped during cleanup.
pub fn emit_controller_stopped(name: &str, pid: Option<u32>, outcome: &StopOutcome) {
    match outcome {
        StopOutcome::Failed(reason) => {
            warn!(event = "controller.stopped", agent_name = %name, pid = ?pid, error = %reason)
        }
        other => {
            info!(event = "controller.stopped", agent_name = %name, pid = ?pid, outcome = ?other)
        }
    }
}

/// Emit event: controller exited on its own while the run was idle.
pub fn emit_controller_exited(name: &str, pid: Option<u32>, code: Option<i32>) {
    warn!(event = "controller.exited", agent_name = %name, pid = ?pid, exit_code = ?code);
}

/// Emit event: one readiness poll finished without the agent being ready.
pub fn emit_readiness_polled(name: &str, attempt: u32, status: &str) {
    info!(event = "readiness.polled", agent_name = %name, attempt = attempt, status = %status);
}

/// Emit event: agent reported reachable with registered sub-agents.
pub fn emit_readiness_ready(name: &str, agent_count: u64, elapsed_ms: u64) {
    info!(
        event = "readiness.ready",
        agent_name = %name,
        agent_count = agent_count,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: agent never became ready (warning level).
pub fn emit_readiness_timed_out(name: &str, attempts: u32, elapsed_ms: u64) {
    warn!(
        event = "readiness.timed_out",
        agent_name = %name,
        attempts = attempts,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: assessment accepted by the backend.
pub fn emit_assessment_created(count: usize, first: &RecordId) {
    info!(event = "assessment.created", count = count, first_id = %first);
}

/// Emit event: cleanup began with this many tracked resources.
pub fn emit_cleanup_started(controllers: usize, agents: usize) {
    info!(event = "cleanup.started", controllers = controllers, agents = agents);
}

/// Emit event: cleanup finished; `failures` counts tolerated errors.
pub fn emit_cleanup_finished(failures: usize) {
    info!(event = "cleanup.finished", failures = failures);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("deadbeef");
    }
}
