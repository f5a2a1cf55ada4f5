//! End-to-end proxy test flow.
//!
//! Setup runs strictly in order:
//! 1. fetch the API key owner
//! 2. create the green and white proxied agents
//! 3. launch one controller per agent
//! 4. wait for both agents to report ready
//! 5. submit the tau-bench assessment
//!
//! Everything created is recorded in the caller's [`Session`] as soon as
//! it exists, so the caller can clean up after success, failure or
//! interruption alike.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backend::BackendApi;
use crate::config::ProxyTestConfig;
use crate::controller::ControllerLauncher;
use crate::domain::{
    AgentRole, AssessmentRequest, InstanceId, NewAgentRequest, RecordId, TrackedAgent, UserInfo,
};
use crate::error::{FlowError, Result};
use crate::obs;
use crate::readiness::{wait_for_ready, Readiness};
use crate::results::results_url;
use crate::session::Session;

/// Accepted assessment and where to look at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// One id per repetition, as returned by the backend.
    pub assessment_ids: Vec<RecordId>,
    /// Frontend page for the first assessment.
    pub results_url: String,
}

/// Drives setup against a backend for one run.
pub struct ProxyTestFlow<'a, B: BackendApi + ?Sized> {
    backend: &'a B,
    config: &'a ProxyTestConfig,
    launcher: ControllerLauncher,
    instance: InstanceId,
}

impl<'a, B: BackendApi + ?Sized> ProxyTestFlow<'a, B> {
    pub fn new(backend: &'a B, config: &'a ProxyTestConfig, instance: InstanceId) -> Self {
        let launcher = ControllerLauncher::new(
            config.controller_command.clone(),
            config.agents_dir.clone(),
            &config.api_key,
        );
        ProxyTestFlow {
            backend,
            config,
            launcher,
            instance,
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Run steps 1-5, recording created resources in `session`.
    pub async fn setup(&self, session: &mut Session) -> Result<Submission> {
        if self.config.repeat_n == 0 {
            return Err(FlowError::InvalidRepeat(self.config.repeat_n));
        }

        info!(step = "1/5", "fetching user info");
        let user = self.fetch_user().await?;

        info!(step = "2/5", "creating proxied agents");
        self.create_agents(session, &user).await?;

        info!(step = "3/5", "starting controllers");
        self.start_controllers(session)?;
        info!(
            warmup_secs = self.config.controllers.warmup.as_secs_f64(),
            "waiting for controllers to initialize"
        );
        tokio::time::sleep(self.config.controllers.warmup).await;

        info!(step = "4/5", "waiting for agents to be ready");
        self.await_readiness(session).await?;

        info!(step = "5/5", "creating tau-bench assessment");
        self.submit_assessment(session).await
    }

    /// Same as [`setup`](Self::setup), abandoned as soon as `cancel` fires.
    ///
    /// Whatever was created before the interruption stays in `session`.
    pub async fn setup_until_cancelled(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<Submission> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FlowError::Interrupted),
            result = self.setup(session) => result,
        }
    }

    pub async fn fetch_user(&self) -> Result<UserInfo> {
        let user = self.backend.current_user().await?;
        info!(
            display_name = %user.display_name(),
            github_id = %user.github_id,
            "logged in"
        );
        Ok(user)
    }

    /// Create green then white; each is tracked before the next request.
    pub async fn create_agents(&self, session: &mut Session, user: &UserInfo) -> Result<()> {
        for role in AgentRole::PAIR {
            let name = self.instance.agent_name(role);
            let request = NewAgentRequest::proxied(name.clone(), role, user.github_id.clone());
            let record = self.backend.create_agent(&request).await?;
            obs::emit_agent_created(role, &name, &record.id);
            session.track_agent(TrackedAgent {
                role,
                name,
                id: record.id,
            });
        }
        Ok(())
    }

    /// Launch a controller for every tracked agent that lacks one.
    pub fn start_controllers(&self, session: &mut Session) -> Result<()> {
        let pending: Vec<TrackedAgent> = session
            .agents()
            .iter()
            .filter(|a| !session.controllers().iter().any(|c| c.role() == a.role))
            .cloned()
            .collect();

        for agent in pending {
            info!(
                agent_name = %agent.name,
                dir = %self.launcher.working_dir(agent.role).display(),
                command = %self.launcher.command().display(&agent),
                "starting controller"
            );
            let controller = self.launcher.launch(&agent)?;
            obs::emit_controller_started(&agent.name, controller.pid(), controller.port());
            session.track_controller(controller);
        }
        Ok(())
    }

    /// Poll every tracked agent to completion, one after the other.
    ///
    /// All agents are polled even if an earlier one timed out.
    pub async fn await_readiness(&self, session: &Session) -> Result<()> {
        let mut first_failure: Option<String> = None;

        for agent in session.agents() {
            let outcome = wait_for_ready(self.backend, agent, &self.config.readiness).await;
            match outcome {
                Readiness::Ready { agent_count, .. } => {
                    info!(
                        agent_name = %agent.name,
                        agent_count,
                        "agent is ready (ctrl reachable)"
                    );
                }
                Readiness::TimedOut { .. } => {
                    error!(agent_name = %agent.name, "agent did not become ready");
                    first_failure.get_or_insert_with(|| agent.name.clone());
                }
            }
        }

        match first_failure {
            Some(agent) => Err(FlowError::NotReady {
                agent,
                timeout_secs: self.config.readiness.timeout.as_secs(),
            }),
            None => Ok(()),
        }
    }

    pub async fn submit_assessment(&self, session: &Session) -> Result<Submission> {
        let green = session
            .agent(AgentRole::Green)
            .ok_or(FlowError::MissingAgent(AgentRole::Green))?;
        let white = session
            .agent(AgentRole::White)
            .ok_or(FlowError::MissingAgent(AgentRole::White))?;

        let request =
            AssessmentRequest::tau_bench(green.id.clone(), white.id.clone(), self.config.repeat_n);
        let assessment_ids = self.backend.create_assessment(&request).await?;
        let first = assessment_ids.first().ok_or(FlowError::NoAssessment)?;
        obs::emit_assessment_created(assessment_ids.len(), first);
        let results_url = results_url(&self.config.backend_url, first);

        Ok(Submission {
            assessment_ids,
            results_url,
        })
    }
}

/// Keep controllers alive until `cancel` fires, reporting any that exit.
///
/// Cancellation is observed once per `interval`, after the exit check.
pub async fn monitor_until_cancelled(
    session: &mut Session,
    interval: Duration,
    cancel: &CancellationToken,
) {
    loop {
        for exit in session.poll_controller_exits() {
            obs::emit_controller_exited(&exit.agent_name, exit.pid, exit.code);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
