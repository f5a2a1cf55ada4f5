//! Controller process launching and teardown.
//!
//! Each proxied agent is backed by a local `agentbeats run_ctrl` process.
//! The launcher picks a free port, starts the process in the role's
//! directory and hands back a handle; it never talks to the controller
//! afterwards. Readiness is observed through the backend only.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::{API_KEY_ENV, CONTROLLER_PORT_ENV, DEFAULT_CONTROLLER_COMMAND};
use crate::domain::{AgentRole, TrackedAgent};
use crate::error::ControllerError;

/// Ask the OS for an unused TCP port by binding port 0 and releasing it.
pub fn find_free_port() -> Result<u16, ControllerError> {
    let listener = TcpListener::bind(("0.0.0.0", 0)).map_err(ControllerError::PortAllocation)?;
    let addr = listener
        .local_addr()
        .map_err(ControllerError::PortAllocation)?;
    Ok(addr.port())
}

/// Executable plus any leading arguments placed before `run_ctrl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ControllerCommand {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROLLER_COMMAND)
    }
}

impl ControllerCommand {
    pub fn new(program: &str) -> Self {
        ControllerCommand {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument list for the controller backing `agent`.
    pub fn argv(&self, agent: &TrackedAgent) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push("run_ctrl".to_string());
        argv.push(format!("--proxy-agent-id={}", agent.id));
        argv
    }

    /// Human-readable command line, for logs.
    pub fn display(&self, agent: &TrackedAgent) -> String {
        std::iter::once(self.program.clone())
            .chain(self.argv(agent))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a controller ended up after [`ControllerProcess::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Had already exited before teardown; carries the exit code if any.
    AlreadyExited(Option<i32>),
    /// Exited within the grace period after SIGTERM.
    Terminated,
    /// Ignored SIGTERM and was killed.
    Killed,
    /// Could not be signalled or reaped.
    Failed(String),
}

/// Handle to a running controller.
#[derive(Debug)]
pub struct ControllerProcess {
    role: AgentRole,
    agent_name: String,
    port: u16,
    pid: Option<u32>,
    child: Child,
    exit_reported: bool,
}

impl ControllerProcess {
    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking exit check.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                debug!(pid = ?self.pid, error = %e, "try_wait failed");
                None
            }
        }
    }

    /// Exit status the first time the process is seen to have exited,
    /// `None` while running and on every later call.
    pub fn take_new_exit(&mut self) -> Option<ExitStatus> {
        if self.exit_reported {
            return None;
        }
        let status = self.try_exit_status()?;
        self.exit_reported = true;
        Some(status)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        if let Some(status) = self.try_exit_status() {
            return StopOutcome::AlreadyExited(status.code());
        }

        if let Err(e) = self.send_terminate() {
            warn!(pid = ?self.pid, error = %e, "failed to send SIGTERM");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => StopOutcome::Terminated,
            Ok(Err(e)) => StopOutcome::Failed(e.to_string()),
            Err(_elapsed) => match self.child.kill().await {
                Ok(()) => StopOutcome::Killed,
                Err(e) => StopOutcome::Failed(e.to_string()),
            },
        }
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

/// Starts controllers for tracked agents.
#[derive(Debug, Clone)]
pub struct ControllerLauncher {
    command: ControllerCommand,
    agents_dir: PathBuf,
    api_key: String,
}

impl ControllerLauncher {
    pub fn new(command: ControllerCommand, agents_dir: impl Into<PathBuf>, api_key: &str) -> Self {
        ControllerLauncher {
            command,
            agents_dir: agents_dir.into(),
            api_key: api_key.to_string(),
        }
    }

    pub fn command(&self) -> &ControllerCommand {
        &self.command
    }

    /// `<agents_dir>/green_agent` or `<agents_dir>/white_agent`.
    pub fn working_dir(&self, role: AgentRole) -> PathBuf {
        self.agents_dir.join(role.controller_dir())
    }

    /// Start the controller for `agent` on a fresh port.
    ///
    /// Returns as soon as the process is spawned.
    pub fn launch(&self, agent: &TrackedAgent) -> Result<ControllerProcess, ControllerError> {
        let dir = self.working_dir(agent.role);
        if !dir.is_dir() {
            return Err(ControllerError::MissingDirectory(dir.display().to_string()));
        }
        let port = find_free_port()?;
        self.spawn_in(&dir, port, agent)
    }

    fn spawn_in(
        &self,
        dir: &Path,
        port: u16,
        agent: &TrackedAgent,
    ) -> Result<ControllerProcess, ControllerError> {
        let child = Command::new(&self.command.program)
            .args(self.command.argv(agent))
            .current_dir(dir)
            .env(CONTROLLER_PORT_ENV, port.to_string())
            .env(API_KEY_ENV, &self.api_key)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ControllerError::Spawn {
                command: self.command.display(agent),
                source,
            })?;

        Ok(ControllerProcess {
            role: agent.role,
            agent_name: agent.name.clone(),
            port,
            pid: child.id(),
            child,
            exit_reported: false,
        })
    }
}
