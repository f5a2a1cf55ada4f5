//! Run configuration
//!
//! Everything the flow needs to know up front: where the backend lives,
//! which key to authenticate with, where the controllers are and how long
//! to wait for them.

use std::path::PathBuf;
use std::time::Duration;

use crate::controller::ControllerCommand;

/// Production backend used when no override is given.
pub const DEFAULT_BACKEND_URL: &str = "https://backend.evansandoval.org";

/// Environment variable holding the API key cookie value.
pub const API_KEY_ENV: &str = "AB_API_KEY";

/// Environment variable overriding the backend URL.
pub const BACKEND_URL_ENV: &str = "AB_BACKEND_URL";

/// Environment variable the controller reads its listening port from.
pub const CONTROLLER_PORT_ENV: &str = "PORT";

/// Executable that runs a controller.
pub const DEFAULT_CONTROLLER_COMMAND: &str = "agentbeats";

/// Directory containing `green_agent/` and `white_agent/`.
pub const DEFAULT_AGENTS_DIR: &str = "src";

/// Timing for the readiness poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Give up on an agent once this much time has passed.
    pub timeout: Duration,
    /// Wait between triggering a check and reading its result.
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        ReadinessPolicy {
            timeout: Duration::from_secs(90),
            interval: Duration::from_secs(3),
        }
    }
}

/// Timing for controller start-up, idle monitoring and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerPolicy {
    /// Pause after launching controllers before the first readiness check.
    pub warmup: Duration,
    /// How often the idle loop inspects controller exit status.
    pub monitor_interval: Duration,
    /// Time a controller gets to exit after SIGTERM before it is killed.
    pub grace_period: Duration,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        ControllerPolicy {
            warmup: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Fully resolved configuration for one test run.
#[derive(Clone)]
pub struct ProxyTestConfig {
    /// Backend base URL without trailing slash.
    pub backend_url: String,
    /// Value of the `ab_api_key` cookie; also forwarded to controllers.
    pub api_key: String,
    /// Assessment repetitions.
    pub repeat_n: u32,
    /// Skip opening the results page.
    pub no_browser: bool,
    /// Root holding the per-role controller directories.
    pub agents_dir: PathBuf,
    /// Controller executable and leading arguments.
    pub controller_command: ControllerCommand,
    pub readiness: ReadinessPolicy,
    pub controllers: ControllerPolicy,
}

impl std::fmt::Debug for ProxyTestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyTestConfig")
            .field("backend_url", &self.backend_url)
            .field("api_key", &"<redacted>")
            .field("repeat_n", &self.repeat_n)
            .field("no_browser", &self.no_browser)
            .field("agents_dir", &self.agents_dir)
            .field("controller_command", &self.controller_command)
            .field("readiness", &self.readiness)
            .field("controllers", &self.controllers)
            .finish()
    }
}

impl ProxyTestConfig {
    /// Config with defaults for everything but the key.
    pub fn new(backend_url: &str, api_key: &str) -> Self {
        ProxyTestConfig {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            repeat_n: 1,
            no_browser: false,
            agents_dir: PathBuf::from(DEFAULT_AGENTS_DIR),
            controller_command: ControllerCommand::default(),
            readiness: ReadinessPolicy::default(),
            controllers: ControllerPolicy::default(),
        }
    }

    pub fn with_repeat_n(mut self, repeat_n: u32) -> Self {
        self.repeat_n = repeat_n;
        self
    }

    pub fn with_no_browser(mut self, no_browser: bool) -> Self {
        self.no_browser = no_browser;
        self
    }

    pub fn with_agents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.agents_dir = dir.into();
        self
    }

    pub fn with_controller_command(mut self, command: ControllerCommand) -> Self {
        self.controller_command = command;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_controllers(mut self, controllers: ControllerPolicy) -> Self {
        self.controllers = controllers;
        self
    }
}
