//! Error types for tau-proxy-core

use thiserror::Error;

use crate::domain::AgentRole;

/// Errors raised while talking to the backend API
#[derive(Error, Debug)]
pub enum BackendError {
    /// Backend answered with a non-success status
    #[error("{operation} failed: {status} {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Request never produced a response (DNS, connect, TLS, timeout)
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Response body did not match the expected shape
    #[error("could not decode {operation} response: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    /// HTTP client could not be constructed
    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl BackendError {
    /// Whether the failure happened below the HTTP layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Transport { .. })
    }
}

/// Errors raised by the controller launcher
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Could not obtain a free local port
    #[error("could not allocate a free port: {0}")]
    PortAllocation(#[source] std::io::Error),

    /// Working directory for the controller is missing
    #[error("controller directory not found: {0}")]
    MissingDirectory(String),

    /// Controller process could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort the end-to-end flow
#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// One or both agents never reported ready
    #[error("{agent} did not become ready within {timeout_secs}s")]
    NotReady { agent: String, timeout_secs: u64 },

    /// Assessment requested before both agents existed
    #[error("no {0} agent was created")]
    MissingAgent(AgentRole),

    /// Backend accepted the assessment but returned no identifiers
    #[error("backend returned no assessment ids")]
    NoAssessment,

    /// Repetition count must be at least one
    #[error("invalid repeat count: {0}")]
    InvalidRepeat(u32),

    /// Interrupted by a signal before setup finished
    #[error("interrupted before setup finished")]
    Interrupted,
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        BackendError::Transport {
            url,
            reason: err.to_string(),
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
