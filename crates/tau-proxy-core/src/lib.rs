//! tau-proxy-core: proxied agent test flow for the AgentBeats backend
//!
//! Provisions a green/white pair of proxied agents, runs their
//! controllers locally, waits until the backend sees both as ready and
//! submits a tau-bench assessment against them.
//!
//! ## Key Components
//!
//! - `BackendApi` / `HttpBackend`: cookie-authenticated backend calls
//! - `ControllerLauncher`: free-port allocation and controller processes
//! - `wait_for_ready`: trigger-and-poll health check loop
//! - `Session`: what the run created, and its teardown
//! - `ProxyTestFlow`: the five setup steps in order

pub mod backend;
pub mod config;
pub mod controller;
pub mod domain;
mod error;
pub mod fakes;
pub mod flow;
pub mod obs;
pub mod readiness;
pub mod results;
pub mod session;
pub mod telemetry;

pub use backend::{BackendApi, CheckStatus, HttpBackend};
pub use config::{ControllerPolicy, ProxyTestConfig, ReadinessPolicy};
pub use controller::{find_free_port, ControllerCommand, ControllerLauncher, ControllerProcess, StopOutcome};
pub use domain::{
    AgentRecord, AgentRole, AssessmentRequest, CheckReport, InstanceId, NewAgentRequest, RecordId,
    TrackedAgent, UserInfo,
};
pub use error::{BackendError, BackendResult, ControllerError, FlowError, Result};
pub use flow::{monitor_until_cancelled, ProxyTestFlow, Submission};
pub use obs::RunSpan;
pub use readiness::{wait_for_ready, Readiness};
pub use results::{frontend_url, results_url};
pub use session::{CleanupReport, ControllerExit, Session};
pub use telemetry::init_tracing;
