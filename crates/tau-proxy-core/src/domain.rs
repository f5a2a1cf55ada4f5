//! Wire types for the backend API and the green/white agent pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Benchmark configuration submitted with every assessment.
pub const TAU_BENCH_CONFIG: &str = "tau-bench";

/// Prefix shared by generated agent names.
pub const AGENT_NAME_PREFIX: &str = "tau";

/// Deployment type for agents fronted by a locally run controller.
pub const PROXIED_DEPLOY_TYPE: &str = "proxied";

/// Backend-assigned identifier.
///
/// The backend is free to hand out numbers or strings; the value is
/// re-serialised in the same JSON form it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_string())
    }
}

/// Which side of the assessment an agent plays.
///
/// Green agents host the benchmark; white agents are evaluated by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Green,
    White,
}

impl AgentRole {
    /// Both roles in creation order.
    pub const PAIR: [AgentRole; 2] = [AgentRole::Green, AgentRole::White];

    pub fn is_green(self) -> bool {
        matches!(self, AgentRole::Green)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Green => "green",
            AgentRole::White => "white",
        }
    }

    /// Directory holding this role's controller, relative to the agents root.
    pub fn controller_dir(self) -> &'static str {
        match self {
            AgentRole::Green => "green_agent",
            AgentRole::White => "white_agent",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short random tag shared by both agents of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId(String);

impl InstanceId {
    /// First eight hex characters of a fresh v4 UUID.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        InstanceId(hex.chars().take(8).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display name for the agent playing `role` in this run.
    pub fn agent_name(&self, role: AgentRole) -> String {
        format!("{}-{}-{}", AGENT_NAME_PREFIX, role.as_str(), self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        InstanceId(s.to_string())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `GET /user` response. Only the fields the flow needs are decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub github_id: RecordId,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserInfo {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("<unnamed>")
    }
}

/// `POST /agents/` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAgentRequest {
    pub name: String,
    pub is_green: bool,
    pub deploy_type: String,
    pub secret: String,
    pub inject_litellm_proxy_api: bool,
    pub ctrl_url: Option<String>,
    pub git_url: Option<String>,
    pub git_branch: Option<String>,
    pub docker_image_url: Option<String>,
    pub description_prompt: Option<String>,
    pub user_id: RecordId,
}

impl NewAgentRequest {
    /// Payload for a proxied agent: no secret, no remote deployment fields.
    pub fn proxied(name: impl Into<String>, role: AgentRole, user_id: RecordId) -> Self {
        NewAgentRequest {
            name: name.into(),
            is_green: role.is_green(),
            deploy_type: PROXIED_DEPLOY_TYPE.to_string(),
            secret: String::new(),
            inject_litellm_proxy_api: false,
            ctrl_url: None,
            git_url: None,
            git_branch: None,
            docker_image_url: None,
            description_prompt: None,
            user_id,
        }
    }
}

/// Agent object returned by `POST /agents/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: RecordId,
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /agents/{id}/most_recent_check` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    #[serde(default)]
    pub is_ctrl_reachable: Option<bool>,
    #[serde(default)]
    pub agent_count: Option<u64>,
}

impl CheckReport {
    /// Reachable controller with at least one registered sub-agent.
    pub fn is_ready(&self) -> bool {
        self.is_ctrl_reachable == Some(true) && self.agent_count.unwrap_or(0) >= 1
    }

    pub fn agent_count(&self) -> u64 {
        self.agent_count.unwrap_or(0)
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reachable = self
            .is_ctrl_reachable
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let agents = self
            .agent_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        write!(f, "reachable={}, agents={}", reachable, agents)
    }
}

/// `POST /assessments/` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRequest {
    pub agents: Vec<RecordId>,
    pub config: String,
    pub repeat_n: u32,
}

impl AssessmentRequest {
    /// tau-bench run with the green agent listed first.
    pub fn tau_bench(green: RecordId, white: RecordId, repeat_n: u32) -> Self {
        AssessmentRequest {
            agents: vec![green, white],
            config: TAU_BENCH_CONFIG.to_string(),
            repeat_n,
        }
    }
}

/// An agent record this run created and still owns.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedAgent {
    pub role: AgentRole,
    pub name: String,
    pub id: RecordId,
}
