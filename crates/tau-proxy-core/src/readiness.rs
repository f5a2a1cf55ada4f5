//! Readiness polling for proxied agents.
//!
//! The controller registers itself with the backend; this side only asks
//! the backend to re-check and reads back the latest result. An agent is
//! ready once a single check reports the controller reachable with at
//! least one sub-agent.
//!
//! Every failure mode short of the timeout (404, odd status, transport
//! error, undecodable body) counts as "not ready yet".

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::backend::{BackendApi, CheckStatus};
use crate::config::ReadinessPolicy;
use crate::domain::TrackedAgent;
use crate::obs;

/// Final state of one agent's polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready {
        agent_count: u64,
        attempts: u32,
        elapsed: Duration,
    },
    TimedOut {
        attempts: u32,
        elapsed: Duration,
    },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Readiness::Ready { attempts, .. } | Readiness::TimedOut { attempts, .. } => *attempts,
        }
    }
}

/// Poll until `agent` is ready or `policy.timeout` has passed.
///
/// Each attempt triggers a check, waits `policy.interval`, then reads the
/// most recent result. Transport errors on the read add one more wait,
/// clamped so the loop never runs past `timeout + interval`.
/// Never returns an error: a timeout is reported as [`Readiness::TimedOut`].
pub async fn wait_for_ready<B>(
    backend: &B,
    agent: &TrackedAgent,
    policy: &ReadinessPolicy,
) -> Readiness
where
    B: BackendApi + ?Sized,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    while start.elapsed() < policy.timeout {
        attempts += 1;

        if let Err(e) = backend.trigger_check(&agent.id).await {
            debug!(agent_name = %agent.name, error = %e, "check trigger failed");
        }

        sleep(policy.interval).await;

        match backend.most_recent_check(&agent.id).await {
            Ok(CheckStatus::Report(report)) if report.is_ready() => {
                let elapsed = start.elapsed();
                obs::emit_readiness_ready(&agent.name, report.agent_count(), millis(elapsed));
                return Readiness::Ready {
                    agent_count: report.agent_count(),
                    attempts,
                    elapsed,
                };
            }
            Ok(CheckStatus::Report(report)) => {
                obs::emit_readiness_polled(&agent.name, attempts, &report.to_string());
            }
            Ok(CheckStatus::NoChecksYet) => {
                obs::emit_readiness_polled(&agent.name, attempts, "no checks yet");
            }
            Ok(CheckStatus::Unexpected { status }) => {
                obs::emit_readiness_polled(&agent.name, attempts, &format!("status {}", status));
            }
            Err(e) => {
                obs::emit_readiness_polled(&agent.name, attempts, &format!("request failed: {}", e));
                if e.is_transport() {
                    let remaining = policy.timeout.saturating_sub(start.elapsed());
                    sleep(policy.interval.min(remaining)).await;
                }
            }
        }
    }

    let elapsed = start.elapsed();
    obs::emit_readiness_timed_out(&agent.name, attempts, millis(elapsed));
    Readiness::TimedOut { attempts, elapsed }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
