//! End-to-end flow tests against the in-memory backend with real
//! (shell-based) controller processes.

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use tau_proxy_core::fakes::{BackendCall, FakeCheck, MemoryBackend};
use tau_proxy_core::{
    AgentRole, BackendError, ControllerCommand, ControllerPolicy, FlowError, InstanceId,
    ProxyTestConfig, ProxyTestFlow, ReadinessPolicy, RecordId, Session, StopOutcome, UserInfo,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Records its port, key and agent id, then idles until signalled.
const FAKE_CONTROLLER: &str = r#"echo "$PORT $AB_API_KEY $2" > launched.txt; exec sleep 30"#;

fn agents_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for role in AgentRole::PAIR {
        std::fs::create_dir(dir.path().join(role.controller_dir())).expect("role dir");
    }
    dir
}

fn config(dir: &Path) -> ProxyTestConfig {
    ProxyTestConfig::new("https://backend.example.org", "test-key")
        .with_agents_dir(dir)
        .with_controller_command(
            ControllerCommand::new("sh").with_args(["-c", FAKE_CONTROLLER, "fake-ctrl"]),
        )
        .with_readiness(ReadinessPolicy {
            timeout: Duration::from_secs(2),
            interval: Duration::from_millis(10),
        })
        .with_controllers(ControllerPolicy {
            warmup: Duration::ZERO,
            monitor_interval: Duration::from_millis(20),
            grace_period: Duration::from_secs(2),
        })
}

fn alice() -> UserInfo {
    UserInfo {
        github_id: RecordId::Int(42),
        display_name: Some("Alice".to_string()),
    }
}

fn ready_after_two() -> Vec<FakeCheck> {
    vec![
        FakeCheck::unreachable(),
        FakeCheck::unreachable(),
        FakeCheck::ready(1),
    ]
}

fn scenario_backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_user(alice())
        .with_agent_ids(vec![RecordId::Int(1), RecordId::Int(2)])
        .script_checks(RecordId::Int(1), ready_after_two())
        .script_checks(RecordId::Int(2), ready_after_two())
        .with_assessment_ids(vec![RecordId::Int(99)])
}

async fn read_launch_record(dir: &Path) -> String {
    let path = dir.join("launched.txt");
    for _ in 0..100 {
        if let Ok(content) = std::fs::read_to_string(&path) {
            if !content.is_empty() {
                return content;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("controller never wrote {:?}", path);
}

/// Test: full happy path prints a results link for assessment 99
#[tokio::test]
async fn test_full_flow_submits_assessment() {
    let dir = agents_dir();
    let config = config(dir.path());
    let backend = scenario_backend();
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("cafe0123"));
    let mut session = Session::new();

    let submission = flow.setup(&mut session).await.expect("setup failed");

    assert_eq!(submission.assessment_ids, vec![RecordId::Int(99)]);
    assert!(submission.results_url.contains("/assessments/99"));
    assert_eq!(submission.results_url, "https://example.org/assessments/99");
    assert_eq!(session.agents().len(), 2);
    assert_eq!(session.controllers().len(), 2);

    // Exactly one green agent, both owned by Alice.
    let created = backend.created_agents();
    assert_eq!(created.len(), 2);
    assert_eq!(created.iter().filter(|a| a.is_green).count(), 1);
    assert_eq!(created[0].name, "tau-green-cafe0123");
    assert_eq!(created[1].name, "tau-white-cafe0123");
    assert!(created.iter().all(|a| a.user_id == RecordId::Int(42)));
    assert!(created.iter().all(|a| a.deploy_type == "proxied"));

    assert_eq!(backend.check_polls(&RecordId::Int(1)), 3);
    assert_eq!(backend.check_polls(&RecordId::Int(2)), 3);

    let assessment = backend
        .calls()
        .into_iter()
        .find_map(|c| match c {
            BackendCall::CreateAssessment(req) => Some(req),
            _ => None,
        })
        .expect("assessment was not requested");
    assert_eq!(assessment.agents, vec![RecordId::Int(1), RecordId::Int(2)]);
    assert_eq!(assessment.config, "tau-bench");
    assert_eq!(assessment.repeat_n, 1);

    let report = session.cleanup(&backend, config.controllers.grace_period).await;
    assert_eq!(report.deleted, vec![RecordId::Int(1), RecordId::Int(2)]);
    assert!(report
        .stopped
        .iter()
        .all(|(_, outcome)| *outcome == StopOutcome::Terminated));
}

/// Test: controllers receive port and key via env and the agent id as argument
#[tokio::test]
async fn test_controllers_get_port_key_and_agent_id() {
    let dir = agents_dir();
    let config = config(dir.path());
    let backend = scenario_backend();
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("cafe0123"));
    let mut session = Session::new();

    flow.setup(&mut session).await.expect("setup failed");

    let green_port = session.controllers()[0].port();
    let record = read_launch_record(&dir.path().join("green_agent")).await;
    assert_eq!(
        record.trim(),
        format!("{} test-key --proxy-agent-id=1", green_port)
    );

    let record = read_launch_record(&dir.path().join("white_agent")).await;
    assert!(record.trim().ends_with("--proxy-agent-id=2"));

    session.cleanup(&backend, config.controllers.grace_period).await;
}

/// Test: failed user lookup creates nothing
#[tokio::test]
async fn test_user_lookup_failure_creates_nothing() {
    let dir = agents_dir();
    let config = config(dir.path());
    let backend = MemoryBackend::new();
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("0000aaaa"));
    let mut session = Session::new();

    let err = flow.setup(&mut session).await.unwrap_err();

    assert!(matches!(
        err,
        FlowError::Backend(BackendError::Status { status: 401, .. })
    ));
    assert!(session.is_empty());
    assert_eq!(backend.calls(), vec![BackendCall::CurrentUser]);
}

/// Test: white agent creation fails, only green is tracked and cleaned up
#[tokio::test]
async fn test_partial_creation_cleans_up_green_only() {
    let dir = agents_dir();
    let config = config(dir.path());
    let backend = MemoryBackend::new()
        .with_user(alice())
        .with_agent_ids(vec![RecordId::Int(1)])
        .fail_agent_creation_at(1);
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("0000aaaa"));
    let mut session = Session::new();

    let err = flow.setup(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Backend(BackendError::Status { status: 500, .. })
    ));
    assert_eq!(session.agents().len(), 1);
    assert!(session.controllers().is_empty());

    let report = session.cleanup(&backend, Duration::from_secs(1)).await;
    assert_eq!(backend.deleted_agents(), vec![RecordId::Int(1)]);
    assert!(report.stopped.is_empty());
}

/// Test: a white agent that never becomes ready aborts before the assessment
#[tokio::test]
async fn test_readiness_timeout_aborts_before_assessment() {
    let dir = agents_dir();
    let config = config(dir.path()).with_readiness(ReadinessPolicy {
        timeout: Duration::from_millis(200),
        interval: Duration::from_millis(10),
    });
    let backend = MemoryBackend::new()
        .with_user(alice())
        .script_checks(RecordId::Int(1), vec![FakeCheck::ready(1)])
        .script_checks(RecordId::Int(2), vec![FakeCheck::unreachable()])
        .with_assessment_ids(vec![RecordId::Int(99)]);
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("0000bbbb"));
    let mut session = Session::new();

    let err = flow.setup(&mut session).await.unwrap_err();

    match err {
        FlowError::NotReady { agent, .. } => assert_eq!(agent, "tau-white-0000bbbb"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!backend
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::CreateAssessment(_))));

    let report = session.cleanup(&backend, config.controllers.grace_period).await;
    assert_eq!(report.stopped.len(), 2);
    assert_eq!(report.deleted.len(), 2);
}

/// Test: both agents are polled even when the green one times out
#[tokio::test]
async fn test_both_agents_polled_when_green_times_out() {
    let dir = agents_dir();
    let config = config(dir.path()).with_readiness(ReadinessPolicy {
        timeout: Duration::from_millis(100),
        interval: Duration::from_millis(10),
    });
    let backend = MemoryBackend::new()
        .with_user(alice())
        .script_checks(RecordId::Int(2), vec![FakeCheck::ready(1)]);
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("0000cccc"));
    let mut session = Session::new();

    let err = flow.setup(&mut session).await.unwrap_err();

    assert!(matches!(err, FlowError::NotReady { ref agent, .. } if agent == "tau-green-0000cccc"));
    assert_eq!(backend.check_polls(&RecordId::Int(2)), 1);

    session.cleanup(&backend, config.controllers.grace_period).await;
}

/// Test: backend rejecting the assessment is fatal but leaves cleanup possible
#[tokio::test]
async fn test_assessment_failure_keeps_resources_for_cleanup() {
    let dir = agents_dir();
    let config = config(dir.path());
    let backend = scenario_backend().fail_assessment(400);
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("0000dddd"));
    let mut session = Session::new();

    let err = flow.setup(&mut session).await.unwrap_err();
    assert!(err.to_string().contains("400"));
    assert_eq!(session.controllers().len(), 2);

    let report = session.cleanup(&backend, config.controllers.grace_period).await;
    assert_eq!(report.deleted, vec![RecordId::Int(1), RecordId::Int(2)]);
}

/// Test: an empty assessment list is treated as a failure
#[tokio::test]
async fn test_empty_assessment_list_is_an_error() {
    let dir = agents_dir();
    let config = config(dir.path());
    let backend = scenario_backend().with_assessment_ids(Vec::new());
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("0000eeee"));
    let mut session = Session::new();

    let err = flow.setup(&mut session).await.unwrap_err();
    assert!(matches!(err, FlowError::NoAssessment));

    session.cleanup(&backend, config.controllers.grace_period).await;
}

/// Test: zero repetitions is rejected before anything is created
#[tokio::test]
async fn test_zero_repeat_rejected_up_front() {
    let dir = agents_dir();
    let config = config(dir.path()).with_repeat_n(0);
    let backend = scenario_backend();
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("0000ffff"));
    let mut session = Session::new();

    let err = flow.setup(&mut session).await.unwrap_err();
    assert!(matches!(err, FlowError::InvalidRepeat(0)));
    assert!(backend.calls().is_empty());
}

/// Test: cancellation mid-readiness returns Interrupted and keeps tracked state
#[tokio::test]
async fn test_cancellation_interrupts_setup() {
    let dir = agents_dir();
    let config = config(dir.path()).with_readiness(ReadinessPolicy {
        timeout: Duration::from_secs(60),
        interval: Duration::from_millis(10),
    });
    let backend = MemoryBackend::new().with_user(alice());
    let flow = ProxyTestFlow::new(&backend, &config, InstanceId::from("1111aaaa"));
    let mut session = Session::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        flow.setup_until_cancelled(&mut session, &cancel),
    )
    .await
    .expect("cancellation was not observed");

    assert!(matches!(result, Err(FlowError::Interrupted)));
    assert_eq!(session.agents().len(), 2);
    assert_eq!(session.controllers().len(), 2);

    let report = session.cleanup(&backend, config.controllers.grace_period).await;
    assert_eq!(report.deleted.len(), 2);
    assert!(session.is_empty());
}
