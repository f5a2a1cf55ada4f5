//! tau-proxy-test - proxied tau-bench agent test run
//!
//! Creates a green/white pair of proxied agents on the AgentBeats backend,
//! runs their controllers locally, waits until both are reachable and
//! submits a tau-bench assessment. Everything created is torn down when
//! the run is interrupted or fails.

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use tau_proxy_core::config::{
    API_KEY_ENV, BACKEND_URL_ENV, DEFAULT_AGENTS_DIR, DEFAULT_BACKEND_URL,
    DEFAULT_CONTROLLER_COMMAND,
};
use tau_proxy_core::{
    init_tracing, monitor_until_cancelled, CleanupReport, ControllerCommand, FlowError,
    HttpBackend, InstanceId, ProxyTestConfig, ProxyTestFlow, ReadinessPolicy, RunSpan, Session,
    Submission,
};

#[derive(Parser, Debug)]
#[command(name = "tau-proxy-test")]
#[command(author = "AgentBeats Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a tau-bench assessment against locally proxied agents", long_about = None)]
struct Cli {
    /// Backend API base URL
    #[arg(long, env = BACKEND_URL_ENV, default_value = DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// API key sent as the `ab_api_key` cookie and passed to controllers
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Number of assessment repetitions
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    repeat_n: u32,

    /// Do not open the results page in a browser
    #[arg(long)]
    no_browser: bool,

    /// Directory containing green_agent/ and white_agent/
    #[arg(long, default_value = DEFAULT_AGENTS_DIR)]
    agents_dir: PathBuf,

    /// Controller executable, optionally with leading arguments
    #[arg(long, default_value = DEFAULT_CONTROLLER_COMMAND)]
    controller_cmd: String,

    /// Seconds to wait for each agent to become ready
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u64).range(1..))]
    ready_timeout_secs: u64,

    /// Seconds between triggering a check and reading its result
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    check_interval_secs: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// The API key, unless missing or blank.
    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    fn to_config(&self, api_key: &str) -> ProxyTestConfig {
        ProxyTestConfig::new(&self.backend_url, api_key)
            .with_repeat_n(self.repeat_n)
            .with_no_browser(self.no_browser)
            .with_agents_dir(self.agents_dir.clone())
            .with_controller_command(parse_controller_command(&self.controller_cmd))
            .with_readiness(ReadinessPolicy {
                timeout: Duration::from_secs(self.ready_timeout_secs),
                interval: Duration::from_secs(self.check_interval_secs),
            })
    }
}

/// First word is the executable, the rest go before `run_ctrl`.
fn parse_controller_command(raw: &str) -> ControllerCommand {
    let mut words = raw.split_whitespace();
    match words.next() {
        Some(program) => ControllerCommand::new(program).with_args(words),
        None => ControllerCommand::default(),
    }
}

/// Platform opener for `url`, as program plus arguments.
fn browser_command(os: &str, url: &str) -> (&'static str, Vec<String>) {
    match os {
        "macos" => ("open", vec![url.to_string()]),
        "windows" => (
            "cmd",
            vec![
                "/C".to_string(),
                "start".to_string(),
                String::new(),
                url.to_string(),
            ],
        ),
        _ => ("xdg-open", vec![url.to_string()]),
    }
}

fn open_browser(url: &str) {
    let (program, args) = browser_command(std::env::consts::OS, url);
    let spawned = std::process::Command::new(program)
        .args(&args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        warn!(program, error = %e, "could not open browser");
    }
}

/// Resolves on the next Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}

/// Cancel `token` on the first signal, return on the second.
async fn cancel_then_wait_again<F, Fut>(token: &CancellationToken, mut next_signal: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    next_signal().await;
    token.cancel();
    println!("Shutting down. Press Ctrl+C again to exit without cleanup.");
    next_signal().await;
}

/// Process exit status for a finished setup phase.
///
/// A submitted run only ends through an interrupt after the results link
/// was printed, which counts as success.
fn exit_status(outcome: &tau_proxy_core::Result<Submission>) -> u8 {
    match outcome {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

fn print_submission(submission: &Submission) {
    println!();
    println!("Assessment submitted! View results at:");
    println!("  {}", submission.results_url);
    if submission.assessment_ids.len() > 1 {
        let ids: Vec<String> = submission
            .assessment_ids
            .iter()
            .map(|id| id.to_string())
            .collect();
        println!("  ({} assessments: {})", ids.len(), ids.join(", "));
    }
    println!();
}

fn print_cleanup(report: &CleanupReport) {
    if report.is_noop() {
        return;
    }
    match report.failures() {
        0 => println!("Cleanup complete."),
        n => println!("Cleanup finished with {} error(s); some agents may remain.", n),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let Some(api_key) = cli.api_key() else {
        eprintln!("Error: {} is not set.", API_KEY_ENV);
        eprintln!(
            "Export your AgentBeats API key (export {}=...) or pass --api-key.",
            API_KEY_ENV
        );
        return Ok(ExitCode::FAILURE);
    };
    let config = cli.to_config(api_key);
    let instance = InstanceId::generate();

    println!("tau proxy test");
    println!("  instance: {}", instance);
    println!("  backend:  {}", config.backend_url);

    let backend = HttpBackend::new(&config.backend_url, &config.api_key)
        .context("Failed to build backend client")?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        cancel_then_wait_again(&signal_token, shutdown_signal).await;
        warn!("second signal received, exiting before cleanup finished");
        std::process::exit(1);
    });

    let _span = RunSpan::enter(instance.as_str());
    let flow = ProxyTestFlow::new(&backend, &config, instance);
    let mut session = Session::new();

    let outcome = flow.setup_until_cancelled(&mut session, &cancel).await;
    match &outcome {
        Ok(submission) => {
            print_submission(submission);
            if !config.no_browser {
                open_browser(&submission.results_url);
            }
            println!("Controllers are running. Press Ctrl+C to stop and clean up.");
            monitor_until_cancelled(&mut session, config.controllers.monitor_interval, &cancel)
                .await;
        }
        Err(FlowError::Interrupted) => {
            println!("Interrupted before setup finished.");
        }
        Err(e) => {
            eprintln!("Error: {}", e);
        }
    }

    println!("Cleaning up...");
    let report = session
        .cleanup(&backend, config.controllers.grace_period)
        .await;
    print_cleanup(&report);

    Ok(ExitCode::from(exit_status(&outcome)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
