use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use throttle_suite::config::SuiteConfig;
use throttle_suite::scope::HttpMethod;
use throttle_suite::suite::{RequestContext, Suite};

/// Replay JSON-lines requests through a throttling suite and print the decisions.
#[derive(Debug, Parser)]
#[command(name = "throttle-suite", version, about)]
struct Args {
    /// Path to the YAML suite configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Print the statistics snapshot before exiting
    #[arg(long)]
    stats: bool,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// One request read from stdin.
#[derive(Debug, Deserialize)]
struct RequestLine {
    signature: String,
    path: String,
    method: String,
    #[serde(default)]
    has_tracking: bool,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// One decision written to stdout.
#[derive(Debug, Serialize)]
struct DecisionLine {
    signature: String,
    allowed: bool,
    blocked_by: Option<String>,
    retry_after_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&args);

    info!("Starting Throttle Suite");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = SuiteConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    info!(instances = config.instances.len(), "Configuration loaded");

    let suite = Suite::from_config(&config).context("Failed to build throttling suite")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read request from stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match evaluate(&suite, &line) {
                    Ok(output) => {
                        stdout.write_all(output.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed request"),
                }
            }
            _ = &mut shutdown => break,
        }
    }

    if args.stats {
        let snapshot = serde_json::to_string_pretty(&suite.statistics())?;
        stdout.write_all(snapshot.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;

    suite.shutdown();
    info!("Throttle Suite stopped");
    Ok(())
}

/// Install the subscriber. Logs go to stderr so stdout carries only decisions.
fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn evaluate(suite: &Suite, line: &str) -> anyhow::Result<String> {
    let request: RequestLine = serde_json::from_str(line).context("Invalid request JSON")?;
    let method: HttpMethod = request.method.parse()?;

    let mut context = RequestContext::new(&request.path, method).with_tracking(request.has_tracking);
    if let Some(timestamp) = request.timestamp {
        context = context.at(timestamp);
    }

    let decision = suite.decide(&context, &request.signature);
    let output = DecisionLine {
        signature: request.signature,
        allowed: decision.allowed,
        blocked_by: decision.blocked_by,
        retry_after_secs: decision.retry_after.map(|hint| hint.as_secs()),
    };
    Ok(serde_json::to_string(&output)?)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
