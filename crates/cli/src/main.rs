//! `webaudit` -- submit a website audit and follow it to completion.
//!
//! Progress lines go to stdout and logs go to stderr. The final result
//! payload is printed as pretty JSON once the audit completes.
//!
//! # Environment variables
//!
//! See [`webaudit_tracker::TrackerConfig::from_env`] for the analyzer
//! settings. `RUST_LOG` overrides the default log filter.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webaudit_cli::{exit_code, render_event, EXIT_USAGE};
use webaudit_core::job::JobOptions;
use webaudit_tracker::coordinator::spawn_job;
use webaudit_tracker::{JobEvent, JobHandle, JobState, TrackerConfig, Transports};

#[derive(Parser, Debug)]
#[command(name = "webaudit")]
#[command(about = "Submit a website audit and follow its progress")]
struct Cli {
    /// Website to audit, e.g. `example.com` or `https://example.com/page`.
    target: String,
    /// Skip screenshot capture.
    #[arg(long, default_value_t = false)]
    no_screenshots: bool,
    /// Print events as JSON lines instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
    /// Emit logs as JSON.
    #[arg(long, env = "WEBAUDIT_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "webaudit=info,webaudit_tracker=info".into());
    let json_logs = cli.log_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_logs =
        (!cli.log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(filter)
        .with(json_logs)
        .with(text_logs)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = TrackerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        poll_interval_secs = config.coordinator.poll_interval.as_secs(),
        max_poll_attempts = config.coordinator.max_poll_attempts,
        channel_idle_secs = config.coordinator.channel_idle_timeout.as_secs(),
        "Loaded tracker configuration",
    );

    let options = JobOptions {
        include_screenshots: !cli.no_screenshots,
    };
    let handle = spawn_job(
        Transports::from_config(&config),
        config.coordinator,
        &cli.target,
        options,
    )
    .context("Cannot start audit")?;

    let state = follow(handle, cli.json).await;
    Ok(ExitCode::from(exit_code(state)))
}

/// Print events until the terminal one. Ctrl-C cancels observation.
async fn follow(mut handle: JobHandle, json: bool) -> JobState {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => print_event(&event, json),
                None => break,
            },
            result = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match result {
                    Ok(()) => {
                        tracing::info!(job_id = %handle.id(), "Interrupted, cancelling");
                        handle.cancel();
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to install Ctrl-C handler"),
                }
            }
        }
    }

    let job_id = handle.id();
    handle.join().await.unwrap_or_else(|e| {
        tracing::error!(job_id = %job_id, error = %e, "Job driver panicked");
        JobState::Failed
    })
}

fn print_event(event: &JobEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
        }
        return;
    }

    println!("{}", render_event(event));
    if let JobEvent::Completed { result, .. } = event {
        match serde_json::to_string_pretty(result) {
            Ok(pretty) => println!("{pretty}"),
            Err(e) => tracing::warn!(error = %e, "Failed to format result"),
        }
    }
}
