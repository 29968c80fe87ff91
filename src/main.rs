use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ta_wrapper::cli::Cli;
use ta_wrapper::error::WrapperError;
use ta_wrapper::orchestrator::{Orchestrator, RunReport};
use ta_wrapper::supervisor::{forward_shutdown_signals, ShutdownSignals, SignalState};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries only the result line
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("ta_wrapper=info".parse()?))
        .init();

    let signals = SignalState::new();
    let listeners = ShutdownSignals::register().context("Failed to install signal handlers")?;
    forward_shutdown_signals(listeners, signals.clone());

    let report = run(signals).await;
    debug!("Run ended in {:?} with exit code {}", report.stopped_in, report.exit_code);

    println!("{}", report.result_line());
    std::process::exit(report.exit_code);
}

async fn run(signals: SignalState) -> RunReport {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == ErrorKind::DisplayVersion => e.exit(),
        Err(e) => {
            eprintln!("{}", e);
            let rendered = e.to_string();
            let message = rendered
                .lines()
                .next()
                .unwrap_or("invalid command line")
                .trim_start_matches("error: ");
            return RunReport::aborted(&WrapperError::Validation(message.to_string()));
        }
    };

    if cli.help {
        eprintln!("{}", Cli::command().render_help());
        return RunReport::aborted(&WrapperError::Validation(
            "help was requested...".to_string(),
        ));
    }

    let settings = match cli.into_settings() {
        Ok(settings) => settings,
        Err(e) => return RunReport::aborted(&e),
    };
    info!(
        "Starting run: limiter={:?}, tmp_dir={}, internal={}",
        settings.limiter,
        settings.tmp_dir.display(),
        settings.internal
    );

    Orchestrator::new(settings, signals)
        .run(&cli.target_args)
        .await
}
