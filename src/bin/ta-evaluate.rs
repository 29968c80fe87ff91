//! Score one configuration over an instance list, for TPE-style tuners.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ta_wrapper::cli::EvaluateCli;
use ta_wrapper::core::Configuration;
use ta_wrapper::evaluation::{load_instances, EvaluationOutcome, EvaluationSettings, Evaluator};
use ta_wrapper::supervisor::{
    forward_shutdown_signals, CommandSpec, ProcessSupervisor, ShutdownSignals, SignalState,
    DEFAULT_KILL_GRACE,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("ta_wrapper=info".parse()?))
        .init();

    let cli = EvaluateCli::parse();

    let executable = CommandSpec::from_command_line(&cli.executable)
        .context("--executable must name a program")?;
    let instances = load_instances(&cli.instance_file)?;
    let config = Configuration::from_pairs(&cli.params)?;
    let tuner_timeout = cli
        .tuner_timeout
        .filter(|secs| *secs > 0.0)
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("Invalid --tuner-timeout")?;
    info!(
        "Evaluating over {} instance(s), max fail count {}",
        instances.len(),
        cli.max_fail_count
    );

    let signals = SignalState::new();
    let listeners = ShutdownSignals::register().context("Failed to install signal handlers")?;
    forward_shutdown_signals(listeners, signals.clone());

    let settings = EvaluationSettings {
        executable,
        instances,
        max_fail_count: cli.max_fail_count,
        tuner_timeout,
    };
    let supervisor = ProcessSupervisor::new(signals.token(), DEFAULT_KILL_GRACE);
    let mut evaluator = Evaluator::new(settings, supervisor);

    let outcome = evaluator.evaluate(&config).await?;
    println!(
        "Training time: {}, TPE time: {}",
        evaluator.training_time(),
        evaluator.tuner_time()
    );
    match outcome {
        EvaluationOutcome::Scored { score, .. } => println!("Computed score {}", score),
        EvaluationOutcome::TunerTimeout => println!("Tuner timeout hit"),
    }

    Ok(())
}
