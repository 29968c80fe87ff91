//! Run orchestrator - one target algorithm call from arguments to result line
//!
//! Phases: `Init -> ParsingArgs -> BuildingCommand -> Running -> ReadingWatcher
//! -> ParsingResults -> Finalizing -> Terminated`. Any failure or signal jumps
//! straight to `Finalizing`, which runs exactly once on every path.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::artifacts::RunArtifacts;
use crate::builder::{CommandBuilder, ExternalCommandBuilder, TemplateCommandBuilder};
use crate::config::WrapperSettings;
use crate::core::{parse_target_args, ResultRecord, RunArguments, RunStatus};
use crate::error::{WrapperError, EXIT_UNEXPLAINED};
use crate::parser::{
    parse_watcher_log, ExternalOutputParser, NullParser, ObjectiveLineParser, OutputParser,
    ParseInput, ParserKind, SatParser, UbcsatParser,
};
use crate::supervisor::{
    limited_invocation, CommandSpec, ProcessSupervisor, SignalState, SupervisorError,
};
use crate::targets::{TargetCatalog, TargetDefinition};

const SIGNAL_MESSAGE: &str = "forced to exit by signal or keyboard interrupt.";
const MULTIPLE_SIGNALS_MESSAGE: &str = "forced to exit by multiple signals/interrupts.";
const CLEANUP_PROBLEM_MESSAGE: &str = "problems removing temporary files during cleanup.";

/// Where a run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    ParsingArgs,
    BuildingCommand,
    Running,
    ReadingWatcher,
    ParsingResults,
    Finalizing,
    Terminated,
}

/// Builder and parser picked for this run
pub struct Strategies {
    /// `None` only in internal mode without a target
    pub builder: Option<Box<dyn CommandBuilder>>,
    pub parser: Box<dyn OutputParser>,
    pub status_mapping: HashMap<RunStatus, RunStatus>,
}

impl Strategies {
    /// External helpers win over the catalog target
    pub fn select(settings: &WrapperSettings) -> Result<Self, WrapperError> {
        let target = match &settings.target {
            Some(name) => Some(load_target(settings, name)?),
            None => None,
        };

        let builder: Option<Box<dyn CommandBuilder>> =
            match (&settings.ext_callstring, &target) {
                (Some(helper), _) => Some(Box::new(ExternalCommandBuilder::new(
                    helper.clone(),
                    settings.tmp_dir.clone(),
                    settings.helper_timeout,
                ))),
                (None, Some(target)) => Some(Box::new(TemplateCommandBuilder::new(target.clone()))),
                (None, None) if settings.internal => None,
                (None, None) => {
                    return Err(WrapperError::Validation(
                        "no way to build the target command line - configure a target or an external callstring program."
                            .to_string(),
                    ))
                }
            };

        let parser: Box<dyn OutputParser> = match &settings.ext_parsing {
            Some(helper) => Box::new(ExternalOutputParser::new(
                helper.clone(),
                settings.helper_timeout,
            )),
            None => builtin_parser(settings.parser, target.as_ref()),
        };

        Ok(Self {
            builder,
            parser,
            status_mapping: target.map(|t| t.status_mapping).unwrap_or_default(),
        })
    }
}

fn load_target(settings: &WrapperSettings, name: &str) -> Result<TargetDefinition, WrapperError> {
    let catalog = TargetCatalog::load(&settings.targets_path)
        .map_err(|e| WrapperError::Validation(format!("{:#}", e)))?;
    catalog.get(name).cloned().ok_or_else(|| {
        WrapperError::Validation(format!(
            "unknown target {} - known targets are [{}].",
            name,
            catalog.names().join(" ")
        ))
    })
}

fn builtin_parser(
    kind: Option<ParserKind>,
    target: Option<&TargetDefinition>,
) -> Box<dyn OutputParser> {
    let kind = kind.or(target.map(|t| t.parser)).unwrap_or_default();
    match kind {
        ParserKind::Sat => Box::new(SatParser::new(target.is_some_and(|t| t.report_answer))),
        ParserKind::Objective => {
            let mut parser = ObjectiveLineParser::default();
            if let Some(target) = target {
                if let Some(marker) = &target.objective_marker {
                    parser.marker = marker.clone();
                }
                if let Some(field) = target.objective_field {
                    parser.field = field;
                }
            }
            Box::new(parser)
        }
        ParserKind::Ubcsat => Box::new(UbcsatParser),
        ParserKind::None => Box::new(NullParser),
    }
}

/// Final outcome of one wrapped run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub record: ResultRecord,
    pub seed: i64,
    pub exit_code: i32,
    /// Last phase reached before finalizing
    pub stopped_in: RunPhase,
}

impl RunReport {
    /// Report for a run refused before the orchestrator could start
    pub fn aborted(err: &WrapperError) -> Self {
        let record = ResultRecord {
            status: err.status().unwrap_or(RunStatus::Abort),
            misc: err.to_string(),
            ..Default::default()
        };
        Self {
            record,
            seed: 0,
            exit_code: err.exit_code(),
            stopped_in: RunPhase::ParsingArgs,
        }
    }

    pub fn result_line(&self) -> String {
        self.record.result_line(self.seed)
    }
}

pub struct Orchestrator {
    settings: WrapperSettings,
    strategies: Option<Strategies>,
    signals: SignalState,
    supervisor: ProcessSupervisor,
    record: ResultRecord,
    phase: RunPhase,
    run: Option<RunArguments>,
    artifacts: Option<RunArtifacts>,
    /// Exit code chosen by the wrapper itself
    exit_code: Option<i32>,
    target_exit_code: Option<i32>,
}

impl Orchestrator {
    pub fn new(settings: WrapperSettings, signals: SignalState) -> Self {
        let supervisor = ProcessSupervisor::new(signals.token(), settings.kill_grace);
        Self {
            settings,
            strategies: None,
            signals,
            supervisor,
            record: ResultRecord::default(),
            phase: RunPhase::Init,
            run: None,
            artifacts: None,
            exit_code: None,
            target_exit_code: None,
        }
    }

    /// Use these strategies instead of selecting them from the settings
    pub fn with_strategies(mut self, strategies: Strategies) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Run the whole lifecycle on the positional target arguments
    pub async fn run(mut self, target_args: &[String]) -> RunReport {
        if let Err(err) = self.execute(target_args).await {
            self.record_error(err);
        }
        let stopped_in = self.phase;

        self.cleanup().await;
        self.enter(RunPhase::Terminated);

        let exit_code = self
            .target_exit_code
            .filter(|code| *code != 0)
            .or(self.exit_code)
            .unwrap_or(0);
        RunReport {
            record: self.record,
            seed: self.run.map(|r| r.seed).unwrap_or(0),
            exit_code,
            stopped_in,
        }
    }

    fn enter(&mut self, next: RunPhase) {
        debug!("Run phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    async fn execute(&mut self, target_args: &[String]) -> Result<(), WrapperError> {
        self.enter(RunPhase::ParsingArgs);
        self.settings.validate()?;
        let (run, config) = parse_target_args(target_args)?;
        self.run = Some(run.clone());
        let strategies = match self.strategies.take() {
            Some(strategies) => strategies,
            None => Strategies::select(&self.settings)?,
        };
        self.check_signal()?;

        self.enter(RunPhase::BuildingCommand);
        let target = match &strategies.builder {
            Some(builder) => Some(builder.build(&run, &config, &mut self.supervisor).await?),
            None => None,
        };
        if let Some(target) = &target {
            info!("Target command: {}", target.display());
        }

        if !self.settings.internal {
            let target = target.ok_or_else(|| {
                WrapperError::Validation("no target command line was built.".to_string())
            })?;
            self.check_signal()?;

            self.enter(RunPhase::Running);
            self.call_target(&run, &target).await?;

            self.enter(RunPhase::ReadingWatcher);
            self.read_watcher()?;
        }
        self.check_signal()?;

        self.enter(RunPhase::ParsingResults);
        let output = match &self.artifacts {
            Some(artifacts) => artifacts.read_solver()?,
            None => String::new(),
        };
        let solver_log = self.artifacts.as_ref().map(|a| a.paths().solver);
        let input = ParseInput {
            solver_log: solver_log.as_deref(),
            output: &output,
            exit_code: self.target_exit_code,
        };
        let parsed = strategies.parser.parse(&input, &mut self.supervisor).await?;
        debug!("Parsed output: {:?}", parsed);
        self.record.absorb(parsed, &strategies.status_mapping);

        Ok(())
    }

    async fn call_target(&mut self, run: &RunArguments, target: &CommandSpec) -> Result<(), WrapperError> {
        let artifacts = RunArtifacts::create(&self.settings.tmp_dir)?;
        let cmd = limited_invocation(
            &self.settings.limiter,
            run.limiter_cutoff_secs(),
            &artifacts.paths(),
            target,
        );
        // runsolver writes the solver log itself
        let stdout = if self.settings.limiter.is_enabled() {
            Stdio::inherit()
        } else {
            artifacts.solver_stdio()?
        };
        self.artifacts = Some(artifacts);

        debug!("Calling target: {}", cmd.display());
        let started = Instant::now();
        let status = self
            .supervisor
            .run(&cmd, stdout)
            .await
            .map_err(|e| match e {
                SupervisorError::Interrupted => WrapperError::Interrupted,
                SupervisorError::Spawn { source, .. } | SupervisorError::Wait { source, .. } => {
                    WrapperError::Launch {
                        command: cmd.display(),
                        source,
                    }
                }
                other => WrapperError::Launch {
                    command: cmd.display(),
                    source: std::io::Error::other(other.to_string()),
                },
            })?;

        if !self.settings.limiter.is_enabled() {
            self.record.runtime = started.elapsed().as_secs_f64();
            self.target_exit_code = status.code();
        }
        Ok(())
    }

    fn read_watcher(&mut self) -> Result<(), WrapperError> {
        if !self.settings.limiter.is_enabled() {
            return Ok(());
        }
        let Some(artifacts) = &self.artifacts else {
            return Ok(());
        };

        let report = parse_watcher_log(&artifacts.read_watcher()?);
        debug!("Watcher report: {:?}", report);
        report.apply(&mut self.record);
        if report.exit_code.is_some() {
            self.target_exit_code = report.exit_code;
        }
        Ok(())
    }

    fn check_signal(&self) -> Result<(), WrapperError> {
        if self.signals.is_triggered() {
            return Err(WrapperError::Interrupted);
        }
        Ok(())
    }

    fn record_error(&mut self, err: WrapperError) {
        warn!("Run failed in {:?} ({}): {}", self.phase, err.as_label(), err);

        if let Some(status) = err.status() {
            self.record.status = status;
        }
        // signal messages are written at cleanup
        if !matches!(err, WrapperError::Interrupted) {
            self.record.misc = err.to_string();
        }
        if err.exit_code() != 0 {
            self.exit_code = Some(err.exit_code());
        }
        if err.attributes_cutoff() {
            if let Some(run) = &self.run {
                self.record.runtime = run.cutoff;
            }
        }
    }

    async fn cleanup(&mut self) {
        self.enter(RunPhase::Finalizing);

        let killed = self.supervisor.terminate_all().await;
        let received = self.signals.received();
        if killed > 0 || received > 0 {
            warn!("Stopped {} running process group(s) after {} signal(s)", killed, received);
            self.record.misc = if received > 1 {
                MULTIPLE_SIGNALS_MESSAGE
            } else {
                SIGNAL_MESSAGE
            }
            .to_string();
            if let Some(run) = &self.run {
                self.record.runtime = run.cutoff;
            }
        }

        if !self.record.status.is_explained() {
            self.record.status = RunStatus::Crashed;
            self.exit_code.get_or_insert(EXIT_UNEXPLAINED);
        }

        let keep = self.record.status.preserves_artifacts();
        if keep && self.record.misc.trim().is_empty() {
            let code = self
                .target_exit_code
                .or(self.exit_code)
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            self.record.misc = format!("Problem with run. Exit code was {}.", code);
        }

        if let Some(artifacts) = self.artifacts.take() {
            match artifacts.release(keep) {
                Ok(Some(kept)) => self.record.append_misc(&format!(
                    "Preserving runsolver output at {} - preserving target algorithm output at {}",
                    kept.watcher.display(),
                    kept.solver.display()
                )),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to remove temporary files: {}", e);
                    self.record.append_misc(CLEANUP_PROBLEM_MESSAGE);
                }
            }
        }

        debug_assert_eq!(self.supervisor.live_count(), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use crate::supervisor::Limiter;

    fn settings(tmp_dir: &Path) -> WrapperSettings {
        WrapperSettings {
            limiter: Limiter::Disabled,
            tmp_dir: tmp_dir.to_path_buf(),
            kill_grace: Duration::from_millis(200),
            ..Default::default()
        }
    }

    /// Target run as `sh <instance>`, so the instance is the script to execute
    fn shell_target() -> TargetDefinition {
        TargetDefinition {
            name: "shell".to_string(),
            binary: "sh".to_string(),
            arguments: vec!["{instance}".to_string()],
            parameter: vec!["-{name}".to_string(), "{value}".to_string()],
            parser: ParserKind::None,
            objective_marker: None,
            objective_field: None,
            report_answer: false,
            status_mapping: HashMap::new(),
        }
    }

    fn strategies(parser: Box<dyn OutputParser>) -> Strategies {
        Strategies {
            builder: Some(Box::new(TemplateCommandBuilder::new(shell_target()))),
            parser,
            status_mapping: HashMap::new(),
        }
    }

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("target.sh");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_sat_run_succeeds() {
        let scripts = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = script(scripts.path(), "echo 'c solving'\necho 's SATISFIABLE'\n");

        let report = Orchestrator::new(settings(tmp.path()), SignalState::new())
            .with_strategies(strategies(Box::new(SatParser::default())))
            .run(&args(&[&target, "0", "10", "-1", "42", "alpha", "1"]))
            .await;

        assert_eq!(report.record.status, RunStatus::Success);
        assert_eq!(report.seed, 42);
        assert_eq!(report.exit_code, 0);
        assert!(report.record.runtime < 10.0);
        assert!(report
            .result_line()
            .starts_with("Result for ParamILS: SUCCESS, "));
        assert!(report.result_line().ends_with(", -1, -1, 42"));
        assert_eq!(file_count(tmp.path()), 0);
    }

    #[tokio::test]
    async fn test_parser_helper_failure_charges_cutoff() {
        let scripts = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = script(scripts.path(), "echo done\n");
        let parser = ExternalOutputParser::new(
            CommandSpec::new("/nonexistent/parse-results"),
            Some(Duration::from_secs(5)),
        );

        let report = Orchestrator::new(settings(tmp.path()), SignalState::new())
            .with_strategies(strategies(Box::new(parser)))
            .run(&args(&[&target, "0", "30", "-1", "7"]))
            .await;

        assert_eq!(report.exit_code, 2);
        assert_eq!(report.record.runtime, 30.0);
        assert_eq!(report.record.status, RunStatus::Crashed);
        assert_eq!(report.stopped_in, RunPhase::ParsingResults);
        assert!(report
            .record
            .misc
            .starts_with("failed to run external program for result parsing"));
        // crashed runs keep their logs
        assert_eq!(file_count(tmp.path()), 2);
    }

    #[tokio::test]
    async fn test_signal_terminates_running_target() {
        let scripts = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = script(scripts.path(), "sleep 30\n");
        let signals = SignalState::new();

        let notifier = signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            notifier.notify();
        });

        let started = Instant::now();
        let report = Orchestrator::new(settings(tmp.path()), signals)
            .with_strategies(strategies(Box::new(SatParser::default())))
            .run(&args(&[&target, "0", "25.5", "-1", "3"]))
            .await;

        assert!(started.elapsed() < Duration::from_secs(15));
        assert_eq!(report.record.status, RunStatus::Crashed);
        assert_eq!(report.exit_code, EXIT_UNEXPLAINED);
        assert_eq!(report.record.runtime, 25.5);
        assert_eq!(report.stopped_in, RunPhase::Running);
        assert!(report.record.misc.starts_with(SIGNAL_MESSAGE));
        assert!(report.record.misc.contains("Preserving runsolver output at"));
        assert_eq!(file_count(tmp.path()), 2);
    }

    #[tokio::test]
    async fn test_odd_parameter_tail_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let report = Orchestrator::new(settings(tmp.path()), SignalState::new())
            .with_strategies(strategies(Box::new(NullParser)))
            .run(&args(&["inst.cnf", "0", "10", "-1", "42", "alpha"]))
            .await;

        assert_eq!(report.record.status, RunStatus::Abort);
        assert_eq!(report.exit_code, 1);
        assert_eq!(report.stopped_in, RunPhase::ParsingArgs);
        assert!(report
            .record
            .misc
            .starts_with("target algorithm parameter list MUST have even length - found 1 arguments."));
        assert_eq!(file_count(tmp.path()), 0);
    }

    #[tokio::test]
    async fn test_unexplained_run_is_crashed() {
        let scripts = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = script(scripts.path(), "echo 'nothing to see'\n");

        let report = Orchestrator::new(settings(tmp.path()), SignalState::new())
            .with_strategies(strategies(Box::new(NullParser)))
            .run(&args(&[&target, "0", "10", "-1", "1"]))
            .await;

        assert_eq!(report.record.status, RunStatus::Crashed);
        assert_eq!(report.exit_code, 3);
        assert!(report
            .record
            .misc
            .starts_with("Problem with run. Exit code was 0.; Preserving"));
    }

    #[tokio::test]
    async fn test_target_exit_code_propagates() {
        let scripts = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = script(scripts.path(), "echo 's UNSATISFIABLE'\nexit 5\n");

        let report = Orchestrator::new(settings(tmp.path()), SignalState::new())
            .with_strategies(strategies(Box::new(SatParser::new(true))))
            .run(&args(&[&target, "0", "10", "-1", "1"]))
            .await;

        assert_eq!(report.record.status, RunStatus::Unsat);
        assert_eq!(report.exit_code, 5);
    }

    #[tokio::test]
    async fn test_internal_mode_never_spawns() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings(tmp.path());
        settings.internal = true;

        let report = Orchestrator::new(settings, SignalState::new())
            .run(&args(&["inst.cnf", "0", "10", "-1", "9"]))
            .await;

        assert_eq!(report.seed, 9);
        assert_eq!(report.record.status, RunStatus::Crashed);
        assert_eq!(report.exit_code, 3);
        assert_eq!(report.stopped_in, RunPhase::ParsingResults);
        assert_eq!(file_count(tmp.path()), 0);
    }

    /// Stands in for runsolver: runs the target into the `-o` log and reports a
    /// CPU limit breach in the `-w` log
    fn fake_runsolver(dir: &Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("runsolver");
        std::fs::write(
            &path,
            r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -M|-C) shift 2 ;;
    -w) W="$2"; shift 2 ;;
    -o) O="$2"; shift 2 ;;
    *) break ;;
  esac
done
"$@" > "$O"
printf 'Maximum CPU time exceeded: sending SIGTERM then SIGKILL\nChild status: 3\nCPU time (s): 31.5\n' > "$W"
"#,
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_runsolver_timeout_beats_parsed_answer() {
        let scripts = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = script(scripts.path(), "echo 's SATISFIABLE'\n");
        let mut settings = settings(tmp.path());
        settings.limiter = Limiter::Runsolver {
            binary: fake_runsolver(scripts.path()),
            memory_mb: 2048,
        };

        let report = Orchestrator::new(settings, SignalState::new())
            .with_strategies(strategies(Box::new(SatParser::default())))
            .run(&args(&[&target, "0", "30", "-1", "42"]))
            .await;

        assert_eq!(report.record.status, RunStatus::Timeout);
        assert_eq!(report.record.runtime, 31.5);
        assert_eq!(report.exit_code, 3);
        assert_eq!(
            report.result_line(),
            "Result for ParamILS: TIMEOUT, 31.5, -1, -1, 42"
        );
        assert_eq!(file_count(tmp.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_runsolver_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings(tmp.path());
        settings.limiter = Limiter::Runsolver {
            binary: tmp.path().join("runsolver"),
            memory_mb: 2048,
        };

        let report = Orchestrator::new(settings, SignalState::new())
            .run(&args(&["inst.cnf", "0", "10", "-1", "9"]))
            .await;

        assert_eq!(report.record.status, RunStatus::Abort);
        assert_eq!(report.exit_code, 1);
        assert!(report.record.misc.starts_with("runsolver is missing"));
    }

    #[test]
    fn test_no_builder_outside_internal_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Strategies::select(&settings(tmp.path())).err().unwrap();
        assert!(matches!(err, WrapperError::Validation(_)));
    }

    #[test]
    fn test_select_from_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = tmp.path().join("targets.toml");
        std::fs::write(
            &catalog,
            "[spear]\nbinary = \"./spear\"\narguments = \"{instance}\"\nparser = \"sat\"\n\n[spear.status_mapping]\nSUCCESS = \"SAT\"\n",
        )
        .unwrap();

        let mut settings = settings(tmp.path());
        settings.targets_path = catalog;
        settings.target = Some("SPEAR".to_string());
        let selected = Strategies::select(&settings).unwrap();
        assert!(selected.builder.is_some());
        assert_eq!(
            selected.status_mapping.get(&RunStatus::Success),
            Some(&RunStatus::Sat)
        );

        settings.target = Some("minisat".to_string());
        assert!(Strategies::select(&settings).is_err());
    }

    #[test]
    fn test_aborted_report() {
        let report = RunReport::aborted(&WrapperError::Validation("help was requested...".into()));
        assert_eq!(report.exit_code, 1);
        assert_eq!(
            report.result_line(),
            "Result for ParamILS: ABORT, 999999999.0, -1, -1, 0, help was requested..."
        );
    }
}
