//! Evaluation loop: score one configuration over a list of instances.
//!
//! All bookkeeping (training time, tuner time, failure streak) lives in an
//! [`Evaluator`], so repeated evaluations in one process never share hidden
//! state.

use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::Context;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::core::Configuration;
use crate::supervisor::{CommandSpec, ProcessSupervisor, SupervisorError};

pub const DEFAULT_MAX_FAIL_COUNT: u32 = 3;
/// Score assigned when the configuration is given up on
pub const FAILED_SCORE: f64 = 100.0;
/// Scores at or above this count as a failed instance
pub const FAILURE_THRESHOLD: f64 = 99.999;

static TPE_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Result for TPE: (?P<status>.+?) time=(?P<time>[^,]+), score=(?P<score>[^,]+), penalty=(?P<penalty>[^,]+), rawScore=(?P<raw>\S+)",
    )
    .expect("Invalid TPE result regex")
});

/// One parsed `Result for TPE:` line
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceResult {
    pub status: String,
    pub time: f64,
    pub score: f64,
    pub penalty: f64,
    pub raw_score: f64,
}

pub fn parse_tpe_line(line: &str) -> Option<InstanceResult> {
    let caps = TPE_RESULT.captures(line.trim())?;
    let number = |name: &str| caps[name].trim().parse::<f64>().ok();
    Some(InstanceResult {
        status: caps["status"].trim().to_string(),
        time: number("time")?,
        score: number("score")?,
        penalty: number("penalty")?,
        raw_score: number("raw")?,
    })
}

/// `-name value` tokens in name order
pub fn argument_tokens(config: &Configuration) -> Vec<String> {
    config
        .iter()
        .flat_map(|(name, value)| [format!("-{}", name), value.to_string()])
        .collect()
}

/// Instances from a file, one per line, blank lines skipped
pub fn load_instances(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read instance file {}", path.display()))?;
    let instances: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if instances.is_empty() {
        anyhow::bail!("Instance file {} lists no instances", path.display());
    }
    Ok(instances)
}

#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    pub executable: CommandSpec,
    pub instances: Vec<String>,
    pub max_fail_count: u32,
    /// Budget on accumulated training time
    pub tuner_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvaluationOutcome {
    /// Mean score over the instances, or `FAILED_SCORE` after too many failures
    Scored { score: f64, failed: bool },
    /// Accumulated training time went past the tuner budget
    TunerTimeout,
}

pub struct Evaluator {
    settings: EvaluationSettings,
    supervisor: ProcessSupervisor,
    training_time: f64,
    tuner_time: f64,
    last_mark: Instant,
}

impl Evaluator {
    pub fn new(settings: EvaluationSettings, supervisor: ProcessSupervisor) -> Self {
        Self {
            settings,
            supervisor,
            training_time: 0.0,
            tuner_time: 0.0,
            last_mark: Instant::now(),
        }
    }

    /// Seconds reported by target runs plus tuner overhead
    pub fn training_time(&self) -> f64 {
        self.training_time
    }

    /// Seconds spent outside target runs
    pub fn tuner_time(&self) -> f64 {
        self.tuner_time
    }

    pub async fn evaluate(&mut self, config: &Configuration) -> anyhow::Result<EvaluationOutcome> {
        let args = argument_tokens(config);
        info!("Evaluating configuration: {}", args.join(" "));

        let mut losses = Vec::with_capacity(self.settings.instances.len());
        let mut fail_count = 0u32;
        let mut failed = false;
        let mut waited = Duration::ZERO;

        for instance in self.settings.instances.clone() {
            let mut cmd = self.settings.executable.clone().arg(instance.as_str());
            cmd.args.extend(args.iter().cloned());

            let started = Instant::now();
            let result = self.run_instance(&cmd).await?;
            waited += started.elapsed();

            match result {
                Some(result) => {
                    info!("Run status {}: {} score={}", instance, result.status, result.score);
                    self.training_time += result.time;
                    losses.push(result.score);
                    if result.score >= FAILURE_THRESHOLD {
                        fail_count += 1;
                    } else {
                        fail_count = 0;
                    }
                }
                None => {
                    warn!("Run status {}: did not execute correctly", instance);
                    fail_count += 1;
                }
            }

            if fail_count >= self.settings.max_fail_count {
                warn!("Fail count reached after {}", instance);
                failed = true;
                break;
            }
            if self.budget_exhausted() {
                info!("Tuner timeout hit inside loop");
                return Ok(EvaluationOutcome::TunerTimeout);
            }
        }

        let score = if failed || losses.is_empty() {
            FAILED_SCORE
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        };

        // everything since the last mark that was not a target run
        let overhead = self.last_mark.elapsed().saturating_sub(waited).as_secs_f64();
        self.training_time += overhead;
        self.tuner_time += overhead;
        self.last_mark = Instant::now();

        if self.budget_exhausted() {
            info!("Tuner timeout hit");
            return Ok(EvaluationOutcome::TunerTimeout);
        }
        Ok(EvaluationOutcome::Scored { score, failed })
    }

    /// `None` when the instance run produced no result line.
    /// The result line is the last non-empty line of stdout and stderr combined.
    async fn run_instance(&mut self, cmd: &CommandSpec) -> anyhow::Result<Option<InstanceResult>> {
        debug!("Running instance: {}", cmd.display());
        match self.supervisor.run_capturing_merged(cmd, None).await {
            Ok(run) => {
                let last = run.stdout.lines().rev().find(|line| !line.trim().is_empty());
                Ok(last.and_then(parse_tpe_line))
            }
            Err(SupervisorError::Interrupted) => {
                self.supervisor.terminate_all().await;
                anyhow::bail!("Evaluation interrupted by signal")
            }
            Err(e) => {
                warn!("{}", e);
                Ok(None)
            }
        }
    }

    fn budget_exhausted(&self) -> bool {
        self.settings
            .tuner_timeout
            .is_some_and(|limit| self.training_time > limit.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn evaluator(script: &Path, instances: &[&str], tuner_timeout: Option<Duration>) -> Evaluator {
        let settings = EvaluationSettings {
            executable: CommandSpec::new("sh").arg(script.to_string_lossy().into_owned()),
            instances: instances.iter().map(|s| s.to_string()).collect(),
            max_fail_count: DEFAULT_MAX_FAIL_COUNT,
            tuner_timeout,
        };
        Evaluator::new(
            settings,
            ProcessSupervisor::new(CancellationToken::new(), Duration::from_millis(200)),
        )
    }

    /// Score is the instance name; `bad` prints nothing useful
    fn write_runner(dir: &Path) -> std::path::PathBuf {
        let script = dir.join("run_instance.sh");
        std::fs::write(
            &script,
            r#"echo "solving $1 with $2 $3"
if [ "$1" = "bad" ]; then echo "segfault"; exit 1; fi
echo "Result for TPE: SUCCESS time=2.5, score=$1, penalty=0, rawScore=$1"
"#,
        )
        .unwrap();
        script
    }

    #[test]
    fn test_parse_tpe_line() {
        let result =
            parse_tpe_line("Result for TPE: SUCCESS time=1.25, score=0.5, penalty=0, rawScore=0.5")
                .unwrap();
        assert_eq!(result.status, "SUCCESS");
        assert_eq!(result.time, 1.25);
        assert_eq!(result.score, 0.5);
        assert!(parse_tpe_line("Result for ParamILS: SAT, 1, -1, -1, 4").is_none());
    }

    #[test]
    fn test_argument_tokens_sorted() {
        let mut config = Configuration::new();
        config.insert("y", "2");
        config.insert("x", "-1");
        assert_eq!(argument_tokens(&config), vec!["-x", "-1", "-y", "2"]);
    }

    #[tokio::test]
    async fn test_mean_score() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_runner(dir.path());
        let mut evaluator = evaluator(&script, &["1", "bad", "3"], None);

        let mut config = Configuration::new();
        config.insert("alpha", "0.5");
        let outcome = evaluator.evaluate(&config).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Scored { score: 2.0, failed: false });
        assert!(evaluator.training_time() >= 5.0);
    }

    #[tokio::test]
    async fn test_fail_streak_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_runner(dir.path());
        let mut evaluator = evaluator(&script, &["bad", "100", "bad", "1"], None);

        let outcome = evaluator.evaluate(&Configuration::new()).await.unwrap();
        assert_eq!(
            outcome,
            EvaluationOutcome::Scored {
                score: FAILED_SCORE,
                failed: true
            }
        );
    }

    #[tokio::test]
    async fn test_tuner_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_runner(dir.path());
        let mut evaluator = evaluator(&script, &["1", "2"], Some(Duration::from_secs(1)));

        let outcome = evaluator.evaluate(&Configuration::new()).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::TunerTimeout);
    }

    #[tokio::test]
    async fn test_result_line_on_stderr_is_scored() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run_instance.sh");
        std::fs::write(
            &script,
            r#"echo "Result for TPE: SUCCESS time=1, score=9, penalty=0, rawScore=9"
echo "Result for TPE: SUCCESS time=1.5, score=$1, penalty=0, rawScore=$1" >&2
"#,
        )
        .unwrap();
        let mut evaluator = evaluator(&script, &["4"], None);

        let outcome = evaluator.evaluate(&Configuration::new()).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Scored { score: 4.0, failed: false });
    }

    #[test]
    fn test_load_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.txt");
        std::fs::write(&path, "a.cnf\n\n  b.cnf \n").unwrap();
        assert_eq!(load_instances(&path).unwrap(), vec!["a.cnf", "b.cnf"]);

        std::fs::write(&path, "\n").unwrap();
        assert!(load_instances(&path).is_err());
    }
}
