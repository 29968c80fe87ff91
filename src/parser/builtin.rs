//! Built-in output parsers
//!
//! Each parser scans the solver log text and fills in whatever it recognises.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{OutputParser, ParseInput};
use crate::core::record::RESULT_LINE_PREFIX;
use crate::core::{ParsedOutput, RunStatus};
use crate::error::WrapperError;
use crate::supervisor::ProcessSupervisor;

/// Default marker of the objective line
pub const DEFAULT_OBJECTIVE_MARKER: &str = RESULT_LINE_PREFIX;
/// Default field of the objective value: `status, runtime, runlength, quality, seed`
pub const DEFAULT_OBJECTIVE_FIELD: usize = 3;

/// SAT competition answer lines
#[derive(Debug, Clone, Default)]
pub struct SatParser {
    /// Report SAT/UNSAT instead of a plain SUCCESS
    pub report_answer: bool,
}

impl SatParser {
    pub fn new(report_answer: bool) -> Self {
        Self { report_answer }
    }

    pub fn parse_text(&self, output: &str) -> ParsedOutput {
        let mut parsed = ParsedOutput::default();
        for line in output.lines() {
            let status = match line.trim() {
                "s SATISFIABLE" if self.report_answer => RunStatus::Sat,
                "s UNSATISFIABLE" if self.report_answer => RunStatus::Unsat,
                "s SATISFIABLE" | "s UNSATISFIABLE" => RunStatus::Success,
                "s UNKNOWN" => RunStatus::Timeout,
                _ => continue,
            };
            // a definite answer beats UNKNOWN wherever it appears
            if parsed.status.is_none() || parsed.status == Some(RunStatus::Timeout) {
                parsed.status = Some(status);
            }
        }
        parsed
    }
}

#[async_trait]
impl OutputParser for SatParser {
    async fn parse(
        &self,
        input: &ParseInput<'_>,
        _supervisor: &mut ProcessSupervisor,
    ) -> Result<ParsedOutput, WrapperError> {
        Ok(self.parse_text(input.output))
    }
}

/// A fixed-format line with one floating-point objective value.
///
/// The last line containing `marker` is split on commas after the marker and
/// field `field` is read as the quality.
#[derive(Debug, Clone)]
pub struct ObjectiveLineParser {
    pub marker: String,
    pub field: usize,
}

impl Default for ObjectiveLineParser {
    fn default() -> Self {
        Self {
            marker: DEFAULT_OBJECTIVE_MARKER.to_string(),
            field: DEFAULT_OBJECTIVE_FIELD,
        }
    }
}

impl ObjectiveLineParser {
    pub fn new(marker: impl Into<String>, field: usize) -> Self {
        Self {
            marker: marker.into(),
            field,
        }
    }

    pub fn parse_text(&self, output: &str) -> ParsedOutput {
        let Some((line, rest)) = output.lines().rev().find_map(|line| {
            line.find(&self.marker)
                .map(|idx| (line, &line[idx + self.marker.len()..]))
        }) else {
            return ParsedOutput::default();
        };

        let value = rest
            .split(',')
            .nth(self.field)
            .map(str::trim)
            .and_then(|field| field.parse::<f64>().ok());

        match value {
            Some(quality) => ParsedOutput {
                status: Some(RunStatus::Success),
                quality: Some(quality),
                ..Default::default()
            },
            None => ParsedOutput {
                status: Some(RunStatus::Crashed),
                misc: Some(format!(
                    "no objective value in field {} of result line: {}",
                    self.field,
                    line.trim()
                )),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl OutputParser for ObjectiveLineParser {
    async fn parse(
        &self,
        input: &ParseInput<'_>,
        _supervisor: &mut ProcessSupervisor,
    ) -> Result<ParsedOutput, WrapperError> {
        Ok(self.parse_text(input.output))
    }
}

static SUCCESSFUL_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SuccessfulRuns = (\d+)").expect("Invalid SuccessfulRuns regex"));
static CPU_TIME_MEAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CPUTime_Mean = (\S+)").expect("Invalid CPUTime_Mean regex"));
static STEPS_MEAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Steps_Mean = (\d+)").expect("Invalid Steps_Mean regex"));
static BEST_SOLUTION_MEAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"BestSolution_Mean = (\d+)").expect("Invalid BestSolution_Mean regex")
});

/// ubcsat `-r stats` block
#[derive(Debug, Clone, Default)]
pub struct UbcsatParser;

impl UbcsatParser {
    pub fn parse_text(&self, output: &str) -> ParsedOutput {
        let mut parsed = ParsedOutput::default();
        for line in output.lines() {
            if let Some(solved) = capture::<u64>(&SUCCESSFUL_RUNS, line) {
                parsed.status = Some(if solved > 0 {
                    RunStatus::Success
                } else {
                    RunStatus::Timeout
                });
            }
            if let Some(runtime) = capture::<f64>(&CPU_TIME_MEAN, line) {
                parsed.runtime = Some(runtime);
            }
            if let Some(steps) = capture::<i64>(&STEPS_MEAN, line) {
                parsed.runlength = Some(steps);
            }
            if let Some(best) = capture::<f64>(&BEST_SOLUTION_MEAN, line) {
                parsed.quality = Some(best);
            }
        }
        parsed
    }
}

fn capture<T: std::str::FromStr>(re: &Regex, line: &str) -> Option<T> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

#[async_trait]
impl OutputParser for UbcsatParser {
    async fn parse(
        &self,
        input: &ParseInput<'_>,
        _supervisor: &mut ProcessSupervisor,
    ) -> Result<ParsedOutput, WrapperError> {
        Ok(self.parse_text(input.output))
    }
}

/// Reports nothing, leaving the run unexplained unless the limiter spoke
#[derive(Debug, Clone, Default)]
pub struct NullParser;

#[async_trait]
impl OutputParser for NullParser {
    async fn parse(
        &self,
        _input: &ParseInput<'_>,
        _supervisor: &mut ProcessSupervisor,
    ) -> Result<ParsedOutput, WrapperError> {
        Ok(ParsedOutput::default())
    }
}
