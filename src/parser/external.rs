//! Result parsing delegated to a helper program.
//!
//! The helper gets the solver log path as its only argument and answers with
//! `status:`, `quality:` and `misc:` lines. Anything else it prints is ignored.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{OutputParser, ParseInput};
use crate::core::{ParsedOutput, RunStatus};
use crate::error::WrapperError;
use crate::supervisor::{CommandSpec, ProcessSupervisor};

const PURPOSE: &str = "result parsing";

#[derive(Debug, Clone)]
pub struct ExternalOutputParser {
    command: CommandSpec,
    timeout: Option<Duration>,
}

impl ExternalOutputParser {
    pub fn new(command: CommandSpec, timeout: Option<Duration>) -> Self {
        Self { command, timeout }
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

/// Read the helper's answer
pub fn parse_helper_output(stdout: &str) -> Result<ParsedOutput, WrapperError> {
    let mut parsed = ParsedOutput::default();
    for line in stdout.lines() {
        if let Some(value) = line.strip_prefix("status:") {
            let status = value.parse::<RunStatus>().map_err(|e| {
                WrapperError::Helper(format!("external result parser reported {}", e))
            })?;
            parsed.status = Some(status);
        } else if let Some(value) = line.strip_prefix("quality:") {
            let quality = value.trim().parse::<f64>().map_err(|_| {
                WrapperError::Helper(format!(
                    "external result parser reported a non-numeric quality - was {:?}.",
                    value.trim()
                ))
            })?;
            parsed.quality = Some(quality);
        } else if let Some(value) = line.strip_prefix("misc:") {
            parsed.misc = Some(value.trim().to_string());
        }
    }

    if parsed.is_empty() {
        return Err(WrapperError::Helper(
            "external result parser produced no usable output.".to_string(),
        ));
    }
    Ok(parsed)
}

#[async_trait]
impl OutputParser for ExternalOutputParser {
    async fn parse(
        &self,
        input: &ParseInput<'_>,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<ParsedOutput, WrapperError> {
        let Some(log) = input.solver_log else {
            return Err(WrapperError::Helper(
                "external result parser needs a solver log, none exists in internal mode."
                    .to_string(),
            ));
        };

        let cmd = self
            .command
            .clone()
            .arg(log.to_string_lossy().into_owned());
        debug!("Calling external result parser: {}", cmd.display());

        let run = supervisor
            .run_capturing(&cmd, self.timeout)
            .await
            .map_err(|e| WrapperError::helper(PURPOSE, e))?;
        if !run.status.success() {
            warn!("External result parser exited with {}", run.status);
        }

        parse_helper_output(&run.stdout)
    }
}
