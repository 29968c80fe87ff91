//! Command construction delegated to a callstring helper.
//!
//! The helper reads a `callstring*.csv` file (instance, seed, then one
//! `name,value` line per parameter) and prints the command line to run.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::CommandBuilder;
use crate::core::{Configuration, RunArguments};
use crate::error::WrapperError;
use crate::supervisor::{CommandSpec, ProcessSupervisor};

const PURPOSE: &str = "callstring generation";

#[derive(Debug, Clone)]
pub struct ExternalCommandBuilder {
    command: CommandSpec,
    tmp_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ExternalCommandBuilder {
    pub fn new(command: CommandSpec, tmp_dir: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            command,
            tmp_dir: tmp_dir.into(),
            timeout,
        }
    }

    /// Helper input file content
    pub fn input_content(run: &RunArguments, config: &Configuration) -> String {
        let mut content = format!("{}\n{}\n", run.instance, run.seed);
        for (name, value) in config.iter() {
            content.push_str(&format!("{},{}\n", name, value));
        }
        content
    }

    fn write_input(
        &self,
        run: &RunArguments,
        config: &Configuration,
    ) -> Result<NamedTempFile, WrapperError> {
        let temp_err = |source| WrapperError::TempFile {
            path: self.tmp_dir.clone(),
            source,
        };

        let mut file = tempfile::Builder::new()
            .prefix("callstring")
            .suffix(".csv")
            .tempfile_in(&self.tmp_dir)
            .map_err(temp_err)?;
        file.write_all(Self::input_content(run, config).as_bytes())
            .and_then(|_| file.flush())
            .map_err(temp_err)?;
        Ok(file)
    }
}

#[async_trait]
impl CommandBuilder for ExternalCommandBuilder {
    async fn build(
        &self,
        run: &RunArguments,
        config: &Configuration,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<CommandSpec, WrapperError> {
        // removed on drop, whichever way this returns
        let input = self.write_input(run, config)?;

        let cmd = self
            .command
            .clone()
            .arg(input.path().to_string_lossy().into_owned());
        debug!("Calling external callstring generator: {}", cmd.display());

        let output = supervisor
            .run_capturing(&cmd, self.timeout)
            .await
            .map_err(|e| WrapperError::helper(PURPOSE, e))?;
        if !output.status.success() {
            warn!("External callstring generator exited with {}", output.status);
        }

        let callstring = output.stdout.lines().next().unwrap_or("").trim();
        let tokens: Vec<String> = callstring.split_whitespace().map(str::to_string).collect();
        CommandSpec::from_vec(&tokens).ok_or_else(|| {
            WrapperError::Helper(format!(
                "external callstring generator produced no output: {}",
                cmd.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn run() -> RunArguments {
        RunArguments {
            instance: "inst/a.cnf".to_string(),
            specifics: "0".to_string(),
            cutoff: 10.0,
            runlength: -1,
            seed: 42,
        }
    }

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(CancellationToken::new(), Duration::from_millis(200))
    }

    fn callstring_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("callstring"))
            .count()
    }

    #[test]
    fn test_input_content() {
        let mut config = Configuration::new();
        config.insert("beta", "2");
        config.insert("alpha", "1.5");
        assert_eq!(
            ExternalCommandBuilder::input_content(&run(), &config),
            "inst/a.cnf\n42\nalpha,1.5\nbeta,2\n"
        );
    }

    #[tokio::test]
    async fn test_helper_callstring() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("callstring.sh");
        // echoes the instance line back as part of the command
        std::fs::write(&script, "echo \"./solver -i $(head -n 1 \"$1\") -x 3\"\n").unwrap();

        let builder = ExternalCommandBuilder::new(
            CommandSpec::new("sh").arg(script.to_string_lossy().into_owned()),
            dir.path(),
            Some(Duration::from_secs(10)),
        );
        let mut config = Configuration::new();
        config.insert("x", "3");

        let cmd = builder.build(&run(), &config, &mut supervisor()).await.unwrap();
        assert_eq!(cmd.program, "./solver");
        assert_eq!(cmd.args, vec!["-i", "inst/a.cnf", "-x", "3"]);
        // only the script itself is left
        assert_eq!(callstring_files(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_empty_output_is_helper_failure() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ExternalCommandBuilder::new(
            CommandSpec::new("true"),
            dir.path(),
            Some(Duration::from_secs(10)),
        );
        let err = builder
            .build(&run(), &Configuration::new(), &mut supervisor())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(callstring_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_tmp_dir() {
        let builder = ExternalCommandBuilder::new(
            CommandSpec::new("true"),
            "/nonexistent/ta-wrapper-tmp",
            None,
        );
        let err = builder
            .build(&run(), &Configuration::new(), &mut supervisor())
            .await
            .unwrap_err();
        assert!(matches!(err, WrapperError::TempFile { .. }));
    }
}
