//! Wrapper settings
//!
//! Settings are resolved once from the command line (see `cli`) and passed
//! explicitly to the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::WrapperError;
use crate::parser::ParserKind;
use crate::supervisor::{CommandSpec, Limiter, DEFAULT_KILL_GRACE};

/// Default memory ceiling handed to the limiter, in MB
pub const DEFAULT_MEM_LIMIT_MB: u32 = 2048;
/// Default bound on helper runs
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WrapperSettings {
    pub limiter: Limiter,
    /// Where the run's temp logs go
    pub tmp_dir: PathBuf,
    /// Build the command and parse, but never run the target
    pub internal: bool,
    pub ext_callstring: Option<CommandSpec>,
    pub ext_parsing: Option<CommandSpec>,
    pub targets_path: PathBuf,
    pub target: Option<String>,
    /// Overrides the target's parser
    pub parser: Option<ParserKind>,
    pub kill_grace: Duration,
    /// `None` waits for helpers forever
    pub helper_timeout: Option<Duration>,
}

impl Default for WrapperSettings {
    fn default() -> Self {
        Self {
            limiter: Limiter::Disabled,
            tmp_dir: PathBuf::from("."),
            internal: false,
            ext_callstring: None,
            ext_parsing: None,
            targets_path: PathBuf::from("./files/targets.toml"),
            target: None,
            parser: None,
            kill_grace: DEFAULT_KILL_GRACE,
            helper_timeout: Some(DEFAULT_HELPER_TIMEOUT),
        }
    }
}

impl WrapperSettings {
    /// Check the environment the run depends on
    pub fn validate(&self) -> Result<(), WrapperError> {
        if let Limiter::Runsolver { binary, .. } = &self.limiter {
            if !self.internal && !binary.is_file() {
                return Err(WrapperError::Validation(format!(
                    "runsolver is missing - should have been at {}.",
                    binary.display()
                )));
            }
        }

        if !self.tmp_dir.is_dir() {
            return Err(WrapperError::Validation(format!(
                "temp directory is missing - should have been at {}.",
                self.tmp_dir.display()
            )));
        }

        Ok(())
    }
}
