//! Command-line surfaces of `ta-wrapper` and `ta-evaluate`

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{WrapperSettings, DEFAULT_MEM_LIMIT_MB};
use crate::error::WrapperError;
use crate::evaluation::DEFAULT_MAX_FAIL_COUNT;
use crate::parser::ParserKind;
use crate::supervisor::{CommandSpec, Limiter};

/// Value of `--runsolver-path` that turns the limiter off
pub const NO_LIMITER: &str = "none";

/// Run one target algorithm call for a tuner and print its result line.
///
/// Positional tail: `<instance> <specifics> <cutoff> <runlength> <seed> [<name> <value>]...`
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "ta-wrapper", version, disable_help_flag = true)]
pub struct Cli {
    /// Path to the runsolver binary ("none" disables it)
    #[arg(long, env = "TA_RUNSOLVER_PATH")]
    pub runsolver_path: Option<String>,

    /// Directory for temporary files
    #[arg(long, env = "TA_TEMP_DIR", default_value = ".")]
    pub temp_file_dir: PathBuf,

    /// Memory limit in MB
    #[arg(long, env = "TA_MEM_LIMIT", default_value_t = DEFAULT_MEM_LIMIT_MB)]
    pub mem_limit: u32,

    /// Skip calling the target algorithm
    #[arg(long)]
    pub internal: bool,

    /// Command printing the target call string; gets a file with the
    /// instance, the seed and one `name,value` line per parameter
    #[arg(long, env = "TA_EXT_CALLSTRING")]
    pub ext_callstring: Option<String>,

    /// Command parsing the target output; gets the output file and prints
    /// `status:`, `quality:` and `misc:` lines
    #[arg(long, env = "TA_EXT_PARSING")]
    pub ext_parsing: Option<String>,

    /// Target catalog
    #[arg(long, env = "TA_TARGETS_CONFIG", default_value = "./files/targets.toml")]
    pub targets: PathBuf,

    /// Target name or alias in the catalog
    #[arg(long, env = "TA_TARGET")]
    pub target: Option<String>,

    /// Built-in output parser, overriding the target's
    #[arg(long, value_enum)]
    pub parser: Option<ParserKind>,

    /// Seconds between SIGTERM and SIGKILL when stopping a run
    #[arg(long, default_value_t = 2.0)]
    pub kill_grace: f64,

    /// Seconds allowed for external helpers (0 waits forever)
    #[arg(long, default_value_t = 30.0)]
    pub helper_timeout: f64,

    /// Show this help message
    #[arg(long, action = ArgAction::SetTrue)]
    pub help: bool,

    /// Instance, specifics, cutoff, runlength, seed and parameter pairs
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub target_args: Vec<String>,
}

impl Cli {
    pub fn into_settings(&self) -> Result<WrapperSettings, WrapperError> {
        let limiter = match self.runsolver_path.as_deref() {
            Some(path) if path.eq_ignore_ascii_case(NO_LIMITER) => Limiter::Disabled,
            Some(path) => Limiter::Runsolver {
                binary: PathBuf::from(path),
                memory_mb: self.mem_limit,
            },
            None => Limiter::Runsolver {
                binary: default_runsolver_path(),
                memory_mb: self.mem_limit,
            },
        };

        let kill_grace = seconds(self.kill_grace, "kill grace")?;
        let helper_timeout = seconds(self.helper_timeout, "helper timeout")?;

        Ok(WrapperSettings {
            limiter,
            tmp_dir: self.temp_file_dir.clone(),
            internal: self.internal,
            ext_callstring: self
                .ext_callstring
                .as_deref()
                .and_then(CommandSpec::from_command_line),
            ext_parsing: self
                .ext_parsing
                .as_deref()
                .and_then(CommandSpec::from_command_line),
            targets_path: self.targets.clone(),
            target: self.target.clone(),
            parser: self.parser,
            kill_grace,
            helper_timeout: (!helper_timeout.is_zero()).then_some(helper_timeout),
        })
    }
}

/// `runsolver/runsolver` next to the wrapper executable
fn default_runsolver_path() -> PathBuf {
    let dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_default();
    dir.join("runsolver").join("runsolver")
}

fn seconds(value: f64, what: &str) -> Result<Duration, WrapperError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        WrapperError::Validation(format!(
            "{} must be a non-negative number of seconds - was {}.",
            what, value
        ))
    })
}

/// Evaluate one configuration over a set of instances.
///
/// Positional arguments are `name value` pairs.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "ta-evaluate", version)]
pub struct EvaluateCli {
    /// Command that runs one instance and prints a `Result for TPE:` line
    #[arg(long, env = "TA_EVAL_EXECUTABLE")]
    pub executable: String,

    /// File with one instance per line
    #[arg(long, env = "TA_EVAL_INSTANCES")]
    pub instance_file: PathBuf,

    /// Consecutive failed instances before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_FAIL_COUNT)]
    pub max_fail_count: u32,

    /// Overall tuner budget in seconds
    #[arg(long)]
    pub tuner_timeout: Option<f64>,

    /// Parameter name and value pairs
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub params: Vec<String>,
}
