//! Invocation assembly: plain commands and limiter-wrapped target runs

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// Command specification for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Option<Self> {
        let (program, args) = cmd.split_first()?;
        if program.is_empty() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Split a helper command string such as `python3 parse.py --fast`
    pub fn from_command_line(line: &str) -> Option<Self> {
        let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        Self::from_vec(&tokens)
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.clone());
        v
    }

    /// Space-joined form for logs and misc messages
    pub fn display(&self) -> String {
        self.to_vec().join(" ")
    }

    /// Tokio command in its own process group, stdin closed
    pub(crate) fn to_tokio_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .process_group(0);
        cmd
    }
}

/// Resource limiter in front of the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Limiter {
    /// Target runs bare, stdout captured into the solver log
    Disabled,
    /// runsolver-compatible binary
    Runsolver { binary: PathBuf, memory_mb: u32 },
}

impl Limiter {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Limiter::Runsolver { .. })
    }
}

/// Where a limited run writes its logs
#[derive(Debug, Clone)]
pub struct LogPaths {
    pub watcher: PathBuf,
    pub solver: PathBuf,
}

/// Wrap the target command with the limiter, if any.
///
/// `[limiter, -M, mem, -C, cpu, -w, watcher, -o, solver, target...]`
pub fn limited_invocation(
    limiter: &Limiter,
    cpu_secs: u64,
    logs: &LogPaths,
    target: &CommandSpec,
) -> CommandSpec {
    match limiter {
        Limiter::Disabled => target.clone(),
        Limiter::Runsolver { binary, memory_mb } => {
            let mut args = vec![
                "-M".to_string(),
                memory_mb.to_string(),
                "-C".to_string(),
                cpu_secs.to_string(),
                "-w".to_string(),
                path_arg(&logs.watcher),
                "-o".to_string(),
                path_arg(&logs.solver),
            ];
            args.extend(target.to_vec());
            CommandSpec::new(path_arg(binary)).with_args(args)
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> CommandSpec {
        CommandSpec::new("./spear").with_args(["--seed", "42", "f.cnf"])
    }

    fn logs() -> LogPaths {
        LogPaths {
            watcher: PathBuf::from("/tmp/watcher-1.log"),
            solver: PathBuf::from("/tmp/solver-1.log"),
        }
    }

    #[test]
    fn test_runsolver_invocation() {
        let limiter = Limiter::Runsolver {
            binary: PathBuf::from("/opt/runsolver"),
            memory_mb: 2048,
        };
        let cmd = limited_invocation(&limiter, 31, &logs(), &target());
        assert_eq!(
            cmd.to_vec(),
            vec![
                "/opt/runsolver",
                "-M",
                "2048",
                "-C",
                "31",
                "-w",
                "/tmp/watcher-1.log",
                "-o",
                "/tmp/solver-1.log",
                "./spear",
                "--seed",
                "42",
                "f.cnf"
            ]
        );
    }

    #[test]
    fn test_disabled_limiter_runs_target_bare() {
        let cmd = limited_invocation(&Limiter::Disabled, 31, &logs(), &target());
        assert_eq!(cmd, target());
    }

    #[test]
    fn test_from_command_line() {
        let cmd = CommandSpec::from_command_line("  python3 parse.py --fast ").unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["parse.py", "--fast"]);
        assert!(CommandSpec::from_command_line("   ").is_none());
        assert!(CommandSpec::from_vec(&[]).is_none());
    }
}
