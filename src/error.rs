//! Error taxonomy of a wrapped run.
//!
//! Every variant is terminal for the run. The orchestrator turns it into a
//! status, an exit code and a misc message; nothing is retried.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::RunStatus;
use crate::supervisor::SupervisorError;

pub const EXIT_ABORT: i32 = 1;
pub const EXIT_HELPER_FAILURE: i32 = 2;
pub const EXIT_UNEXPLAINED: i32 = 3;

#[derive(Error, Debug)]
pub enum WrapperError {
    /// Bad command line or environment
    #[error("{0}")]
    Validation(String),

    /// The target (or the limiter wrapping it) could not be started
    #[error("execution failed: {command}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A temp artifact could not be created or read
    #[error("temporary file problem at {}: {source}", path.display())]
    TempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External callstring or parsing helper misbehaved
    #[error("{0}")]
    Helper(String),

    /// A termination signal arrived
    #[error("forced to exit by signal or keyboard interrupt.")]
    Interrupted,
}

impl WrapperError {
    /// Orchestrator-level exit code, 0 when the error does not pick one
    pub fn exit_code(&self) -> i32 {
        match self {
            WrapperError::Validation(_)
            | WrapperError::Launch { .. }
            | WrapperError::TempFile { .. } => EXIT_ABORT,
            WrapperError::Helper(_) => EXIT_HELPER_FAILURE,
            WrapperError::Interrupted => 0,
        }
    }

    /// Status forced by the error, if any
    pub fn status(&self) -> Option<RunStatus> {
        match self {
            WrapperError::Validation(_)
            | WrapperError::Launch { .. }
            | WrapperError::TempFile { .. } => Some(RunStatus::Abort),
            WrapperError::Helper(_) | WrapperError::Interrupted => None,
        }
    }

    /// Whether the full cutoff is charged as runtime
    pub fn attributes_cutoff(&self) -> bool {
        matches!(self, WrapperError::Helper(_) | WrapperError::Interrupted)
    }

    /// Map a failed helper run, keeping shutdown requests distinct
    pub fn helper(purpose: &str, err: SupervisorError) -> Self {
        match err {
            SupervisorError::Interrupted => WrapperError::Interrupted,
            SupervisorError::Spawn { command, .. } => WrapperError::Helper(format!(
                "failed to run external program for {}: {}",
                purpose, command
            )),
            other => WrapperError::Helper(format!("{} helper failed: {}", purpose, other)),
        }
    }

    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            WrapperError::Validation(_) => "validation_error",
            WrapperError::Launch { .. } => "launch_error",
            WrapperError::TempFile { .. } => "temp_file_error",
            WrapperError::Helper(_) => "helper_failure",
            WrapperError::Interrupted => "signal_interrupt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(WrapperError::Validation("x".into()).exit_code(), 1);
        assert_eq!(WrapperError::Helper("x".into()).exit_code(), 2);
        assert_eq!(WrapperError::Interrupted.exit_code(), 0);
        let launch = WrapperError::Launch {
            command: "./solver".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(launch.exit_code(), 1);
        assert_eq!(launch.status(), Some(RunStatus::Abort));
        assert_eq!(launch.to_string(), "execution failed: ./solver");
    }

    #[test]
    fn test_cutoff_attribution() {
        assert!(WrapperError::Helper("x".into()).attributes_cutoff());
        assert!(WrapperError::Interrupted.attributes_cutoff());
        assert!(!WrapperError::Validation("x".into()).attributes_cutoff());
    }

    #[test]
    fn test_helper_mapping() {
        let spawn = SupervisorError::Spawn {
            command: "./parse.sh log".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let err = WrapperError::helper("result parsing", spawn);
        assert_eq!(err.exit_code(), EXIT_HELPER_FAILURE);
        assert_eq!(
            err.to_string(),
            "failed to run external program for result parsing: ./parse.sh log"
        );

        let err = WrapperError::helper("callstring", SupervisorError::Interrupted);
        assert!(matches!(err, WrapperError::Interrupted));
    }
}
