use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome status reported to the tuner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Sat,
    Unsat,
    Timeout,
    Crashed,
    Abort,
    /// Nobody has explained the run yet; never emitted
    #[serde(rename = "EXTERNALKILL")]
    ExternalKill,
}

impl RunStatus {
    /// Statuses for which the temp logs are kept for postmortem inspection
    pub fn preserves_artifacts(self) -> bool {
        matches!(self, RunStatus::Abort | RunStatus::Crashed)
    }

    pub fn is_explained(self) -> bool {
        self != RunStatus::ExternalKill
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Sat => "SAT",
            RunStatus::Unsat => "UNSAT",
            RunStatus::Timeout => "TIMEOUT",
            RunStatus::Crashed => "CRASHED",
            RunStatus::Abort => "ABORT",
            RunStatus::ExternalKill => "EXTERNALKILL",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown run status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for RunStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(RunStatus::Success),
            "SAT" => Ok(RunStatus::Sat),
            "UNSAT" => Ok(RunStatus::Unsat),
            "TIMEOUT" => Ok(RunStatus::Timeout),
            "CRASHED" => Ok(RunStatus::Crashed),
            "ABORT" => Ok(RunStatus::Abort),
            "EXTERNALKILL" => Ok(RunStatus::ExternalKill),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}
