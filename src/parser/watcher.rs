//! Resource-limiter watcher log parser
//!
//! Reads the runsolver watcher log to find limit breaches, the measured CPU
//! time and the target's exit code.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::{ResultRecord, RunStatus};

const FLOAT: &str = r"[+-]?\d+(?:\.\d+)?(?:[eE][+-]\d+)?";

static CPU_TIME_EXCEEDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"runsolver_max_cpu_time_exceeded|Maximum CPU time exceeded")
        .expect("Invalid CPU limit marker regex")
});

static MEMORY_EXCEEDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"runsolver_max_memory_limit_exceeded").expect("Invalid memory limit marker regex")
});

static RUNSOLVER_CPUTIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"runsolver_cputime: ({})", FLOAT)).expect("Invalid cputime regex")
});

static CPU_TIME_SECONDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"CPU time \(s\): ({})", FLOAT)).expect("Invalid CPU time regex")
});

static CHILD_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Child status: ([0-9]+)").expect("Invalid child status regex"));

/// Message recorded when the memory ceiling was hit
pub const MEMORY_LIMIT_MESSAGE: &str = "memory limit was exceeded";

/// Parsed watcher log contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatcherReport {
    pub time_exceeded: bool,
    pub memory_exceeded: bool,
    /// CPU seconds used by the target
    pub cpu_time: Option<f64>,
    /// Raw exit code of the target
    pub exit_code: Option<i32>,
}

impl WatcherReport {
    pub fn limit_exceeded(&self) -> bool {
        self.time_exceeded || self.memory_exceeded
    }

    /// Write the findings into a record under construction
    pub fn apply(&self, record: &mut ResultRecord) {
        if self.limit_exceeded() {
            record.status = RunStatus::Timeout;
            record.limit_exceeded = true;
        }
        if self.memory_exceeded {
            record.misc = MEMORY_LIMIT_MESSAGE.to_string();
        }
        if let Some(cpu_time) = self.cpu_time {
            record.runtime = cpu_time;
        }
    }
}

/// Parse watcher log content.
///
/// Both CPU time formats are looked up; when both are present the
/// `CPU time (s):` line wins.
pub fn parse_watcher_log(content: &str) -> WatcherReport {
    let capture_f64 = |re: &Regex| {
        re.captures(content)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    };

    let mut cpu_time = capture_f64(&RUNSOLVER_CPUTIME);
    if let Some(t) = capture_f64(&CPU_TIME_SECONDS) {
        cpu_time = Some(t);
    }

    let exit_code = CHILD_STATUS
        .captures(content)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok());

    WatcherReport {
        time_exceeded: CPU_TIME_EXCEEDED.is_match(content),
        memory_exceeded: MEMORY_EXCEEDED.is_match(content),
        cpu_time,
        exit_code,
    }
}
