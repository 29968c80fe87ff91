//! Normalized run outcome and the result line handed back to the tuner.

use std::collections::HashMap;
use std::fmt;

use super::status::RunStatus;

/// Runtime reported when nothing measured the run
pub const UNMEASURED_RUNTIME: f64 = 999_999_999.0;

/// Prefix the tuner scans stdout for
pub const RESULT_LINE_PREFIX: &str = "Result for ParamILS:";

/// Partial outcome produced by an output parser.
///
/// Only the fields that are `Some` are written into the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub status: Option<RunStatus>,
    pub runtime: Option<f64>,
    pub runlength: Option<i64>,
    pub quality: Option<f64>,
    pub misc: Option<String>,
}

impl ParsedOutput {
    pub fn is_empty(&self) -> bool {
        *self == ParsedOutput::default()
    }
}

/// Outcome record, filled progressively during one run
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub status: RunStatus,
    /// Seconds; `UNMEASURED_RUNTIME` until something measures it
    pub runtime: f64,
    /// -1 when unused
    pub runlength: i64,
    /// -1 when the target reports no quality
    pub quality: f64,
    pub misc: String,
    /// Set when the resource limiter reported a time or memory breach
    pub limit_exceeded: bool,
}

impl Default for ResultRecord {
    fn default() -> Self {
        Self {
            status: RunStatus::ExternalKill,
            runtime: UNMEASURED_RUNTIME,
            runlength: -1,
            quality: -1.0,
            misc: String::new(),
            limit_exceeded: false,
        }
    }
}

impl ResultRecord {
    /// Merge a parser's output into the record.
    ///
    /// The status goes through `mapping` first. A TIMEOUT caused by a limit
    /// breach is never overwritten.
    pub fn absorb(&mut self, parsed: ParsedOutput, mapping: &HashMap<RunStatus, RunStatus>) {
        if let Some(status) = parsed.status {
            let status = mapping.get(&status).copied().unwrap_or(status);
            if !self.limit_exceeded {
                self.status = status;
            }
        }
        if let Some(runtime) = parsed.runtime {
            self.runtime = runtime;
        }
        if let Some(runlength) = parsed.runlength {
            self.runlength = runlength;
        }
        if let Some(quality) = parsed.quality {
            self.quality = quality;
        }
        if let Some(misc) = parsed.misc {
            self.misc = misc;
        }
    }

    /// Append a `; `-separated note to misc
    pub fn append_misc(&mut self, extra: &str) {
        if !self.misc.is_empty() {
            self.misc.push_str("; ");
        }
        self.misc.push_str(extra);
    }

    /// Render the single line the tuner reads
    pub fn result_line(&self, seed: i64) -> String {
        ResultLine { record: self, seed }.to_string()
    }
}

struct ResultLine<'a> {
    record: &'a ResultRecord,
    seed: i64,
}

impl fmt::Display for ResultLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.record;
        // runtime always carries a fractional part, e.g. `999999999.0`
        write!(
            f,
            "{} {}, {:?}, {}, {}, {}",
            RESULT_LINE_PREFIX, r.status, r.runtime, r.runlength, r.quality, self.seed
        )?;
        // misc must stay comma-free or the tuner splits it into extra fields
        let misc = r.misc.trim().replace(',', ";").replace('\n', " ");
        if !misc.is_empty() {
            write!(f, ", {}", misc)?;
        }
        Ok(())
    }
}
