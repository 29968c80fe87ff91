//! Parser module - turning target output into a partial result
//!
//! - `builtin`: pattern rules for common target families
//! - `external`: delegation to a helper program
//! - `watcher`: the resource limiter's own log, used whatever the strategy
//!
//! Parsers only report what they found; merging into the record happens in
//! `ResultRecord::absorb`.

pub mod builtin;
pub mod external;
pub mod watcher;

use std::path::Path;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::Deserialize;

use crate::core::ParsedOutput;
use crate::error::WrapperError;
use crate::supervisor::ProcessSupervisor;

pub use builtin::{NullParser, ObjectiveLineParser, SatParser, UbcsatParser};
pub use external::ExternalOutputParser;
pub use watcher::{parse_watcher_log, WatcherReport};

/// What a parser gets to look at
#[derive(Debug, Clone, Copy)]
pub struct ParseInput<'a> {
    /// Solver log on disk; `None` in internal mode
    pub solver_log: Option<&'a Path>,
    /// Solver log content
    pub output: &'a str,
    /// Exit code of the target, when known
    pub exit_code: Option<i32>,
}

/// Output parsing strategy
#[async_trait]
pub trait OutputParser: Send + Sync {
    async fn parse(
        &self,
        input: &ParseInput<'_>,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<ParsedOutput, WrapperError>;
}

/// Built-in parser families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// `s SATISFIABLE` / `s UNSATISFIABLE` solver lines
    Sat,
    /// A result line carrying one objective value
    Objective,
    /// ubcsat statistics block
    Ubcsat,
    /// Report nothing
    #[default]
    None,
}
