//! Core data model shared by every stage of a run

pub mod args;
pub mod record;
pub mod status;

pub use args::{parse_target_args, Configuration, RunArguments};
pub use record::{ParsedOutput, ResultRecord, UNMEASURED_RUNTIME};
pub use status::RunStatus;
