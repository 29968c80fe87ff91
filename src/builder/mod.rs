//! Builder module - turning a configuration into a target invocation
//!
//! - `TemplateCommandBuilder`: in-process, from a catalog target definition
//! - `ExternalCommandBuilder`: delegates to a callstring helper program
//!
//! The builder module does NOT:
//! - Wrap the command with the resource limiter
//! - Run the target

pub mod external;
pub mod template;

use async_trait::async_trait;

use crate::core::{Configuration, RunArguments};
use crate::error::WrapperError;
use crate::supervisor::{CommandSpec, ProcessSupervisor};

pub use external::ExternalCommandBuilder;
pub use template::TemplateCommandBuilder;

/// Command construction strategy
#[async_trait]
pub trait CommandBuilder: Send + Sync {
    /// Build the target invocation, program first
    async fn build(
        &self,
        run: &RunArguments,
        config: &Configuration,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<CommandSpec, WrapperError>;
}
