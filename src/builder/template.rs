//! In-process command construction from a target definition

use async_trait::async_trait;
use regex::Captures;

use super::CommandBuilder;
use crate::core::{Configuration, RunArguments};
use crate::error::WrapperError;
use crate::supervisor::{CommandSpec, ProcessSupervisor};
use crate::targets::{TargetDefinition, PLACEHOLDER};

#[derive(Debug, Clone)]
pub struct TemplateCommandBuilder {
    target: TargetDefinition,
}

impl TemplateCommandBuilder {
    pub fn new(target: TargetDefinition) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &TargetDefinition {
        &self.target
    }

    /// Deterministic command line: binary, expanded arguments, then one
    /// parameter expansion per configuration pair in name order.
    ///
    /// Tokens that expand to nothing are dropped.
    pub fn command_line(&self, run: &RunArguments, config: &Configuration) -> Vec<String> {
        let mut line = vec![self.target.binary.clone()];

        let run_value = |name: &str| -> String {
            match name {
                "instance" => run.instance.clone(),
                "specifics" => run.specifics.clone(),
                "cutoff" => run.cutoff.to_string(),
                "runlength" => run.runlength.to_string(),
                "seed" => run.seed.to_string(),
                _ => String::new(),
            }
        };
        line.extend(expand(&self.target.arguments, run_value));

        for (name, value) in config.iter() {
            let pair_value = |placeholder: &str| -> String {
                match placeholder {
                    "name" => name.to_string(),
                    "value" => value.to_string(),
                    _ => String::new(),
                }
            };
            line.extend(expand(&self.target.parameter, pair_value));
        }

        line
    }
}

fn expand<'a>(
    tokens: &'a [String],
    lookup: impl Fn(&str) -> String + 'a,
) -> impl Iterator<Item = String> + 'a {
    tokens
        .iter()
        .map(move |token| {
            PLACEHOLDER
                .replace_all(token, |caps: &Captures| lookup(&caps[1]))
                .into_owned()
        })
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl CommandBuilder for TemplateCommandBuilder {
    async fn build(
        &self,
        run: &RunArguments,
        config: &Configuration,
        _supervisor: &mut ProcessSupervisor,
    ) -> Result<CommandSpec, WrapperError> {
        CommandSpec::from_vec(&self.command_line(run, config)).ok_or_else(|| {
            WrapperError::Validation(format!(
                "target {} produced an empty command line.",
                self.target.name
            ))
        })
    }
}
