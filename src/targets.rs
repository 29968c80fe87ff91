//! Target catalog: how to call each known target algorithm

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;

use crate::core::RunStatus;
use crate::parser::ParserKind;

/// `{placeholder}` inside a template token
pub(crate) static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("Invalid placeholder regex"));

/// Placeholders allowed in `arguments`
pub const RUN_PLACEHOLDERS: [&str; 5] = ["instance", "specifics", "cutoff", "runlength", "seed"];
/// Placeholders allowed in `parameter`
pub const PARAMETER_PLACEHOLDERS: [&str; 2] = ["name", "value"];

pub const DEFAULT_PARAMETER_TEMPLATE: &str = "-{name} {value}";

/// A resolved target definition
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDefinition {
    pub name: String,
    pub binary: String,
    /// Argument template tokens, e.g. `["--seed", "{seed}", "{instance}"]`
    pub arguments: Vec<String>,
    /// Tokens emitted per configuration pair
    pub parameter: Vec<String>,
    pub parser: ParserKind,
    pub objective_marker: Option<String>,
    pub objective_field: Option<usize>,
    /// SAT/UNSAT instead of SUCCESS for decided instances
    pub report_answer: bool,
    pub status_mapping: HashMap<RunStatus, RunStatus>,
}

/// Raw TOML entry for a target
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    binary: String,
    #[serde(default)]
    arguments: String,
    parameter: Option<String>,
    #[serde(default)]
    parser: ParserKind,
    objective_marker: Option<String>,
    objective_field: Option<usize>,
    #[serde(default)]
    report_answer: bool,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    status_mapping: HashMap<String, String>,
}

/// Every target known to this wrapper, keyed by lowercase name and alias
#[derive(Debug, Clone, Default)]
pub struct TargetCatalog {
    targets: HashMap<String, TargetDefinition>,
}

impl TargetCatalog {
    /// Load the catalog from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read target catalog {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid target catalog {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_targets: HashMap<String, RawTarget> = toml::from_str(content)?;

        let mut targets = HashMap::new();
        for (name, raw) in raw_targets {
            if raw.binary.trim().is_empty() {
                anyhow::bail!("Empty binary for target {}", name);
            }

            let arguments = into_tokens(&raw.arguments);
            check_placeholders(&arguments, &RUN_PLACEHOLDERS)
                .with_context(|| format!("Invalid arguments template for {}", name))?;

            let parameter =
                into_tokens(raw.parameter.as_deref().unwrap_or(DEFAULT_PARAMETER_TEMPLATE));
            check_placeholders(&parameter, &PARAMETER_PLACEHOLDERS)
                .with_context(|| format!("Invalid parameter template for {}", name))?;

            let mut status_mapping = HashMap::new();
            for (from, to) in &raw.status_mapping {
                let from = from
                    .parse::<RunStatus>()
                    .with_context(|| format!("Invalid status mapping for {}", name))?;
                let to = to
                    .parse::<RunStatus>()
                    .with_context(|| format!("Invalid status mapping for {}", name))?;
                status_mapping.insert(from, to);
            }

            let definition = TargetDefinition {
                name: name.clone(),
                binary: raw.binary.trim().to_string(),
                arguments,
                parameter,
                parser: raw.parser,
                objective_marker: raw.objective_marker,
                objective_field: raw.objective_field,
                report_answer: raw.report_answer,
                status_mapping,
            };

            targets.insert(name.to_lowercase(), definition.clone());
            for alias in raw.aliases {
                targets.insert(alias.to_lowercase(), definition.clone());
            }
        }

        Ok(Self { targets })
    }

    /// Look up a target by name or alias
    pub fn get(&self, name: &str) -> Option<&TargetDefinition> {
        self.targets.get(&name.to_lowercase())
    }

    /// All names and aliases, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.keys().cloned().collect();
        names.sort();
        names
    }
}

fn into_tokens(template: &str) -> Vec<String> {
    template.split_whitespace().map(|s| s.to_string()).collect()
}

fn check_placeholders(tokens: &[String], allowed: &[&str]) -> anyhow::Result<()> {
    let allowed: HashSet<&str> = allowed.iter().copied().collect();
    for token in tokens {
        for caps in PLACEHOLDER.captures_iter(token) {
            let name = &caps[1];
            if !allowed.contains(name) {
                anyhow::bail!("unknown placeholder {{{}}} in {:?}", name, token);
            }
        }
    }
    Ok(())
}
