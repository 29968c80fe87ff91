//! Positional run inputs: `<instance> <specifics> <cutoff> <runlength> <seed> [<name> <value>]...`

use std::collections::BTreeMap;

use crate::error::WrapperError;

/// Number of fixed positional tokens before the parameter tail
pub const FIXED_ARGS: usize = 5;

/// Per-run metadata supplied by the tuner
#[derive(Debug, Clone, PartialEq)]
pub struct RunArguments {
    pub instance: String,
    /// Opaque instance-specific data
    pub specifics: String,
    /// Seconds
    pub cutoff: f64,
    /// -1 means unlimited
    pub runlength: i64,
    pub seed: i64,
}

impl RunArguments {
    /// Whole seconds handed to the resource limiter, which rounds down
    pub fn limiter_cutoff_secs(&self) -> u64 {
        (self.cutoff.floor() as u64).saturating_add(1)
    }
}

/// Parameter assignment proposed by the tuner, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration(BTreeMap<String, String>);

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Build from a flat `name value name value ...` list
    pub fn from_pairs(tokens: &[String]) -> Result<Self, WrapperError> {
        if tokens.len() % 2 != 0 {
            return Err(WrapperError::Validation(format!(
                "target algorithm parameter list MUST have even length - found {} arguments.",
                tokens.len()
            )));
        }
        let mut config = Self::new();
        for pair in tokens.chunks_exact(2) {
            config.insert(pair[0].as_str(), pair[1].as_str());
        }
        Ok(config)
    }
}

/// Split the positional tail into run arguments and configuration
pub fn parse_target_args(tokens: &[String]) -> Result<(RunArguments, Configuration), WrapperError> {
    if tokens.len() < FIXED_ARGS {
        return Err(WrapperError::Validation(format!(
            "some required TA parameters (instance, specifics, cutoff, runlength, seed) missing - was [{}].",
            tokens.join(" ")
        )));
    }

    let cutoff: f64 = parse_number(&tokens[2], "cutoff")?;
    if !cutoff.is_finite() || cutoff < 0.0 {
        return Err(WrapperError::Validation(format!(
            "cutoff must be a non-negative number of seconds - was {}.",
            tokens[2]
        )));
    }

    let run = RunArguments {
        instance: tokens[0].clone(),
        specifics: tokens[1].clone(),
        cutoff,
        runlength: parse_number(&tokens[3], "runlength")?,
        seed: parse_number(&tokens[4], "seed")?,
    };
    let config = Configuration::from_pairs(&tokens[FIXED_ARGS..])?;

    Ok((run, config))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, WrapperError> {
    value.trim().parse().map_err(|_| {
        WrapperError::Validation(format!("invalid {} value - was {:?}.", what, value))
    })
}
