//! Target algorithm wrapper for automated algorithm configuration.
//!
//! One invocation runs one configuration of a target algorithm on one
//! instance under resource limits and reports a single normalized result
//! line to the tuner.

pub mod artifacts;
pub mod builder;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod evaluation;
pub mod orchestrator;
pub mod parser;
pub mod supervisor;
pub mod targets;
