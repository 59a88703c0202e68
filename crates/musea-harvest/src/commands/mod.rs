//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod harvest;
pub mod reset;
pub mod status;
