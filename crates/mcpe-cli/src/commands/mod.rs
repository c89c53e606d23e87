//! CLI subcommand implementations.

pub mod attach;
pub mod control;
pub mod exec;
