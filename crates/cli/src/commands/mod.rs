//! Subcommand implementations

pub mod jobs;
pub mod kubes;
pub mod nodes;
