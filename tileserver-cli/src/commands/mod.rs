//! CLI commands.

pub mod maps;
pub mod start;
