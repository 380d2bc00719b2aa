//! File-system storage: TOML configuration.

pub mod config;
