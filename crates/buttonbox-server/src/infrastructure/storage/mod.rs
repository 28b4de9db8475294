//! Persistence: on-disk TOML configuration.

pub mod config;
