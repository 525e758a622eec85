//! Sentinel Configuration Module
//!
//! Per-deployment configuration loaded from TOML: threshold table, model
//! bindings, pipeline limits and the asset/sensor registry seed.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `SENTINEL_CONFIG` environment variable (path to TOML file)
//! 3. `sentinel.toml` in the current working directory
//! 4. Built-in defaults
//!
//! Every path ends in [`SentinelConfig::validate`]; the binary additionally
//! checks that each registered sensor type has threshold rules and a model.

mod sentinel_config;
pub mod defaults;
pub mod validation;

pub use sentinel_config::*;
