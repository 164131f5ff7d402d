//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML config from the platform config
//! directory (or an explicit path), fills in defaults for anything missing,
//! and converts it into the runtime settings of the controller, the status
//! responder and the launcher.

pub mod config;
