//! Command-line interface for Lumen
//!
//! Every command loads the shared state file, does its work through the
//! library and saves the state back on success.

pub mod classify;
pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod output;
pub mod scan;
pub mod state;
pub mod status;

use std::path::PathBuf;

use lumen::LumenConfig;

/// Settings shared by every command.
#[derive(Debug)]
pub struct CliContext {
    pub config: LumenConfig,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
}
