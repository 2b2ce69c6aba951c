//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `install` - Run the installation pipeline
//! - `plan` - Show what an install would do
//! - `preflight` - Run preflight checks
//! - `info` - Display system information

mod info;
mod install;
mod plan;
mod preflight;

use std::path::Path;

use anyhow::{Context, Result};
use arch_bootstrap::config::InstallConfig;

pub use info::cmd_info;
pub use install::cmd_install;
pub use plan::cmd_plan;
pub use preflight::cmd_preflight;

fn load_config(path: &Path) -> Result<InstallConfig> {
    InstallConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}
