//! Preflight command - runs preflight checks.

use std::path::Path;

use anyhow::Result;
use arch_bootstrap::preflight;
use arch_bootstrap::probe::SystemProbe;

/// Execute the preflight command.
pub fn cmd_preflight(config_path: &Path, strict: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    if strict {
        preflight::run_preflight_or_fail(&config, &SystemProbe)?;
    } else {
        let report = preflight::run_preflight(&config, &SystemProbe);
        report.print();
        if !report.can_install() {
            println!("The install would not start. Use --strict to fail with a non-zero exit code.");
        }
    }
    Ok(())
}
