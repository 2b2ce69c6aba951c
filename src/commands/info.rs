//! Info command - prints a hardware report.

use anyhow::Result;
use arch_bootstrap::process::SystemRunner;
use arch_bootstrap::sysinfo;

/// Execute the info command.
pub fn cmd_info() -> Result<()> {
    let sections = sysinfo::collect(&SystemRunner::new());
    sysinfo::print(&sections);
    Ok(())
}
