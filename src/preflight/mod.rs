//! Preflight checks for an install.
//!
//! Validates host tools, privileges, firmware and the target disk before any
//! destructive stage runs. Run with `arch-bootstrap preflight`.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::InstallConfig;
use crate::probe::HostProbe;

pub use environment::check_disk;
pub use types::{Check, CheckArea, PreflightReport, Verdict};

/// Run all preflight checks.
pub fn run_preflight(config: &InstallConfig, probe: &dyn HostProbe) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(config));

    println!("Checking host environment...");
    checks.extend(environment::check_environment(config, probe));

    println!();

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &InstallConfig, probe: &dyn HostProbe) -> Result<()> {
    let report = run_preflight(config, probe);
    report.print();

    let blockers = report.blockers().count();
    if blockers > 0 {
        bail!(
            "Preflight failed: {} blocker(s). Fix the issues above before installing.",
            blockers
        );
    }

    println!("Preflight passed.\n");
    Ok(())
}
