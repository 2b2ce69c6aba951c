//! Install command - runs the pipeline against the configured disk.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use arch_bootstrap::journal::{self, Journal};
use arch_bootstrap::pipeline::{InstallOutcome, Pipeline};
use arch_bootstrap::preflight;
use arch_bootstrap::probe::SystemProbe;
use arch_bootstrap::process::SystemRunner;

/// Execute the install command.
pub fn cmd_install(
    config_path: &Path,
    confirm_wipe: bool,
    journal_path: Option<PathBuf>,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    config.print();
    println!();

    let probe = SystemProbe;
    preflight::run_preflight_or_fail(&config, &probe)?;

    let journal = Journal::new(journal_path.unwrap_or_else(journal::default_path));
    println!("Recording stage results to {}\n", journal.path().display());

    let runner = SystemRunner::new();
    let outcome = Pipeline::new(&config, &runner, &probe)
        .confirm_wipe(confirm_wipe)
        .journal(journal)
        .run();

    print_stages(&outcome);
    match outcome {
        InstallOutcome::Succeeded { warnings, .. } => {
            if warnings.is_empty() {
                println!("Installation complete.");
            } else {
                println!("Installation complete with {} warning(s):", warnings.len());
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }
            Ok(())
        }
        InstallOutcome::Failed { stage, cause, .. } => {
            bail!(
                "Installation failed during {}: {}\nEarlier stages were not rolled back; resume by hand from this stage.",
                stage,
                cause
            )
        }
    }
}

fn print_stages(outcome: &InstallOutcome) {
    println!("\n=== Stage Results ===\n");
    for result in outcome.results() {
        let icon = if result.success { "✓" } else { "✗" };
        println!(
            "  {} {} ({:.1}s)",
            icon,
            result.stage,
            result.elapsed_ms as f64 / 1000.0
        );
        for line in &result.diagnostics {
            println!("      {}", line);
        }
    }
    println!();
}
