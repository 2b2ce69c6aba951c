//! arch-bootstrap - installs Arch Linux onto a bare disk.
//!
//! Partitions, encrypts, formats and mounts the target disk, installs the
//! base system, configures it and installs GRUB, in that order, stopping at
//! the first fatal failure.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "arch-bootstrap")]
#[command(about = "Bootstrap an Arch Linux install onto a bare disk")]
#[command(
    after_help = "QUICK START:\n  arch-bootstrap info                       Inspect the hardware\n  arch-bootstrap plan -c install.toml       Show what will happen\n  arch-bootstrap preflight -c install.toml  Check the host\n  arch-bootstrap install -c install.toml    Install (destroys the disk)"
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full installation pipeline
    Install {
        /// Install configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Allow overwriting a disk that already has partitions
        #[arg(long)]
        confirm_wipe: bool,

        /// Stage result journal (default: state dir)
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Print partition commands and the mount tree without running anything
    Plan {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run preflight checks (tools, privileges, target disk)
    Preflight {
        #[arg(short, long)]
        config: PathBuf,

        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show CPU, GPU, memory, boot mode and block devices
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    arch_bootstrap::logging::init(cli.verbose);

    match cli.command {
        Commands::Install {
            config,
            confirm_wipe,
            journal,
        } => {
            commands::cmd_install(&config, confirm_wipe, journal)?;
        }

        Commands::Plan { config } => {
            commands::cmd_plan(&config)?;
        }

        Commands::Preflight { config, strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Info => {
            commands::cmd_info()?;
        }
    }

    Ok(())
}
