//! Read-only hardware report for the operator.

use std::path::Path;

use crate::process::{Cmd, CommandRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Uefi,
    Bios,
}

impl BootMode {
    pub fn detect() -> Self {
        if Path::new("/sys/firmware/efi").is_dir() {
            BootMode::Uefi
        } else {
            BootMode::Bios
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BootMode::Uefi => "UEFI",
            BootMode::Bios => "BIOS",
        }
    }
}

/// One titled section of the report.
#[derive(Debug, Clone)]
pub struct InfoSection {
    pub title: &'static str,
    pub body: String,
}

/// Display controller lines from `lspci` output, each with the two lines
/// that follow it, like `grep -A2 VGA`.
pub fn filter_gpus(lspci: &str) -> String {
    let lines: Vec<&str> = lspci.lines().collect();
    let mut keep = vec![false; lines.len()];
    for (i, line) in lines.iter().enumerate() {
        let display = ["VGA", "3D controller", "Display controller"];
        if display.iter().any(|kind| line.contains(kind)) {
            for flag in keep.iter_mut().skip(i).take(3) {
                *flag = true;
            }
        }
    }
    lines
        .iter()
        .zip(keep)
        .filter_map(|(line, kept)| kept.then_some(*line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn capture(runner: &dyn CommandRunner, cmd: Cmd) -> String {
    let program = cmd.program().to_string();
    match runner.run(&cmd) {
        Ok(result) => result.stdout_trimmed().to_string(),
        Err(err) => format!("Error running {}: {}", program, err),
    }
}

/// Gather every section. Failures show up as text in the section.
pub fn collect(runner: &dyn CommandRunner) -> Vec<InfoSection> {
    let gpu = match runner.run(&Cmd::new("lspci")) {
        Ok(result) => {
            let gpus = filter_gpus(&result.stdout);
            if gpus.is_empty() {
                "No display controller found".to_string()
            } else {
                gpus
            }
        }
        Err(err) => format!("Error running lspci: {}", err),
    };

    vec![
        InfoSection {
            title: "CPU Info",
            body: capture(runner, Cmd::new("lscpu")),
        },
        InfoSection {
            title: "GPU Info",
            body: gpu,
        },
        InfoSection {
            title: "RAM Info",
            body: capture(runner, Cmd::new("free").arg("-h")),
        },
        InfoSection {
            title: "Boot Mode",
            body: BootMode::detect().as_str().to_string(),
        },
        InfoSection {
            title: "Block Devices",
            body: capture(
                runner,
                Cmd::new("lsblk").args(["-o", "NAME,FSTYPE,SIZE,TYPE,MOUNTPOINT"]),
            ),
        },
    ]
}

/// Print the report to stdout.
pub fn print(sections: &[InfoSection]) {
    println!("=== System Information ===\n");
    for section in sections {
        println!("[{}]", section.title);
        println!("{}", section.body);
        println!("{}", "-".repeat(40));
    }
}
