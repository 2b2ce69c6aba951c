//! Host tool availability checks.

use crate::config::{InstallConfig, RootFs};
use crate::process;

use super::types::{Check, CheckArea};

/// `(tool, package, purpose)` needed on every install.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("parted", "parted", "Required to partition the disk"),
    ("mkfs.fat", "dosfstools", "Required for EFI partition"),
    ("mkswap", "util-linux", "Required for the swap partition"),
    ("mount", "util-linux", "Required to assemble the target"),
    ("blkid", "util-linux", "Required to find partition UUIDs"),
    ("pacstrap", "arch-install-scripts", "Required for the base install"),
    ("genfstab", "arch-install-scripts", "Required to write /etc/fstab"),
];

/// Check host tools are installed. Tools run inside the target are not
/// checked here; pacstrap provides them.
pub fn check_host_tools(config: &InstallConfig) -> Vec<Check> {
    let mut results: Vec<Check> = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool(tool, package, purpose))
        .collect();

    results.push(check_tool(
        &config.pipeline.chroot_program,
        "arch-install-scripts",
        "Required to configure the target",
    ));

    if config.layout.encrypt {
        results.push(check_tool("cryptsetup", "cryptsetup", "Required for the encrypted root"));
    }

    match config.layout.root_fs {
        RootFs::Btrfs => {
            results.push(check_tool(
                "mkfs.btrfs",
                "btrfs-progs",
                "Required for the root filesystem",
            ));
            results.push(check_tool("btrfs", "btrfs-progs", "Required to create subvolumes"));
        }
        RootFs::Ext4 => {
            results.push(check_tool("mkfs.ext4", "e2fsprogs", "Required for the root filesystem"));
        }
    }

    results
}

/// A missing host tool always blocks: the stage that needs it is fatal.
fn check_tool(tool: &str, package: &str, purpose: &str) -> Check {
    match process::which(tool) {
        Some(path) => Check::found(CheckArea::HostTool, tool, &path),
        None => Check::blocks(
            CheckArea::HostTool,
            tool,
            &format!("Not found. Install '{}' package. {}", package, purpose),
        ),
    }
}
