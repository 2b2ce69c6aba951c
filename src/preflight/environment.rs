//! Host environment checks: privileges, firmware and the target disk.

use std::path::Path;

use crate::config::InstallConfig;
use crate::disk::Partitioner;
use crate::probe::HostProbe;
use crate::process::SystemRunner;

use super::types::{Check, CheckArea};

const EFIVARS: &str = "/sys/firmware/efi/efivars";

/// Check the host can run an install at all.
pub fn check_environment(config: &InstallConfig, probe: &dyn HostProbe) -> Vec<Check> {
    let mut results = Vec::new();

    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        results.push(Check::ready(CheckArea::Privileges, "running as root"));
    } else {
        results.push(Check::blocks(
            CheckArea::Privileges,
            "running as root",
            &format!("effective uid is {}; partitioning and mounting need root", euid),
        ));
    }

    if Path::new(EFIVARS).is_dir() {
        results.push(Check::ready(CheckArea::Firmware, "UEFI boot mode"));
    } else {
        results.push(Check::blocks(
            CheckArea::Firmware,
            "UEFI boot mode",
            "booted in BIOS mode; grub-install --target=x86_64-efi needs UEFI",
        ));
    }

    results.extend(check_disk(config, probe));
    results
}

/// The target disk must be an idle block device.
pub fn check_disk(config: &InstallConfig, probe: &dyn HostProbe) -> Vec<Check> {
    let disk = &config.disk;
    let name = format!("target disk {}", disk.display());
    let runner = SystemRunner::new();
    let partitioner = Partitioner::new(&runner, probe);

    // Existing partitions are reported separately; everything else must be idle.
    if let Err(err) = partitioner.check_idle(disk, true) {
        return vec![Check::blocks(CheckArea::TargetDisk, &name, &err.to_string())];
    }

    match probe.existing_partitions(disk) {
        Ok(existing) if existing.is_empty() => {
            vec![Check::found(CheckArea::TargetDisk, &name, "idle, no partitions")]
        }
        Ok(existing) => vec![Check::caution(
            CheckArea::TargetDisk,
            &name,
            &format!(
                "has {} partition(s) that will be destroyed; pass --confirm-wipe",
                existing.len()
            ),
        )],
        Err(err) => vec![Check::blocks(CheckArea::TargetDisk, &name, &err.to_string())],
    }
}
