//! GPT partitioning of the target disk with parted.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::naming::{is_partition_of, partition_path, DeviceHandle};
use super::plan::{PartitionPlan, PartitionRole};
use crate::error::{InstallError, Result};
use crate::probe::HostProbe;
use crate::process::{Cmd, CommandRunner};

/// Partition device paths produced by a successful partitioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionedDisk {
    pub disk: PathBuf,
    pub efi: DeviceHandle,
    pub swap: Option<DeviceHandle>,
    pub root: DeviceHandle,
}

impl PartitionedDisk {
    /// Resolve partition paths for `plan` on `disk` without touching it.
    pub fn resolve(disk: &Path, plan: &PartitionPlan) -> Result<Self> {
        let handle = |role: PartitionRole| plan.index_of(role).map(|i| partition_path(disk, i));
        let missing = |role: PartitionRole| {
            InstallError::InvalidPlan(format!("plan has no {} partition", role.label()))
        };
        Ok(Self {
            disk: disk.to_path_buf(),
            efi: handle(PartitionRole::Efi).ok_or_else(|| missing(PartitionRole::Efi))?,
            swap: handle(PartitionRole::Swap),
            root: handle(PartitionRole::Root).ok_or_else(|| missing(PartitionRole::Root))?,
        })
    }

    pub fn all(&self) -> impl Iterator<Item = &DeviceHandle> {
        std::iter::once(&self.efi)
            .chain(self.swap.as_ref())
            .chain(std::iter::once(&self.root))
    }
}

/// Writes a fresh GPT partition table.
pub struct Partitioner<'a> {
    runner: &'a dyn CommandRunner,
    probe: &'a dyn HostProbe,
}

impl<'a> Partitioner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, probe: &'a dyn HostProbe) -> Self {
        Self { runner, probe }
    }

    /// The parted invocations for `plan`, in execution order.
    pub fn commands(disk: &Path, plan: &PartitionPlan) -> Vec<Cmd> {
        let parted = || Cmd::new("parted").arg("--script").arg_path(disk);
        let mut cmds = vec![parted().args(["mklabel", "gpt"])];
        for (i, spec) in plan.specs().iter().enumerate() {
            cmds.push(parted().args([
                "mkpart".to_string(),
                spec.role.label().to_string(),
                spec.fs_kind.to_string(),
                spec.start.to_string(),
                spec.end.to_string(),
            ]));
            if spec.role == PartitionRole::Efi {
                let number = (i + 1).to_string();
                cmds.push(parted().args(["set", number.as_str(), "esp", "on"]));
            }
        }
        cmds
    }

    /// Verify nothing on the host is using `disk`.
    ///
    /// A disk that already carries partitions is refused unless the caller
    /// confirmed wiping it.
    pub fn check_idle(&self, disk: &Path, wipe_confirmed: bool) -> Result<()> {
        if !self.probe.is_block_device(disk) {
            return Err(InstallError::PreconditionViolated(format!(
                "{} is not a block device",
                disk.display()
            )));
        }

        let table = self.probe.mount_table()?;
        let mounted: Vec<String> = table
            .mounts_of_disk(disk)
            .iter()
            .map(|m| format!("{} on {}", m.source, m.target.display()))
            .collect();
        if !mounted.is_empty() {
            return Err(InstallError::PreconditionViolated(format!(
                "{} is mounted: {}",
                disk.display(),
                mounted.join(", ")
            )));
        }

        let swaps: Vec<String> = self
            .probe
            .active_swaps()?
            .into_iter()
            .filter(|s| s == disk || is_partition_of(disk, s))
            .map(|s| s.display().to_string())
            .collect();
        if !swaps.is_empty() {
            return Err(InstallError::PreconditionViolated(format!(
                "{} has active swap: {}",
                disk.display(),
                swaps.join(", ")
            )));
        }

        let holders = self.probe.holders(disk)?;
        if !holders.is_empty() {
            return Err(InstallError::PreconditionViolated(format!(
                "{} is held by {}",
                disk.display(),
                holders.join(", ")
            )));
        }

        let existing = self.probe.existing_partitions(disk)?;
        if !existing.is_empty() {
            if !wipe_confirmed {
                return Err(InstallError::PreconditionViolated(format!(
                    "{} already has {} partition(s); refusing to overwrite without confirmation",
                    disk.display(),
                    existing.len()
                )));
            }
            warn!(
                disk = %disk.display(),
                partitions = existing.len(),
                "overwriting existing partition table"
            );
        }

        Ok(())
    }

    /// Check the disk is idle, then write the partition table.
    ///
    /// Any failure after the first command leaves a partial table behind;
    /// this is never retried.
    pub fn partition(
        &self,
        disk: &Path,
        plan: &PartitionPlan,
        wipe_confirmed: bool,
    ) -> Result<PartitionedDisk> {
        plan.validate()?;
        self.check_idle(disk, wipe_confirmed)?;

        info!(
            disk = %disk.display(),
            partitions = plan.specs().len(),
            "writing GPT partition table"
        );
        for cmd in Self::commands(disk, plan) {
            self.runner.run(&cmd)?;
        }

        PartitionedDisk::resolve(disk, plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;

    #[test]
    fn test_resolve_nvme() {
        let plan = PartitionPlan::from_layout(&LayoutConfig::default()).unwrap();
        let disk = PartitionedDisk::resolve(Path::new("/dev/nvme0n1"), &plan).unwrap();
        assert_eq!(disk.efi.path(), Path::new("/dev/nvme0n1p1"));
        assert_eq!(disk.swap.unwrap().path(), Path::new("/dev/nvme0n1p2"));
        assert_eq!(disk.root.path(), Path::new("/dev/nvme0n1p3"));
    }

    #[test]
    fn test_commands_without_swap() {
        let layout = LayoutConfig {
            swap_mib: 0,
            ..LayoutConfig::default()
        };
        let plan = PartitionPlan::from_layout(&layout).unwrap();
        let cmds = Partitioner::commands(Path::new("/dev/sda"), &plan);
        let rendered: Vec<String> = cmds.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "parted --script /dev/sda mklabel gpt",
                "parted --script /dev/sda mkpart EFI fat32 1MiB 513MiB",
                "parted --script /dev/sda set 1 esp on",
                "parted --script /dev/sda mkpart ROOT btrfs 513MiB 100%",
            ]
        );
    }
}
