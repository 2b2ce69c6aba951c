//! Partition plans derived from the install layout.

use std::fmt;

use serde::Serialize;

use crate::config::LayoutConfig;
use crate::error::{InstallError, Result};

/// First partition starts at 1 MiB for GPT + alignment.
pub const FIRST_PARTITION_MIB: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartitionRole {
    Efi,
    Swap,
    Root,
}

impl PartitionRole {
    /// GPT partition name passed to `parted mkpart`.
    pub fn label(self) -> &'static str {
        match self {
            PartitionRole::Efi => "EFI",
            PartitionRole::Swap => "SWAP",
            PartitionRole::Root => "ROOT",
        }
    }
}

/// A partition boundary as parted understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Boundary {
    MiB(u64),
    /// Percentage of the disk; only valid as the last partition's end.
    Percent(u8),
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::MiB(v) => write!(f, "{}MiB", v),
            Boundary::Percent(v) => write!(f, "{}%", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSpec {
    pub role: PartitionRole,
    /// parted filesystem type, e.g. `fat32`, `linux-swap`, `btrfs`.
    pub fs_kind: &'static str,
    pub start: Boundary,
    pub end: Boundary,
}

/// Ordered partitions; index `i` becomes partition number `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionPlan {
    specs: Vec<PartitionSpec>,
}

impl PartitionPlan {
    /// Build and validate a plan from explicit specs.
    pub fn new(specs: Vec<PartitionSpec>) -> Result<Self> {
        let plan = Self { specs };
        plan.validate()?;
        Ok(plan)
    }

    /// EFI, optional swap, then root filling the rest of the disk.
    pub fn from_layout(layout: &LayoutConfig) -> Result<Self> {
        let efi_end = FIRST_PARTITION_MIB + layout.efi_mib;
        let mut specs = vec![PartitionSpec {
            role: PartitionRole::Efi,
            fs_kind: "fat32",
            start: Boundary::MiB(FIRST_PARTITION_MIB),
            end: Boundary::MiB(efi_end),
        }];

        let mut root_start = efi_end;
        if layout.swap_mib > 0 {
            let swap_end = efi_end + layout.swap_mib;
            specs.push(PartitionSpec {
                role: PartitionRole::Swap,
                fs_kind: "linux-swap",
                start: Boundary::MiB(efi_end),
                end: Boundary::MiB(swap_end),
            });
            root_start = swap_end;
        }

        specs.push(PartitionSpec {
            role: PartitionRole::Root,
            fs_kind: layout.root_fs.parted_name(),
            start: Boundary::MiB(root_start),
            end: Boundary::Percent(100),
        });

        Self::new(specs)
    }

    pub fn specs(&self) -> &[PartitionSpec] {
        &self.specs
    }

    /// 1-based partition number of the first partition with `role`.
    pub fn index_of(&self, role: PartitionRole) -> Option<u32> {
        self.specs
            .iter()
            .position(|s| s.role == role)
            .map(|i| i as u32 + 1)
    }

    /// Offsets strictly increasing, exactly one EFI and one ROOT, at most one swap.
    pub fn validate(&self) -> Result<()> {
        let count = |role| self.specs.iter().filter(|s| s.role == role).count();
        if count(PartitionRole::Efi) != 1 {
            return Err(InstallError::InvalidPlan("exactly one EFI partition required".into()));
        }
        if count(PartitionRole::Root) != 1 {
            return Err(InstallError::InvalidPlan("exactly one ROOT partition required".into()));
        }
        if count(PartitionRole::Swap) > 1 {
            return Err(InstallError::InvalidPlan("at most one swap partition allowed".into()));
        }

        let last = self.specs.len() - 1;
        let mut previous_end = 0u64;
        for (i, spec) in self.specs.iter().enumerate() {
            let Boundary::MiB(start) = spec.start else {
                return Err(InstallError::InvalidPlan(format!(
                    "{} must start at an absolute offset",
                    spec.role.label()
                )));
            };
            if start < previous_end || (i > 0 && start == 0) {
                return Err(InstallError::InvalidPlan(format!(
                    "{} starts at {}MiB, overlapping the previous partition ending at {}MiB",
                    spec.role.label(),
                    start,
                    previous_end
                )));
            }
            match spec.end {
                Boundary::MiB(end) if end > start => previous_end = end,
                Boundary::MiB(end) => {
                    return Err(InstallError::InvalidPlan(format!(
                        "{} ends at {}MiB, not after its start {}MiB",
                        spec.role.label(),
                        end,
                        start
                    )))
                }
                Boundary::Percent(p) if i == last && p > 0 && p <= 100 => {}
                Boundary::Percent(_) => {
                    return Err(InstallError::InvalidPlan(format!(
                        "{}: a percentage end (1-100) is only allowed on the last partition",
                        spec.role.label()
                    )))
                }
            }
        }
        Ok(())
    }
}
