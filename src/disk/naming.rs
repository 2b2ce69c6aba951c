//! Device naming strategy.
//!
//! Kernel naming differs by driver: `sda` → `sda1`, but `nvme0n1` → `nvme0n1p1`
//! and `mmcblk0` → `mmcblk0p1`. The kernel inserts `p` whenever the disk name
//! ends in a digit.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// A resolved block device path. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceHandle(PathBuf);

impl DeviceHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceNaming {
    /// SATA/SCSI/virtio: the index is appended directly (`sda3`).
    Suffix,
    /// NVMe, MMC, loop, nbd: `p` then the index (`nvme0n1p3`).
    PSuffix,
}

impl DeviceNaming {
    pub fn detect(disk: &Path) -> Self {
        let ends_in_digit = disk
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.chars().last())
            .is_some_and(|c| c.is_ascii_digit());
        if ends_in_digit {
            DeviceNaming::PSuffix
        } else {
            DeviceNaming::Suffix
        }
    }

    fn separator(self) -> &'static str {
        match self {
            DeviceNaming::Suffix => "",
            DeviceNaming::PSuffix => "p",
        }
    }
}

/// Path of partition number `index` (1-based) on `disk`.
pub fn partition_path(disk: &Path, index: u32) -> DeviceHandle {
    let naming = DeviceNaming::detect(disk);
    let mut name = disk.as_os_str().to_os_string();
    name.push(format!("{}{}", naming.separator(), index));
    DeviceHandle(PathBuf::from(name))
}

/// Whether `candidate` names a partition of `disk`.
pub fn is_partition_of(disk: &Path, candidate: &Path) -> bool {
    let (Some(disk), Some(candidate)) = (disk.to_str(), candidate.to_str()) else {
        return false;
    };
    let Some(rest) = candidate.strip_prefix(disk) else {
        return false;
    };
    let digits = match DeviceNaming::detect(Path::new(disk)) {
        DeviceNaming::Suffix => rest,
        DeviceNaming::PSuffix => match rest.strip_prefix('p') {
            Some(digits) => digits,
            None => return false,
        },
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
