//! Read-only queries about the host's block devices and mounts.

use std::fs::{self, File};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::disk::naming::is_partition_of;
use crate::error::{InstallError, Result};

/// One line of `/proc/self/mountinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
}

/// Snapshot of the host's mounts.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    pub entries: Vec<MountEntry>,
}

impl MountTable {
    /// Parse `/proc/self/mountinfo` content.
    pub fn parse_mountinfo(input: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for line in input.lines().filter(|l| !l.trim().is_empty()) {
            let invalid =
                || InstallError::PreconditionViolated(format!("invalid mountinfo line: {line}"));
            let (left, right) = line.split_once(" - ").ok_or_else(invalid)?;
            let target = left.split_whitespace().nth(4).ok_or_else(invalid)?;
            let mut right = right.split_whitespace();
            let fs_type = right.next().ok_or_else(invalid)?;
            let source = right.next().ok_or_else(invalid)?;
            entries.push(MountEntry {
                source: unescape_octal(source),
                target: PathBuf::from(unescape_octal(target)),
                fs_type: fs_type.to_string(),
            });
        }
        Ok(Self { entries })
    }

    /// Mount targets whose source is `disk` or one of its partitions.
    pub fn mounts_of_disk(&self, disk: &Path) -> Vec<&MountEntry> {
        self.entries
            .iter()
            .filter(|e| {
                let source = Path::new(&e.source);
                source == disk || is_partition_of(disk, source)
            })
            .collect()
    }

    pub fn is_mountpoint(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.target == path)
    }
}

/// mountinfo escapes space, tab, newline and backslash as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `/proc/swaps` into the active swap device paths.
pub fn parse_swaps(input: &str) -> Vec<PathBuf> {
    input
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(PathBuf::from)
        .collect()
}

/// Exclusive advisory lock on a device node, released on drop.
#[derive(Debug)]
pub struct DeviceLock {
    _file: Option<File>,
    pub path: PathBuf,
}

impl DeviceLock {
    /// A lock that holds nothing, for probes that do not touch real devices.
    pub fn unlocked(path: &Path) -> Self {
        Self {
            _file: None,
            path: path.to_path_buf(),
        }
    }
}

/// Questions the pipeline asks the host before touching a disk.
pub trait HostProbe {
    fn is_block_device(&self, path: &Path) -> bool;
    fn mount_table(&self) -> Result<MountTable>;
    fn active_swaps(&self) -> Result<Vec<PathBuf>>;
    /// Partitions present on `disk` right now.
    fn existing_partitions(&self, disk: &Path) -> Result<Vec<PathBuf>>;
    /// Device-mapper or md devices stacked on `disk` or its partitions.
    fn holders(&self, disk: &Path) -> Result<Vec<String>>;
    fn lock_device(&self, disk: &Path) -> Result<DeviceLock>;
    /// Block until `path` exists, or fail after `limit`.
    fn wait_for_device(&self, path: &Path, limit: Duration) -> Result<()>;
}

/// Probe backed by `/proc` and `/sys`.
#[derive(Debug, Default)]
pub struct SystemProbe;

impl SystemProbe {
    fn sys_block_dir(disk: &Path) -> Result<PathBuf> {
        let name = disk
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                let msg = format!("{} is not a device path", disk.display());
                InstallError::PreconditionViolated(msg)
            })?;
        Ok(Path::new("/sys/class/block").join(name))
    }
}

impl HostProbe for SystemProbe {
    fn is_block_device(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.file_type().is_block_device())
            .unwrap_or(false)
    }

    fn mount_table(&self) -> Result<MountTable> {
        let path = Path::new("/proc/self/mountinfo");
        let content = fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
        MountTable::parse_mountinfo(&content)
    }

    fn active_swaps(&self) -> Result<Vec<PathBuf>> {
        let path = Path::new("/proc/swaps");
        let content = fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
        Ok(parse_swaps(&content))
    }

    fn existing_partitions(&self, disk: &Path) -> Result<Vec<PathBuf>> {
        let dir = Self::sys_block_dir(disk)?;
        let mut partitions = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| InstallError::io(&dir, e))?;
        for entry in entries.flatten() {
            if entry.path().join("partition").exists() {
                partitions.push(Path::new("/dev").join(entry.file_name()));
            }
        }
        partitions.sort();
        Ok(partitions)
    }

    fn holders(&self, disk: &Path) -> Result<Vec<String>> {
        let dir = Self::sys_block_dir(disk)?;
        let mut holders = Vec::new();
        let mut scan = vec![dir.join("holders")];
        for partition in self.existing_partitions(disk)? {
            if let Ok(part_dir) = Self::sys_block_dir(&partition) {
                scan.push(part_dir.join("holders"));
            }
        }
        for holder_dir in scan {
            if let Ok(entries) = fs::read_dir(&holder_dir) {
                holders.extend(
                    entries
                        .flatten()
                        .map(|e| e.file_name().to_string_lossy().into_owned()),
                );
            }
        }
        Ok(holders)
    }

    fn lock_device(&self, disk: &Path) -> Result<DeviceLock> {
        let file = File::open(disk).map_err(|e| InstallError::io(disk, e))?;
        if file.try_lock_exclusive().is_err() {
            return Err(InstallError::PreconditionViolated(format!(
                "{} is locked by another process",
                disk.display()
            )));
        }
        debug!(disk = %disk.display(), "acquired exclusive device lock");
        Ok(DeviceLock {
            _file: Some(file),
            path: disk.to_path_buf(),
        })
    }

    fn wait_for_device(&self, path: &Path, limit: Duration) -> Result<()> {
        let start = Instant::now();
        while !path.exists() {
            if start.elapsed() >= limit {
                return Err(InstallError::PreconditionViolated(format!(
                    "device path {} unresolved after {}s",
                    path.display(),
                    limit.as_secs()
                )));
            }
            thread::sleep(Duration::from_millis(200));
        }
        Ok(())
    }
}
