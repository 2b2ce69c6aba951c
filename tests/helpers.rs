//! Shared test utilities for arch-bootstrap tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arch_bootstrap::config::{InstallConfig, Secret};
use arch_bootstrap::error::{InstallError, Result};
use arch_bootstrap::probe::{DeviceLock, HostProbe, MountEntry, MountTable};
use arch_bootstrap::process::{Cmd, CommandResult, CommandRunner};
use arch_bootstrap::target::TargetRoot;
use tempfile::TempDir;

pub const STOCK_MKINITCPIO: &str = "MODULES=()\nBINARIES=()\nFILES=()\nHOOKS=(base udev autodetect microcode modconf kms keyboard keymap consolefont block filesystems fsck)\n";
pub const STOCK_GRUB_DEFAULTS: &str = "GRUB_DEFAULT=0\nGRUB_TIMEOUT=5\nGRUB_CMDLINE_LINUX_DEFAULT=\"loglevel=3 quiet\"\nGRUB_CMDLINE_LINUX=\"\"\n";
pub const LUKS_UUID: &str = "0b1c2d3e-4f50-6172-8394-a5b6c7d8e9f0";

type Responder = Box<dyn Fn(&Cmd) -> CommandResult>;

/// Records every command and answers from pattern rules.
///
/// A rule matches when the rendered command line contains its pattern. The
/// first matching rule answers; unmatched commands succeed with no output.
#[derive(Default)]
pub struct RecordingRunner {
    rules: Vec<(String, Responder)>,
    log: RefCell<Vec<Cmd>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer matching commands with `f`.
    pub fn on(mut self, pattern: &str, f: impl Fn(&Cmd) -> CommandResult + 'static) -> Self {
        self.rules.push((pattern.to_string(), Box::new(f)));
        self
    }

    /// Matching commands exit 1.
    pub fn fail_on(self, pattern: &str) -> Self {
        let stderr = format!("{pattern}: simulated failure");
        self.on(pattern, move |_| CommandResult::failed(1, stderr.clone()))
    }

    /// Matching commands exit 0 printing `stdout`.
    pub fn respond(self, pattern: &str, stdout: &str) -> Self {
        let stdout = stdout.to_string();
        self.on(pattern, move |_| CommandResult::ok(stdout.clone()))
    }

    /// Every command line run so far.
    pub fn lines(&self) -> Vec<String> {
        self.log.borrow().iter().map(|c| c.to_string()).collect()
    }

    pub fn commands(&self) -> Vec<Cmd> {
        self.log.borrow().clone()
    }

    /// Index of the first command line containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.lines().iter().position(|l| l.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(pattern)).count()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }
}

impl CommandRunner for RecordingRunner {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        self.log.borrow_mut().push(cmd.clone());
        let line = cmd.to_string();
        let result = self
            .rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, respond)| respond(cmd))
            .unwrap_or_else(|| CommandResult::ok(""));
        Ok(result)
    }
}

/// Host probe with a scripted view of one disk.
#[derive(Debug, Clone)]
pub struct FakeProbe {
    pub block_device: bool,
    pub mounts: Vec<MountEntry>,
    pub swaps: Vec<PathBuf>,
    pub partitions: Vec<PathBuf>,
    pub holders: Vec<String>,
    /// Device nodes that never appear.
    pub missing_nodes: Vec<PathBuf>,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            block_device: true,
            mounts: Vec::new(),
            swaps: Vec::new(),
            partitions: Vec::new(),
            holders: Vec::new(),
            missing_nodes: Vec::new(),
        }
    }
}

impl FakeProbe {
    /// A disk with one partition mounted at `target`.
    pub fn with_mount(source: &str, target: &str) -> Self {
        Self {
            mounts: vec![MountEntry {
                source: source.to_string(),
                target: PathBuf::from(target),
                fs_type: "ext4".to_string(),
            }],
            ..Self::default()
        }
    }
}

impl HostProbe for FakeProbe {
    fn is_block_device(&self, _path: &Path) -> bool {
        self.block_device
    }

    fn mount_table(&self) -> Result<MountTable> {
        Ok(MountTable {
            entries: self.mounts.clone(),
        })
    }

    fn active_swaps(&self) -> Result<Vec<PathBuf>> {
        Ok(self.swaps.clone())
    }

    fn existing_partitions(&self, _disk: &Path) -> Result<Vec<PathBuf>> {
        Ok(self.partitions.clone())
    }

    fn holders(&self, _disk: &Path) -> Result<Vec<String>> {
        Ok(self.holders.clone())
    }

    fn lock_device(&self, disk: &Path) -> Result<DeviceLock> {
        Ok(DeviceLock::unlocked(disk))
    }

    fn wait_for_device(&self, path: &Path, _limit: Duration) -> Result<()> {
        if self.missing_nodes.iter().any(|p| p == path) {
            return Err(InstallError::PreconditionViolated(format!(
                "device path {} unresolved",
                path.display()
            )));
        }
        Ok(())
    }
}

/// A temporary directory standing in for the target mount root.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub mount_root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mount_root = temp_dir.path().join("mnt");
        Self {
            _temp_dir: temp_dir,
            mount_root,
        }
    }

    pub fn target(&self) -> TargetRoot {
        TargetRoot::new(&self.mount_root, "arch-chroot")
    }

    /// Host path of `inner` under the mount root.
    pub fn path(&self, inner: &str) -> PathBuf {
        self.target().path(inner)
    }

    pub fn read(&self, inner: &str) -> String {
        fs::read_to_string(self.path(inner)).unwrap_or_else(|e| panic!("read {inner}: {e}"))
    }

    pub fn write(&self, inner: &str, content: &str) {
        let path = self.path(inner);
        fs::create_dir_all(path.parent().expect("parent")).expect("Failed to create parent");
        fs::write(&path, content).expect("Failed to write file");
    }

    /// Files the base install would normally provide.
    pub fn seed_base_system(&self, timezone: &str) {
        self.write(&format!("/usr/share/zoneinfo/{timezone}"), "TZif2");
        self.write("/etc/mkinitcpio.conf", STOCK_MKINITCPIO);
        self.write("/etc/default/grub", STOCK_GRUB_DEFAULTS);
    }

    /// Default config pointed at this environment, with credentials set.
    pub fn config(&self) -> InstallConfig {
        let mut config = InstallConfig::default();
        config.pipeline.mount_root = self.mount_root.clone();
        config.pipeline.settle_timeout_secs = 1;
        config.credentials.luks_passphrase = Secret::new("correct horse");
        config.credentials.root_password = Secret::new("r00t");
        config
    }
}

/// A runner that answers the commands a full install reads output from.
pub fn install_runner() -> RecordingRunner {
    RecordingRunner::new()
        .respond("genfstab", "# /dev/mapper/cryptroot\nUUID=aaaa / btrfs rw,noatime,subvol=/@ 0 0\n")
        .respond("blkid", &format!("{LUKS_UUID}\n"))
}
