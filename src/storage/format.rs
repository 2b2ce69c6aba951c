//! Filesystem creation: FAT32 for EFI, swap, and btrfs or ext4 for root.

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

use tracing::{info, warn};

use super::mount::{mount_tree, MountSource, MountSpec, MountTree, MountedTree};
use crate::config::{LayoutConfig, RootFs};
use crate::disk::{DeviceHandle, PartitionedDisk};
use crate::error::{InstallError, Result};
use crate::process::{Cmd, CommandRunner};
use crate::target::TargetRoot;

/// `(subvolume, mountpoint)` pairs, parents first.
pub const BTRFS_SUBVOLUMES: &[(&str, &str)] = &[
    ("@", "/"),
    ("@home", "/home"),
    ("@var", "/var"),
    ("@snapshots", "/.snapshots"),
];

pub struct FilesystemManager<'a> {
    runner: &'a dyn CommandRunner,
    target: &'a TargetRoot,
}

impl<'a> FilesystemManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, target: &'a TargetRoot) -> Self {
        Self { runner, target }
    }

    /// Format every partition. Swap is formatted but not activated.
    pub fn format(
        &self,
        disk: &PartitionedDisk,
        root: &DeviceHandle,
        layout: &LayoutConfig,
    ) -> Result<()> {
        info!(device = %disk.efi, "formatting EFI partition as FAT32");
        self.runner.run(
            &Cmd::new("mkfs.fat")
                .args(["-F", "32", "-n", "EFI"])
                .arg_path(disk.efi.path()),
        )?;

        if let Some(swap) = &disk.swap {
            info!(device = %swap, "creating swap");
            self.runner
                .run(&Cmd::new("mkswap").args(["-L", "swap"]).arg_path(swap.path()))?;
        }

        info!(device = %root, fs = ?layout.root_fs, "formatting root filesystem");
        let mkfs = match layout.root_fs {
            RootFs::Btrfs => Cmd::new("mkfs.btrfs").args(["-f", "-L", "root"]),
            RootFs::Ext4 => Cmd::new("mkfs.ext4").args(["-F", "-L", "root"]),
        };
        self.runner.run(&mkfs.arg_path(root.path()))?;
        Ok(())
    }

    /// Turn on the swap partition, if the layout has one. Returns what was
    /// activated.
    pub fn activate_swap(&self, disk: &PartitionedDisk) -> Result<Option<DeviceHandle>> {
        let Some(swap) = &disk.swap else {
            return Ok(None);
        };
        self.runner.run(&Cmd::new("swapon").arg_path(swap.path()))?;
        Ok(Some(swap.clone()))
    }

    pub fn deactivate_swap(&self, swap: &DeviceHandle) -> Result<()> {
        self.runner
            .run(&Cmd::new("swapoff").arg_path(swap.path()))
            .map(|_| ())
    }

    /// Create the btrfs subvolumes from the filesystem's top level.
    ///
    /// The top level is mounted at the mount root only for the duration of
    /// this call.
    pub fn create_subvolumes(&self, root: &DeviceHandle) -> Result<()> {
        let top = MountTree::new(vec![MountSpec {
            source: MountSource::Device(root.clone()),
            target: PathBuf::from("/"),
            options: vec![],
        }])?;
        let mut mounted = mount_tree(&top, self.target, self.runner)?;

        for (name, _) in BTRFS_SUBVOLUMES {
            let path = self.target.path(name);
            let created = self.runner.run(
                &Cmd::new("btrfs")
                    .args(["subvolume", "create"])
                    .arg_path(&path),
            );
            if let Err(err) = created {
                warn!(subvolume = name, "subvolume creation failed, unmounting top level");
                for path in mounted.unwind(self.runner) {
                    warn!(path = %path.display(), "top level still mounted");
                }
                return Err(err);
            }
        }

        let left = mounted.unwind(self.runner);
        if !left.is_empty() {
            return Err(InstallError::PreconditionViolated(format!(
                "btrfs top level still mounted at {}",
                self.target.root().display()
            )));
        }
        Ok(())
    }

    /// Mount the full tree, unwinding on failure.
    pub fn mount(&self, tree: &MountTree) -> Result<MountedTree> {
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(self.target.root())
            .map_err(|e| InstallError::io(self.target.root(), e))?;
        mount_tree(tree, self.target, self.runner)
    }
}

/// Root (or `@` and its siblings), then the EFI partition at `/boot`.
pub fn build_tree(
    disk: &PartitionedDisk,
    root: &DeviceHandle,
    layout: &LayoutConfig,
) -> Result<MountTree> {
    let mut entries = Vec::new();
    match layout.root_fs {
        RootFs::Btrfs => {
            for (name, mountpoint) in BTRFS_SUBVOLUMES {
                entries.push(MountSpec {
                    source: MountSource::Subvolume {
                        device: root.clone(),
                        name: name.to_string(),
                    },
                    target: PathBuf::from(mountpoint),
                    options: layout.btrfs_options.clone(),
                });
            }
        }
        RootFs::Ext4 => entries.push(MountSpec {
            source: MountSource::Device(root.clone()),
            target: PathBuf::from("/"),
            options: vec![],
        }),
    }
    entries.push(MountSpec {
        source: MountSource::Device(disk.efi.clone()),
        target: PathBuf::from("/boot"),
        options: vec![],
    });
    MountTree::new(entries)
}
