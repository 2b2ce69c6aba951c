//! Plan command - shows partitioning and mounting without touching the disk.

use std::path::Path;

use anyhow::Result;
use arch_bootstrap::config::RootFs;
use arch_bootstrap::disk::{DeviceHandle, PartitionPlan, PartitionedDisk, Partitioner};
use arch_bootstrap::storage::format::build_tree;
use arch_bootstrap::storage::BTRFS_SUBVOLUMES;
use arch_bootstrap::target::TargetRoot;

/// Execute the plan command.
pub fn cmd_plan(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    config.print();

    let plan = PartitionPlan::from_layout(&config.layout)?;
    println!("\nPartition commands:");
    for cmd in Partitioner::commands(&config.disk, &plan) {
        println!("  {}", cmd);
    }

    let disk = PartitionedDisk::resolve(&config.disk, &plan)?;
    let root = if config.layout.encrypt {
        println!("\nEncrypted root: {} -> {}", disk.root, config.mapper_path().display());
        DeviceHandle::new(config.mapper_path())
    } else {
        disk.root.clone()
    };

    if config.layout.root_fs == RootFs::Btrfs {
        let names: Vec<&str> = BTRFS_SUBVOLUMES.iter().map(|(name, _)| *name).collect();
        println!("\nSubvolumes: {}", names.join(" "));
    }

    let target = TargetRoot::new(&config.pipeline.mount_root, &config.pipeline.chroot_program);
    println!("\nMount tree:");
    for spec in build_tree(&disk, &root, &config.layout)?.entries() {
        println!("  {}", spec.mount_command(&target));
    }
    Ok(())
}
