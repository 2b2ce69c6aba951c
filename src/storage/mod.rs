//! Filesystem creation and the target mount tree.

pub mod format;
pub mod mount;

pub use format::{FilesystemManager, BTRFS_SUBVOLUMES};
pub use mount::{MountSource, MountSpec, MountTree, MountedTree};
