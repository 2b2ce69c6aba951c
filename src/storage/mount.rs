//! Mount tree construction, mounting and unwinding.

use std::collections::HashSet;
use std::fmt;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::disk::DeviceHandle;
use crate::error::{InstallError, Result};
use crate::process::{Cmd, CommandRunner};
use crate::target::TargetRoot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MountSource {
    Device(DeviceHandle),
    Subvolume { device: DeviceHandle, name: String },
}

impl MountSource {
    pub fn device(&self) -> &DeviceHandle {
        match self {
            MountSource::Device(device) => device,
            MountSource::Subvolume { device, .. } => device,
        }
    }
}

impl fmt::Display for MountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountSource::Device(device) => write!(f, "{}", device),
            MountSource::Subvolume { device, name } => write!(f, "{}[{}]", device, name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSpec {
    pub source: MountSource,
    /// Absolute path inside the target, e.g. `/home`.
    pub target: PathBuf,
    pub options: Vec<String>,
}

impl MountSpec {
    /// All `-o` options, including the subvolume selector.
    pub fn effective_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        if let MountSource::Subvolume { name, .. } = &self.source {
            options.push(format!("subvol={}", name));
        }
        options.extend(self.options.iter().cloned());
        options
    }

    pub fn mount_command(&self, target: &TargetRoot) -> Cmd {
        let mut cmd = Cmd::new("mount");
        let options = self.effective_options();
        if !options.is_empty() {
            cmd = cmd.args(["-o".to_string(), options.join(",")]);
        }
        cmd.arg_path(self.source.device().path())
            .arg_path(&target.path(&self.target))
    }
}

/// Mount entries ordered so every parent is mounted before its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountTree {
    entries: Vec<MountSpec>,
}

impl MountTree {
    pub fn new(entries: Vec<MountSpec>) -> Result<Self> {
        let tree = Self { entries };
        tree.validate()?;
        Ok(tree)
    }

    pub fn entries(&self) -> &[MountSpec] {
        &self.entries
    }

    /// Root first, unique targets, each parent an earlier target.
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |msg: String| InstallError::PreconditionViolated(format!("invalid mount tree: {msg}"));
        let Some(first) = self.entries.first() else {
            return Err(invalid("no entries".into()));
        };
        if first.target != Path::new("/") {
            return Err(invalid(format!("first entry is {}, not /", first.target.display())));
        }

        let mut seen: HashSet<&Path> = HashSet::new();
        for entry in &self.entries {
            if !entry.target.is_absolute() {
                return Err(invalid(format!("{} is not absolute", entry.target.display())));
            }
            if entry.target != Path::new("/") {
                let parent = entry.target.parent().unwrap_or(Path::new("/"));
                if !seen.contains(parent) {
                    return Err(invalid(format!(
                        "{} is mounted before its parent {}",
                        entry.target.display(),
                        parent.display()
                    )));
                }
            }
            if !seen.insert(entry.target.as_path()) {
                return Err(invalid(format!("{} appears twice", entry.target.display())));
            }
        }
        Ok(())
    }
}

/// Mounts established by this run, in mount order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountedTree {
    mounted: Vec<PathBuf>,
}

impl MountedTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, host_path: PathBuf) {
        self.mounted.push(host_path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.mounted
    }

    pub fn contains(&self, host_path: &Path) -> bool {
        self.mounted.iter().any(|p| p == host_path)
    }

    /// Unmount everything in reverse order. Returns whatever stayed mounted.
    pub fn unwind(&mut self, runner: &dyn CommandRunner) -> Vec<PathBuf> {
        let mut left = Vec::new();
        while let Some(path) = self.mounted.pop() {
            match runner.run(&Cmd::new("umount").arg_path(&path)) {
                Ok(_) => info!(path = %path.display(), "unmounted"),
                Err(err) => {
                    error!(path = %path.display(), error = %err, "could not unmount");
                    left.push(path);
                }
            }
        }
        left.reverse();
        left
    }
}

/// Create the mountpoint for `spec`, then mount it.
fn mount_entry(
    spec: &MountSpec,
    target: &TargetRoot,
    runner: &dyn CommandRunner,
) -> Result<PathBuf> {
    let host_path = target.path(&spec.target);
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(&host_path)
        .map_err(|e| InstallError::io(&host_path, e))?;
    runner.run(&spec.mount_command(target))?;
    info!(source = %spec.source, target = %host_path.display(), "mounted");
    Ok(host_path)
}

/// Mount `tree` under `target`. On failure, earlier mounts are undone.
pub fn mount_tree(
    tree: &MountTree,
    target: &TargetRoot,
    runner: &dyn CommandRunner,
) -> Result<MountedTree> {
    tree.validate()?;
    let mut mounted = MountedTree::new();
    for spec in tree.entries() {
        match mount_entry(spec, target, runner) {
            Ok(path) => mounted.push(path),
            Err(cause) => {
                let failed = target.path(&spec.target);
                let done = mounted.paths().to_vec();
                warn!(
                    failed = %failed.display(),
                    mounted = done.len(),
                    "mount failed, unwinding"
                );
                let left_mounted = mounted.unwind(runner);
                return Err(InstallError::PartialMount {
                    mounted: done,
                    failed,
                    left_mounted,
                    cause: Box::new(cause),
                });
            }
        }
    }
    Ok(mounted)
}
