//! The mounted target system.
//!
//! File edits happen from the host through paths under the mount root; only
//! programs that must run against the target's own userland go through the
//! chroot wrapper.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use crate::error::{InstallError, Result};
use crate::process::Cmd;

#[derive(Debug, Clone)]
pub struct TargetRoot {
    root: PathBuf,
    chroot_program: String,
}

impl TargetRoot {
    pub fn new(root: impl Into<PathBuf>, chroot_program: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            chroot_program: chroot_program.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path of `inner`, an absolute path inside the target.
    pub fn path(&self, inner: impl AsRef<Path>) -> PathBuf {
        let inner = inner.as_ref();
        let relative = inner.strip_prefix("/").unwrap_or(inner);
        if relative.as_os_str().is_empty() {
            return self.root.clone();
        }
        self.root.join(relative)
    }

    /// Like [`TargetRoot::path`], but refuses `..` so the result stays under
    /// the mount root. Every file primitive goes through this.
    fn contained(&self, inner: impl AsRef<Path>) -> Result<PathBuf> {
        let inner = inner.as_ref();
        if inner.components().any(|c| c == Component::ParentDir) {
            return Err(InstallError::PreconditionViolated(format!(
                "{} leaves the target root",
                inner.display()
            )));
        }
        Ok(self.path(inner))
    }

    /// Run `cmd` inside the target.
    pub fn chroot(&self, cmd: Cmd) -> Cmd {
        cmd.wrapped_in(&self.chroot_program, &[self.root.to_string_lossy().into_owned()])
    }

    /// Run `cmd` inside the target as `user`.
    pub fn chroot_as(&self, user: &str, cmd: Cmd) -> Cmd {
        let runuser = ["-u".to_string(), user.to_string(), "--".to_string()];
        self.chroot(cmd.wrapped_in("runuser", &runuser))
    }

    /// Create or replace `inner`, creating parent directories as needed.
    pub fn write(&self, inner: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
        let path = self.contained(inner)?;
        create_parent(&path)?;
        fs::write(&path, content).map_err(|e| InstallError::io(&path, e))
    }

    /// Write `inner` and set its Unix permission bits.
    pub fn write_mode(
        &self,
        inner: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        mode: u32,
    ) -> Result<()> {
        let path = self.contained(&inner)?;
        self.write(&inner, content)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .map_err(|e| InstallError::io(&path, e))
    }

    /// Append to `inner`, creating it if missing.
    pub fn append(&self, inner: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
        let path = self.contained(inner)?;
        create_parent(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| InstallError::io(&path, e))?;
        file.write_all(content.as_ref())
            .map_err(|e| InstallError::io(&path, e))
    }

    pub fn read(&self, inner: impl AsRef<Path>) -> Result<String> {
        let path = self.contained(inner)?;
        fs::read_to_string(&path).map_err(|e| InstallError::io(&path, e))
    }

    /// Point `link` at `dest` (a path as seen inside the target), replacing any
    /// existing file.
    pub fn symlink(&self, dest: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
        let link = self.contained(link)?;
        create_parent(&link)?;
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link).map_err(|e| InstallError::io(&link, e))?;
        }
        symlink(dest.as_ref(), &link).map_err(|e| InstallError::io(&link, e))
    }

    pub fn remove(&self, inner: impl AsRef<Path>) -> Result<()> {
        let path = self.contained(inner)?;
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(InstallError::io(&path, e)),
            _ => Ok(()),
        }
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
    }
    Ok(())
}
