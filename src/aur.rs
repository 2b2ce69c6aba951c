//! Building an AUR helper from source, with its PKGBUILD pinned by hash.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::AurConfig;
use crate::error::{InstallError, Result};
use crate::process::{Cmd, CommandRunner};
use crate::target::TargetRoot;

const AUR_BASE_URL: &str = "https://aur.archlinux.org";
/// Lets the build user run pacman without a password while makepkg runs.
const SUDOERS_DROP_IN: &str = "/etc/sudoers.d/90-arch-bootstrap-aur";

/// Hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Check `content` against the pin. An absent pin is only accepted when the
/// config explicitly allows unverified builds.
pub fn verify_pkgbuild(config: &AurConfig, path: &std::path::Path, content: &[u8]) -> Result<()> {
    let actual = sha256_hex(content);
    match &config.pkgbuild_sha256 {
        Some(expected) if expected.eq_ignore_ascii_case(&actual) => Ok(()),
        Some(expected) => Err(InstallError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_lowercase(),
            actual,
        }),
        None if config.allow_unverified => {
            warn!(helper = %config.helper, sha256 = %actual, "building unverified PKGBUILD");
            Ok(())
        }
        None => Err(InstallError::PreconditionViolated(format!(
            "no pkgbuild_sha256 pinned for {} (its PKGBUILD hashes to {})",
            config.helper, actual
        ))),
    }
}

pub struct AurInstaller<'a> {
    runner: &'a dyn CommandRunner,
    target: &'a TargetRoot,
    timeout: Option<Duration>,
}

impl<'a> AurInstaller<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        target: &'a TargetRoot,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            target,
            timeout,
        }
    }

    /// Clone, verify and build `config.helper` as `user`.
    ///
    /// The sudoers drop-in and build directory are removed whatever happens.
    pub fn install(&self, config: &AurConfig, user: &str) -> Result<()> {
        let work_dir = format!("/home/{user}/.cache/arch-bootstrap");
        let build_dir = format!("{work_dir}/{}", config.helper);

        let result = self.build(config, user, &work_dir, &build_dir);

        if let Err(err) = self.target.remove(SUDOERS_DROP_IN) {
            warn!(error = %err, "could not remove temporary sudoers rule");
        }
        if let Err(err) = self.target.remove(&build_dir) {
            warn!(error = %err, "could not remove AUR build directory");
        }
        result
    }

    fn build(&self, config: &AurConfig, user: &str, work_dir: &str, build_dir: &str) -> Result<()> {
        let url = format!("{AUR_BASE_URL}/{}.git", config.helper);
        info!(helper = %config.helper, url = %url, "cloning AUR package");

        self.runner.run(
            &self
                .target
                .chroot_as(user, Cmd::new("mkdir").args(["-p", work_dir])),
        )?;
        // A leftover checkout from an earlier attempt would make the clone fail.
        self.target.remove(build_dir)?;
        self.runner.run(
            &self.target.chroot_as(
                user,
                Cmd::new("git")
                    .args(["clone", "--depth", "1", url.as_str(), build_dir])
                    .timeout(self.timeout),
            ),
        )?;

        let pkgbuild = format!("{build_dir}/PKGBUILD");
        let host_path = self.target.path(&pkgbuild);
        let content = std::fs::read(&host_path).map_err(|e| InstallError::io(&host_path, e))?;
        verify_pkgbuild(config, &host_path, &content)?;

        self.target.write_mode(
            SUDOERS_DROP_IN,
            format!("{user} ALL=(ALL) NOPASSWD: /usr/bin/pacman\n"),
            0o440,
        )?;

        info!(helper = %config.helper, "building AUR package");
        let makepkg = Cmd::shell(r#"cd -- "$1" && makepkg -si --noconfirm"#, [build_dir])
            .timeout(self.timeout);
        self.runner.run(&self.target.chroot_as(user, makepkg))?;
        Ok(())
    }
}
