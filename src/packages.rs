//! Package installation into the target: base system, wireless, updates.

use std::time::Duration;

use tracing::info;

use crate::error::{InstallError, Result};
use crate::process::{Cmd, CommandRunner};
use crate::target::TargetRoot;

const FSTAB: &str = "/etc/fstab";

pub struct PackageInstaller<'a> {
    runner: &'a dyn CommandRunner,
    target: &'a TargetRoot,
    timeout: Option<Duration>,
}

impl<'a> PackageInstaller<'a> {
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

    fn pacstrap(&self, packages: &[String]) -> Cmd {
        Cmd::new("pacstrap")
            .arg("-K")
            .arg_path(self.target.root())
            .args(packages)
            .timeout(self.timeout)
    }

    /// Install `packages` with pacstrap and write the fstab for the live tree.
    pub fn install_base(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Err(InstallError::InvalidConfig("no base packages selected".into()));
        }
        info!(count = packages.len(), "installing base system");
        self.runner.run(&self.pacstrap(packages))?;

        let fstab = self
            .runner
            .run(&Cmd::new("genfstab").arg("-U").arg_path(self.target.root()))?;
        if fstab.stdout.trim().is_empty() {
            return Err(InstallError::PreconditionViolated(
                "genfstab produced no entries".into(),
            ));
        }
        self.target.append(FSTAB, fstab.stdout)?;
        Ok(())
    }

    /// Install the wireless packages and enable `services` for next boot.
    pub fn install_wireless(&self, packages: &[String], services: &[String]) -> Result<()> {
        info!("installing wireless support");
        let pacstrap = Cmd::new("pacstrap")
            .arg_path(self.target.root())
            .args(packages)
            .timeout(self.timeout);
        self.runner.run(&pacstrap)?;
        for service in services {
            self.runner.run(
                &self
                    .target
                    .chroot(Cmd::new("systemctl").args(["enable", service.as_str()])),
            )?;
        }
        Ok(())
    }

    fn update_command(&self) -> Cmd {
        let cmd = Cmd::new("pacman")
            .args(["-Syu", "--noconfirm"])
            .timeout(self.timeout);
        self.target.chroot(cmd)
    }

    /// Bring every installed package up to date.
    pub fn update(&self) -> Result<()> {
        info!("updating installed packages");
        self.runner.run(&self.update_command())?;
        Ok(())
    }
}
