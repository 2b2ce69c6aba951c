//! GRUB installation against the mounted EFI partition.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::BootloaderConfig;
use crate::disk::DeviceHandle;
use crate::error::{InstallError, Result};
use crate::process::{Cmd, CommandRunner};
use crate::storage::MountedTree;
use crate::target::TargetRoot;

const MKINITCPIO_CONF: &str = "/etc/mkinitcpio.conf";
const GRUB_DEFAULTS: &str = "/etc/default/grub";
const GRUB_CFG: &str = "/boot/grub/grub.cfg";

/// The encrypted root the boot chain has to unlock.
#[derive(Debug, Clone)]
pub struct EncryptedRoot {
    /// The LUKS partition, not the mapping.
    pub partition: DeviceHandle,
    pub mapper_name: String,
}

/// Which initramfs hook unlocks the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptHook {
    /// busybox-based images.
    Encrypt,
    /// systemd-based images.
    SdEncrypt,
}

impl EncryptHook {
    pub fn name(self) -> &'static str {
        match self {
            EncryptHook::Encrypt => "encrypt",
            EncryptHook::SdEncrypt => "sd-encrypt",
        }
    }

    /// Kernel parameters that tell the hook what to unlock.
    pub fn kernel_params(self, uuid: &str, mapper_name: &str) -> String {
        match self {
            EncryptHook::Encrypt => format!(
                "cryptdevice=UUID={uuid}:{mapper_name} root=/dev/mapper/{mapper_name}"
            ),
            EncryptHook::SdEncrypt => format!(
                "rd.luks.name={uuid}={mapper_name} root=/dev/mapper/{mapper_name}"
            ),
        }
    }
}

/// Insert the unlock hook before `filesystems` in a mkinitcpio.conf.
///
/// Leaves an already-present hook alone.
pub fn with_encrypt_hook(conf: &str) -> Result<(String, EncryptHook)> {
    let mut hook = None;
    let mut lines = Vec::new();

    for line in conf.lines() {
        let trimmed = line.trim_start();
        let inner = trimmed
            .strip_prefix("HOOKS=(")
            .and_then(|rest| rest.split_once(')'))
            .map(|(inner, _)| inner);
        let Some(inner) = inner.filter(|_| hook.is_none()) else {
            lines.push(line.to_string());
            continue;
        };

        let mut hooks: Vec<&str> = inner.split_whitespace().collect();
        let chosen = if hooks.contains(&"systemd") {
            EncryptHook::SdEncrypt
        } else {
            EncryptHook::Encrypt
        };
        if !hooks.contains(&chosen.name()) {
            let at = hooks
                .iter()
                .position(|h| *h == "filesystems")
                .ok_or_else(|| {
                    InstallError::PreconditionViolated(format!(
                        "{MKINITCPIO_CONF} HOOKS has no filesystems hook"
                    ))
                })?;
            hooks.insert(at, chosen.name());
        }
        lines.push(format!("HOOKS=({})", hooks.join(" ")));
        hook = Some(chosen);
    }

    let hook = hook.ok_or_else(|| {
        InstallError::PreconditionViolated(format!("{MKINITCPIO_CONF} has no HOOKS line"))
    })?;
    let mut content = lines.join("\n");
    content.push('\n');
    Ok((content, hook))
}

/// Set `key="value"` in a shell-style defaults file, replacing an active
/// assignment or appending one.
pub fn set_variable(content: &str, key: &str, value: &str) -> String {
    let assignment = format!("{key}=\"{value}\"");
    let prefix = format!("{key}=");
    let mut replaced = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if !replaced && line.trim_start().starts_with(&prefix) {
                replaced = true;
                assignment.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(assignment);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub struct BootloaderInstaller<'a> {
    runner: &'a dyn CommandRunner,
    target: &'a TargetRoot,
    config: &'a BootloaderConfig,
}

impl<'a> BootloaderInstaller<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        target: &'a TargetRoot,
        config: &'a BootloaderConfig,
    ) -> Self {
        Self {
            runner,
            target,
            config,
        }
    }

    /// The EFI partition must be live at `<root>/boot`.
    pub fn check_efi_mounted(&self, mounted: &MountedTree) -> Result<()> {
        let boot = self.target.path("/boot");
        if !mounted.contains(&boot) {
            return Err(InstallError::PreconditionViolated(format!(
                "EFI partition is not mounted at {}",
                boot.display()
            )));
        }
        Ok(())
    }

    /// Install GRUB. Returns warnings for non-fatal problems.
    pub fn install(
        &self,
        mounted: &MountedTree,
        packages: &[String],
        encrypted: Option<&EncryptedRoot>,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        self.check_efi_mounted(mounted)?;
        let mut warnings = Vec::new();

        info!("installing bootloader packages");
        let pacstrap = Cmd::new("pacstrap")
            .arg_path(self.target.root())
            .args(packages)
            .timeout(timeout);
        fatal("package install", self.runner.run(&pacstrap))?;

        if let Some(encrypted) = encrypted {
            fatal("encrypted boot setup", self.configure_unlock(encrypted))?;
        }

        info!(bootloader_id = %self.config.bootloader_id, "running grub-install");
        let grub_install = Cmd::new("grub-install").args([
            "--target=x86_64-efi".to_string(),
            "--efi-directory=/boot".to_string(),
            format!("--bootloader-id={}", self.config.bootloader_id),
        ]);
        fatal("install", self.runner.run(&self.target.chroot(grub_install)))?;
        fatal("config generation", self.generate_config())?;

        if let Some(theme) = &self.config.theme {
            if let Err(err) = self.apply_theme(theme) {
                warn!(theme = %theme, error = %err, "theme not applied, boot is unaffected");
                warnings.push(format!("bootloader theme {theme} not applied: {err}"));
            }
        }

        Ok(warnings)
    }

    fn generate_config(&self) -> Result<()> {
        let cmd = Cmd::new("grub-mkconfig").args(["-o", GRUB_CFG]);
        self.runner.run(&self.target.chroot(cmd)).map(|_| ())
    }

    /// Unlock hook in the initramfs, and the kernel parameters that drive it.
    fn configure_unlock(&self, encrypted: &EncryptedRoot) -> Result<()> {
        let conf = self.target.read(MKINITCPIO_CONF)?;
        let (conf, hook) = with_encrypt_hook(&conf)?;
        self.target.write(MKINITCPIO_CONF, conf)?;
        info!(hook = hook.name(), "regenerating initramfs");
        self.runner
            .run(&self.target.chroot(Cmd::new("mkinitcpio").arg("-P")))?;

        let uuid = self.luks_uuid(&encrypted.partition)?;
        let params = hook.kernel_params(&uuid, &encrypted.mapper_name);
        let defaults = self.target.read(GRUB_DEFAULTS)?;
        self.target
            .write(GRUB_DEFAULTS, set_variable(&defaults, "GRUB_CMDLINE_LINUX", &params))?;
        Ok(())
    }

    fn luks_uuid(&self, partition: &DeviceHandle) -> Result<String> {
        let result = self.runner.run(
            &Cmd::new("blkid")
                .args(["-s", "UUID", "-o", "value"])
                .arg_path(partition.path()),
        )?;
        let uuid = result.stdout_trimmed();
        if uuid.is_empty() {
            return Err(InstallError::PreconditionViolated(format!(
                "no UUID reported for {}",
                partition
            )));
        }
        Ok(uuid.to_string())
    }

    /// Point GRUB at `theme` and regenerate; restores the defaults file if
    /// anything goes wrong.
    fn apply_theme(&self, theme: &str) -> Result<()> {
        if !self.target.path(theme).is_file() {
            return Err(InstallError::PreconditionViolated(format!(
                "{theme} does not exist in the target"
            )));
        }
        let original = self.target.read(GRUB_DEFAULTS)?;
        let themed = set_variable(&original, "GRUB_THEME", theme);

        let applied = self
            .target
            .write(GRUB_DEFAULTS, &themed)
            .and_then(|_| self.generate_config());
        if let Err(err) = applied {
            self.target.write(GRUB_DEFAULTS, &original)?;
            return Err(err);
        }
        Ok(())
    }
}

fn fatal<T>(step: &'static str, result: Result<T>) -> Result<T> {
    result.map_err(|cause| InstallError::BootloaderFailed {
        step,
        cause: Box::new(cause),
    })
}
