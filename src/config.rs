//! Installation configuration.
//!
//! Read from a TOML file. Secrets may also come from the environment (or a
//! `.env` file loaded by the binary); environment values take precedence.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{InstallError, Result};

pub const ENV_LUKS_PASSPHRASE: &str = "ARCH_BOOTSTRAP_LUKS_PASSPHRASE";
pub const ENV_ROOT_PASSWORD: &str = "ARCH_BOOTSTRAP_ROOT_PASSWORD";
pub const ENV_USER_PASSWORD: &str = "ARCH_BOOTSTRAP_USER_PASSWORD";

/// useradd(8) `NAME_REGEX` default.
const USERNAME_PATTERN: &str = r"^[a-z_][a-z0-9_-]{0,31}$";
/// Characters makepkg accepts in a `pkgname`.
const PKGNAME_PATTERN: &str = r"^[a-z0-9@_+][a-z0-9@._+-]*$";

/// A string that never shows up in logs or debug output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Root filesystem kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootFs {
    /// Copy-on-write with `@`, `@home`, `@var`, `@snapshots` subvolumes.
    Btrfs,
    Ext4,
}

impl RootFs {
    /// Name parted uses for the partition's filesystem type.
    pub fn parted_name(self) -> &'static str {
        match self {
            RootFs::Btrfs => "btrfs",
            RootFs::Ext4 => "ext4",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// EFI partition size in MiB. The partition starts at 1 MiB.
    pub efi_mib: u64,
    /// Swap partition size in MiB; 0 means no swap.
    pub swap_mib: u64,
    pub root_fs: RootFs,
    /// Format the root partition as LUKS2.
    pub encrypt: bool,
    /// Device-mapper name for the unlocked root.
    pub mapper_name: String,
    /// Extra mount options for btrfs subvolumes.
    pub btrfs_options: Vec<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            efi_mib: 512,
            swap_mib: 4096,
            root_fs: RootFs::Btrfs,
            encrypt: true,
            mapper_name: "cryptroot".to_string(),
            btrfs_options: vec!["noatime".to_string(), "compress=zstd".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageConfig {
    /// Installed by pacstrap in the base install stage.
    pub base: Vec<String>,
    pub bootloader: Vec<String>,
    pub wireless: Vec<String>,
    /// systemd units enabled after the wireless packages are installed.
    pub wireless_services: Vec<String>,
    /// Install and enable the wireless daemon.
    pub enable_wireless: bool,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            base: ["base", "linux", "linux-firmware", "networkmanager", "git", "nano", "sudo"]
                .map(String::from)
                .to_vec(),
            bootloader: ["grub", "efibootmgr"].map(String::from).to_vec(),
            wireless: vec!["iwd".to_string()],
            wireless_services: vec!["iwd.service".to_string()],
            enable_wireless: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootloaderConfig {
    pub bootloader_id: String,
    /// Path inside the target, e.g. `/usr/share/grub/themes/x/theme.txt`.
    pub theme: Option<String>,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            bootloader_id: "GRUB".to_string(),
            theme: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Credentials {
    pub luks_passphrase: Secret,
    pub root_password: Secret,
    pub username: String,
    pub user_password: Secret,
}

/// Optional AUR helper built from source after the base install.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AurConfig {
    /// Package name, e.g. `paru`.
    pub helper: String,
    /// Expected SHA-256 of the cloned PKGBUILD.
    pub pkgbuild_sha256: Option<String>,
    #[serde(default)]
    pub allow_unverified: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Where the target is assembled.
    pub mount_root: PathBuf,
    /// Program that enters the target root.
    pub chroot_program: String,
    /// Timeout for network-dependent commands, in seconds. 0 disables it.
    pub network_timeout_secs: u64,
    /// Extra attempts for independent configuration steps.
    pub step_retries: u32,
    /// Passphrase attempts when opening the encrypted root.
    pub unlock_attempts: u32,
    /// How long to wait for new partition device nodes, in seconds.
    pub settle_timeout_secs: u64,
    /// Unmount everything and close the encrypted root once done.
    pub unmount_on_success: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from("/mnt"),
            chroot_program: "arch-chroot".to_string(),
            network_timeout_secs: 1800,
            step_retries: 1,
            unlock_attempts: 3,
            settle_timeout_secs: 10,
            unmount_on_success: false,
        }
    }
}

impl PipelineConfig {
    pub fn network_timeout(&self) -> Option<Duration> {
        (self.network_timeout_secs > 0).then(|| Duration::from_secs(self.network_timeout_secs))
    }
}

/// Everything the pipeline needs to know about the desired system.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallConfig {
    /// Target disk, e.g. `/dev/sda` or `/dev/nvme0n1`.
    pub disk: PathBuf,
    pub hostname: String,
    /// Zone name under `/usr/share/zoneinfo`.
    pub timezone: String,
    pub locale: String,
    /// Value of `LANG`; also generated.
    pub locale_lang: String,
    pub keymap: String,
    pub layout: LayoutConfig,
    pub packages: PackageConfig,
    pub bootloader: BootloaderConfig,
    pub credentials: Credentials,
    pub aur: Option<AurConfig>,
    pub pipeline: PipelineConfig,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            disk: PathBuf::from("/dev/sda"),
            hostname: "archlinux".to_string(),
            timezone: "Europe/Berlin".to_string(),
            locale: "en_US.UTF-8".to_string(),
            locale_lang: "de_DE.UTF-8".to_string(),
            keymap: "de".to_string(),
            layout: LayoutConfig::default(),
            packages: PackageConfig::default(),
            bootloader: BootloaderConfig::default(),
            credentials: Credentials::default(),
            aur: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl InstallConfig {
    /// Load and validate configuration from a TOML file plus environment.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| InstallError::InvalidConfig(e.to_string()))
    }

    /// Override credentials from the environment.
    pub fn apply_env(&mut self) {
        let secrets = [
            (ENV_LUKS_PASSPHRASE, &mut self.credentials.luks_passphrase),
            (ENV_ROOT_PASSWORD, &mut self.credentials.root_password),
            (ENV_USER_PASSWORD, &mut self.credentials.user_password),
        ];
        for (key, slot) in secrets {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    *slot = Secret::new(value);
                }
            }
        }
    }

    /// Check the shape of the configuration. Device checks happen in preflight.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("disk", self.disk.to_string_lossy().into_owned()),
            ("hostname", self.hostname.clone()),
            ("timezone", self.timezone.clone()),
            ("locale", self.locale.clone()),
            ("locale_lang", self.locale_lang.clone()),
            ("keymap", self.keymap.clone()),
            ("layout.mapper_name", self.layout.mapper_name.clone()),
            ("pipeline.chroot_program", self.pipeline.chroot_program.clone()),
            ("bootloader.bootloader_id", self.bootloader.bootloader_id.clone()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(InstallError::InvalidConfig(format!("{name} must not be empty")));
            }
        }

        if !self.disk.is_absolute() {
            return Err(InstallError::InvalidConfig(format!(
                "disk must be an absolute device path, got {}",
                self.disk.display()
            )));
        }
        if !self.pipeline.mount_root.is_absolute() {
            return Err(InstallError::InvalidConfig(
                "pipeline.mount_root must be absolute".to_string(),
            ));
        }
        if self
            .hostname
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-'))
        {
            return Err(InstallError::InvalidConfig(format!(
                "hostname '{}' may only contain letters, digits and '-'",
                self.hostname
            )));
        }
        if self.layout.efi_mib < 300 {
            return Err(InstallError::InvalidConfig(
                "layout.efi_mib must be at least 300".to_string(),
            ));
        }
        if self.layout.encrypt && self.credentials.luks_passphrase.is_empty() {
            return Err(InstallError::InvalidConfig(format!(
                "encryption is enabled but no passphrase was given (set {})",
                ENV_LUKS_PASSPHRASE
            )));
        }
        if self.credentials.root_password.is_empty() {
            return Err(InstallError::InvalidConfig(format!(
                "root password is required (set {})",
                ENV_ROOT_PASSWORD
            )));
        }
        if self.credentials.username.is_empty() != self.credentials.user_password.is_empty() {
            return Err(InstallError::InvalidConfig(
                "credentials.username and the user password must be given together".to_string(),
            ));
        }
        let username = &self.credentials.username;
        if !username.is_empty() && !matches(USERNAME_PATTERN, username)? {
            return Err(InstallError::InvalidConfig(format!(
                "credentials.username '{}' must match {}",
                username.escape_debug(),
                USERNAME_PATTERN
            )));
        }
        // chpasswd reads one `user:password` record per line.
        let passwords = [
            ("root password", &self.credentials.root_password),
            ("user password", &self.credentials.user_password),
        ];
        for (name, secret) in passwords {
            if secret.expose().contains(['\n', '\r']) {
                return Err(InstallError::InvalidConfig(format!(
                    "{name} must not contain line breaks"
                )));
            }
        }
        if self.packages.enable_wireless && self.packages.wireless.is_empty() {
            return Err(InstallError::InvalidConfig(
                "packages.wireless is empty but wireless support is enabled".to_string(),
            ));
        }
        if let Some(theme) = &self.bootloader.theme {
            if !theme.starts_with('/') {
                return Err(InstallError::InvalidConfig(
                    "bootloader.theme must be an absolute path inside the target".to_string(),
                ));
            }
        }
        if let Some(aur) = &self.aur {
            if !matches(PKGNAME_PATTERN, &aur.helper)? {
                return Err(InstallError::InvalidConfig(format!(
                    "invalid AUR helper name '{}'",
                    aur.helper
                )));
            }
            if self.credentials.username.is_empty() {
                return Err(InstallError::InvalidConfig(
                    "an AUR helper needs a user account to build as".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Path of the block device that will hold the root filesystem's mapping.
    pub fn mapper_path(&self) -> PathBuf {
        Path::new("/dev/mapper").join(&self.layout.mapper_name)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  disk:        {}", self.disk.display());
        println!("  hostname:    {}", self.hostname);
        println!("  timezone:    {}", self.timezone);
        println!("  locale:      {} (LANG={})", self.locale, self.locale_lang);
        println!("  keymap:      {}", self.keymap);
        println!(
            "  layout:      EFI {} MiB, swap {} MiB, root {:?}{}",
            self.layout.efi_mib,
            self.layout.swap_mib,
            self.layout.root_fs,
            if self.layout.encrypt { " (LUKS2)" } else { "" }
        );
        println!("  mount root:  {}", self.pipeline.mount_root.display());
        if let Some(theme) = &self.bootloader.theme {
            println!("  grub theme:  {}", theme);
        }
        if !self.credentials.username.is_empty() {
            println!("  user:        {}", self.credentials.username);
        }
    }
}

fn matches(pattern: &str, value: &str) -> Result<bool> {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .map_err(|e| InstallError::InvalidConfig(format!("pattern {pattern}: {e}")))
}
