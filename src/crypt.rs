//! LUKS2 encryption of the root partition.

use std::path::Path;

use tracing::{info, warn};

use crate::config::Secret;
use crate::disk::DeviceHandle;
use crate::error::{InstallError, Result, UnlockReason};
use crate::process::{Cmd, CommandRunner};

// cryptsetup(8) RETURN CODES
const EXIT_NO_PERMISSION: i32 = 2;
const EXIT_DEVICE_EXISTS: i32 = 5;

/// Supplies passphrases for unlocking; asked again after a failed attempt.
pub trait PassphraseSource {
    /// `attempt` starts at 1. `None` means give up.
    fn passphrase(&mut self, attempt: u32) -> Option<Secret>;
}

/// Offers the configured passphrase once.
pub struct ConfiguredPassphrase {
    secret: Option<Secret>,
}

impl ConfiguredPassphrase {
    pub fn new(secret: Secret) -> Self {
        Self {
            secret: Some(secret),
        }
    }
}

impl PassphraseSource for ConfiguredPassphrase {
    fn passphrase(&mut self, _attempt: u32) -> Option<Secret> {
        self.secret.take()
    }
}

pub struct EncryptionManager<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> EncryptionManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Write a LUKS2 header to `device`. Destroys its contents.
    pub fn format(&self, device: &DeviceHandle, passphrase: &Secret) -> Result<()> {
        info!(device = %device, "formatting LUKS2 volume");
        let cmd = Cmd::new("cryptsetup")
            .args(["luksFormat", "--batch-mode", "--type", "luks2", "--key-file", "-"])
            .arg_path(device.path())
            .stdin(passphrase.expose());
        self.runner
            .run(&cmd)
            .map(|_| ())
            .map_err(|cause| InstallError::EncryptionFormat {
                device: device.path().to_path_buf(),
                cause: Box::new(cause),
            })
    }

    /// Open `device` as `/dev/mapper/<name>`.
    pub fn open(
        &self,
        device: &DeviceHandle,
        passphrase: &Secret,
        name: &str,
    ) -> Result<DeviceHandle> {
        let cmd = Cmd::new("cryptsetup")
            .args(["open", "--key-file", "-"])
            .arg_path(device.path())
            .arg(name)
            .stdin(passphrase.expose());
        match self.runner.run(&cmd) {
            Ok(_) => {
                let mapped = DeviceHandle::new(Path::new("/dev/mapper").join(name));
                info!(device = %device, mapped = %mapped, "opened encrypted volume");
                Ok(mapped)
            }
            Err(cause) => {
                let reason = match &cause {
                    InstallError::ExecutionFailed {
                        exit_code: Some(EXIT_NO_PERMISSION),
                        ..
                    } => UnlockReason::WrongKey,
                    InstallError::ExecutionFailed {
                        exit_code: Some(EXIT_DEVICE_EXISTS),
                        ..
                    } => UnlockReason::AlreadyOpen,
                    _ => UnlockReason::Other,
                };
                Err(InstallError::UnlockFailed {
                    device: device.path().to_path_buf(),
                    reason,
                    cause: Box::new(cause),
                })
            }
        }
    }

    /// Open `device`, asking `source` for another key after each failure.
    pub fn open_with_retry(
        &self,
        device: &DeviceHandle,
        name: &str,
        source: &mut dyn PassphraseSource,
        max_attempts: u32,
    ) -> Result<DeviceHandle> {
        let mut last_error = None;
        for attempt in 1..=max_attempts.max(1) {
            let Some(passphrase) = source.passphrase(attempt) else {
                break;
            };
            match self.open(device, &passphrase, name) {
                Ok(mapped) => return Ok(mapped),
                Err(err) => {
                    warn!(device = %device, attempt, error = %err, "unlock failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| InstallError::UnlockFailed {
            device: device.path().to_path_buf(),
            reason: UnlockReason::Other,
            cause: Box::new(InstallError::PreconditionViolated(
                "no passphrase available".to_string(),
            )),
        }))
    }

    /// Close the mapping `name`.
    pub fn close(&self, name: &str) -> Result<()> {
        self.runner
            .run(&Cmd::new("cryptsetup").args(["close", name]))
            .map(|_| ())
    }
}
