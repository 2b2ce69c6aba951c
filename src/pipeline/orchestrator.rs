//! Runs the stages in order against one disk.

use std::time::Duration;

use tracing::{error, info, warn};

use super::{Artifact, InstallOutcome, PipelineState, Stage, StageResult};
use crate::aur::AurInstaller;
use crate::bootloader::{BootloaderInstaller, EncryptedRoot};
use crate::config::{InstallConfig, RootFs};
use crate::configure;
use crate::crypt::{ConfiguredPassphrase, EncryptionManager, PassphraseSource};
use crate::disk::{DeviceHandle, PartitionPlan, PartitionRole, PartitionedDisk, Partitioner};
use crate::error::{InstallError, Result};
use crate::journal::Journal;
use crate::packages::PackageInstaller;
use crate::probe::HostProbe;
use crate::process::CommandRunner;
use crate::storage::{format::build_tree, FilesystemManager, MountedTree};
use crate::target::TargetRoot;
use crate::timing::Timer;

/// Devices and mounts handed from one stage to the next.
#[derive(Debug, Default)]
struct Resolved {
    disk: Option<PartitionedDisk>,
    /// The mapped device when encrypted, else the root partition.
    root_device: Option<DeviceHandle>,
    encrypted: Option<EncryptedRoot>,
    mounted: Option<MountedTree>,
    swap_active: Option<DeviceHandle>,
}

impl Resolved {
    fn disk(&self) -> Result<&PartitionedDisk> {
        self.disk.as_ref().ok_or_else(|| unresolved("partitions"))
    }

    fn root_device(&self) -> Result<&DeviceHandle> {
        self.root_device.as_ref().ok_or_else(|| unresolved("root device"))
    }

    fn mounted(&self) -> Result<&MountedTree> {
        self.mounted.as_ref().ok_or_else(|| unresolved("mount tree"))
    }
}

fn unresolved(what: &str) -> InstallError {
    InstallError::PreconditionViolated(format!("{what} not resolved by an earlier stage"))
}

/// What a stage hands back besides success.
#[derive(Debug, Default)]
struct StageReport {
    artifacts: Vec<Artifact>,
    warnings: Vec<String>,
}

impl StageReport {
    fn skipped(reason: &str) -> Self {
        Self {
            artifacts: Vec::new(),
            warnings: vec![format!("skipped: {reason}")],
        }
    }
}

pub struct Pipeline<'a> {
    config: &'a InstallConfig,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn HostProbe,
    target: TargetRoot,
    passphrases: Box<dyn PassphraseSource + 'a>,
    journal: Option<Journal>,
    wipe_confirmed: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a InstallConfig,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn HostProbe,
    ) -> Self {
        Self {
            config,
            runner,
            probe,
            target: TargetRoot::new(&config.pipeline.mount_root, &config.pipeline.chroot_program),
            passphrases: Box::new(ConfiguredPassphrase::new(
                config.credentials.luks_passphrase.clone(),
            )),
            journal: None,
            wipe_confirmed: false,
        }
    }

    /// Allow partitioning a disk that already has partitions.
    pub fn confirm_wipe(mut self, confirmed: bool) -> Self {
        self.wipe_confirmed = confirmed;
        self
    }

    pub fn journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Replace where unlock passphrases come from, first attempt included.
    /// The default offers the configured passphrase once.
    pub fn passphrases(mut self, source: Box<dyn PassphraseSource + 'a>) -> Self {
        self.passphrases = source;
        self
    }

    /// Run every stage. Stops at the first fatal failure.
    pub fn run(mut self) -> InstallOutcome {
        let mut results = Vec::new();
        let mut warnings = Vec::new();

        let _lock = match self.probe.lock_device(&self.config.disk) {
            Ok(lock) => lock,
            Err(cause) => {
                error!(error = %cause, "could not take ownership of the target disk");
                self.record(&mut results, StageResult::failed(Stage::first(), cause.to_string()));
                return InstallOutcome::Failed {
                    stage: Stage::first(),
                    cause,
                    results,
                };
            }
        };

        let mut resolved = Resolved::default();
        let mut state = PipelineState::start();

        while let PipelineState::Running(stage) = state {
            info!(stage = %stage, "starting stage");
            let timer = Timer::start(stage.to_string());
            let outcome = self.run_stage(stage, &mut resolved);
            let elapsed_ms = timer.elapsed().as_millis() as u64;
            timer.finish();

            let result = match outcome {
                Ok(report) => {
                    for warning in &report.warnings {
                        warn!(stage = %stage, "{warning}");
                    }
                    warnings.extend(report.warnings.iter().map(|w| format!("{stage}: {w}")));
                    let mut result = StageResult::succeeded(stage, report.artifacts);
                    result.diagnostics = report.warnings;
                    state = state.advance(Ok(()));
                    result
                }
                Err(cause) => {
                    error!(
                        stage = %stage,
                        error = %cause,
                        recoverable = cause.is_recoverable(),
                        "stage failed"
                    );
                    let result = StageResult::failed(stage, cause.to_string());
                    state = state.advance(Err(cause));
                    result
                }
            };
            self.record(&mut results, StageResult { elapsed_ms, ..result });
        }

        match state {
            PipelineState::Failed { stage, cause } => InstallOutcome::Failed {
                stage,
                cause,
                results,
            },
            _ => {
                if self.config.pipeline.unmount_on_success {
                    warnings.extend(self.teardown(&mut resolved));
                }
                info!("installation complete");
                InstallOutcome::Succeeded { results, warnings }
            }
        }
    }

    fn record(&self, results: &mut Vec<StageResult>, result: StageResult) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.record(&result) {
                warn!(journal = %journal.path().display(), error = %err, "could not write journal");
            }
        }
        results.push(result);
    }

    fn network_timeout(&self) -> Option<Duration> {
        self.config.pipeline.network_timeout()
    }

    fn run_stage(&mut self, stage: Stage, resolved: &mut Resolved) -> Result<StageReport> {
        match stage {
            Stage::Partitioning => self.partition(resolved),
            Stage::Encrypting => self.encrypt(resolved),
            Stage::Mounting => self.mount(resolved),
            Stage::BaseInstall => {
                resolved.mounted()?;
                PackageInstaller::new(self.runner, &self.target, self.network_timeout())
                    .install_base(&self.config.packages.base)?;
                Ok(StageReport::default())
            }
            Stage::Configuring => {
                resolved.mounted()?;
                let steps = configure::steps(self.config);
                let retries = self.config.pipeline.step_retries;
                let report = configure::run_steps(&steps, &self.target, self.runner, retries);
                Ok(StageReport {
                    artifacts: Vec::new(),
                    warnings: report.problems(),
                })
            }
            Stage::BootloaderInstall => {
                let installer =
                    BootloaderInstaller::new(self.runner, &self.target, &self.config.bootloader);
                let warnings = installer.install(
                    resolved.mounted()?,
                    &self.config.packages.bootloader,
                    resolved.encrypted.as_ref(),
                    self.network_timeout(),
                )?;
                Ok(StageReport {
                    artifacts: Vec::new(),
                    warnings,
                })
            }
            Stage::WirelessSupport => {
                if !self.config.packages.enable_wireless {
                    return Ok(StageReport::skipped("wireless support disabled"));
                }
                let packages = &self.config.packages;
                PackageInstaller::new(self.runner, &self.target, self.network_timeout())
                    .install_wireless(&packages.wireless, &packages.wireless_services)?;
                Ok(StageReport::default())
            }
            Stage::PostInstallUpdate => {
                PackageInstaller::new(self.runner, &self.target, self.network_timeout()).update()?;
                Ok(StageReport::default())
            }
            Stage::AurHelper => {
                let Some(aur) = &self.config.aur else {
                    return Ok(StageReport::skipped("no AUR helper configured"));
                };
                let installer =
                    AurInstaller::new(self.runner, &self.target, self.network_timeout());
                match installer.install(aur, &self.config.credentials.username) {
                    Ok(()) => Ok(StageReport::default()),
                    Err(err) => Ok(StageReport {
                        artifacts: Vec::new(),
                        warnings: vec![format!("{} not installed: {err}", aur.helper)],
                    }),
                }
            }
        }
    }

    fn partition(&self, resolved: &mut Resolved) -> Result<StageReport> {
        let plan = PartitionPlan::from_layout(&self.config.layout)?;
        let disk = Partitioner::new(self.runner, self.probe).partition(
            &self.config.disk,
            &plan,
            self.wipe_confirmed,
        )?;

        let settle = Duration::from_secs(self.config.pipeline.settle_timeout_secs);
        for device in disk.all() {
            self.probe.wait_for_device(device.path(), settle)?;
        }

        let mut artifacts = vec![Artifact::Partition {
            role: PartitionRole::Efi,
            device: disk.efi.clone(),
        }];
        if let Some(swap) = &disk.swap {
            artifacts.push(Artifact::Partition {
                role: PartitionRole::Swap,
                device: swap.clone(),
            });
        }
        artifacts.push(Artifact::Partition {
            role: PartitionRole::Root,
            device: disk.root.clone(),
        });

        resolved.disk = Some(disk);
        Ok(StageReport {
            artifacts,
            warnings: Vec::new(),
        })
    }

    fn encrypt(&mut self, resolved: &mut Resolved) -> Result<StageReport> {
        let root = resolved.disk()?.root.clone();
        if !self.config.layout.encrypt {
            resolved.root_device = Some(root);
            return Ok(StageReport::skipped("encryption disabled"));
        }

        let crypt = EncryptionManager::new(self.runner);
        crypt.format(&root, &self.config.credentials.luks_passphrase)?;
        let mapper_name = &self.config.layout.mapper_name;
        let mapped = crypt.open_with_retry(
            &root,
            mapper_name,
            self.passphrases.as_mut(),
            self.config.pipeline.unlock_attempts,
        )?;

        resolved.encrypted = Some(EncryptedRoot {
            partition: root,
            mapper_name: mapper_name.clone(),
        });
        resolved.root_device = Some(mapped.clone());
        Ok(StageReport {
            artifacts: vec![Artifact::MappedDevice { device: mapped }],
            warnings: Vec::new(),
        })
    }

    fn mount(&self, resolved: &mut Resolved) -> Result<StageReport> {
        let disk = resolved.disk()?.clone();
        let root = resolved.root_device()?.clone();

        if self.probe.mount_table()?.is_mountpoint(self.target.root()) {
            return Err(InstallError::PreconditionViolated(format!(
                "{} is already a mountpoint",
                self.target.root().display()
            )));
        }

        let fs = FilesystemManager::new(self.runner, &self.target);
        fs.format(&disk, &root, &self.config.layout)?;
        let swap = fs.activate_swap(&disk)?;

        let assembled = (|| -> Result<MountedTree> {
            if self.config.layout.root_fs == RootFs::Btrfs {
                fs.create_subvolumes(&root)?;
            }
            fs.mount(&build_tree(&disk, &root, &self.config.layout)?)
        })();
        let mounted = match assembled {
            Ok(mounted) => mounted,
            Err(err) => {
                if let Some(swap) = &swap {
                    if let Err(off) = fs.deactivate_swap(swap) {
                        warn!(device = %swap, error = %off, "swap still active after failed mount");
                    }
                }
                return Err(err);
            }
        };
        resolved.swap_active = swap;

        let artifacts = mounted
            .paths()
            .iter()
            .map(|path| Artifact::Mountpoint { path: path.clone() })
            .collect();
        resolved.mounted = Some(mounted);
        Ok(StageReport {
            artifacts,
            warnings: Vec::new(),
        })
    }

    /// Release the target: mounts, swap, then the encrypted mapping.
    fn teardown(&self, resolved: &mut Resolved) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(mounted) = resolved.mounted.as_mut() {
            let left = mounted.unwind(self.runner);
            if !left.is_empty() {
                warnings.push(format!("{} mount(s) still active after teardown", left.len()));
            }
        }
        if let Some(swap) = resolved.swap_active.take() {
            let fs = FilesystemManager::new(self.runner, &self.target);
            if let Err(err) = fs.deactivate_swap(&swap) {
                warnings.push(format!("swapoff {swap} failed: {err}"));
            }
        }
        if let Some(encrypted) = resolved.encrypted.take() {
            if let Err(err) = EncryptionManager::new(self.runner).close(&encrypted.mapper_name) {
                warnings.push(format!("closing {} failed: {err}", encrypted.mapper_name));
            }
        }
        warnings
    }
}
