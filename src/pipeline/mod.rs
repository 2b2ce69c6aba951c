//! The staged installation pipeline.
//!
//! ```text
//! Partitioning → Encrypting → Mounting → BaseInstall → Configuring
//!   → BootloaderInstall → WirelessSupport → PostInstallUpdate → AurHelper → Done
//!
//! any stage ──error──▶ Failed { stage, cause }   (absorbing)
//! ```

pub mod orchestrator;

pub use orchestrator::Pipeline;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::disk::{DeviceHandle, PartitionRole};
use crate::error::InstallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Partitioning,
    Encrypting,
    Mounting,
    BaseInstall,
    Configuring,
    BootloaderInstall,
    WirelessSupport,
    PostInstallUpdate,
    AurHelper,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Partitioning,
        Stage::Encrypting,
        Stage::Mounting,
        Stage::BaseInstall,
        Stage::Configuring,
        Stage::BootloaderInstall,
        Stage::WirelessSupport,
        Stage::PostInstallUpdate,
        Stage::AurHelper,
    ];

    pub fn first() -> Stage {
        Stage::ALL[0]
    }

    pub fn next(self) -> Option<Stage> {
        let at = Stage::ALL.iter().position(|s| *s == self)?;
        Stage::ALL.get(at + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Partitioning => "partitioning",
            Stage::Encrypting => "encrypting",
            Stage::Mounting => "mounting",
            Stage::BaseInstall => "base install",
            Stage::Configuring => "configuring",
            Stage::BootloaderInstall => "bootloader install",
            Stage::WirelessSupport => "wireless support",
            Stage::PostInstallUpdate => "post-install update",
            Stage::AurHelper => "AUR helper",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum PipelineState {
    Running(Stage),
    Done,
    Failed { stage: Stage, cause: InstallError },
}

impl PipelineState {
    pub fn start() -> Self {
        PipelineState::Running(Stage::first())
    }

    /// Apply the outcome of the running stage. Terminal states never change.
    pub fn advance(self, outcome: Result<(), InstallError>) -> Self {
        match (self, outcome) {
            (PipelineState::Running(stage), Ok(())) => {
                stage.next().map_or(PipelineState::Done, PipelineState::Running)
            }
            (PipelineState::Running(stage), Err(cause)) => PipelineState::Failed { stage, cause },
            (terminal, _) => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineState::Running(_))
    }
}

/// Something a stage produced for the stages after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Partition { role: PartitionRole, device: DeviceHandle },
    MappedDevice { device: DeviceHandle },
    Mountpoint { path: PathBuf },
}

/// What one stage did. Written to the journal, never fed back into stages.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    pub diagnostics: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub elapsed_ms: u64,
}

impl StageResult {
    pub fn succeeded(stage: Stage, artifacts: Vec<Artifact>) -> Self {
        Self {
            stage,
            success: true,
            diagnostics: Vec::new(),
            artifacts,
            elapsed_ms: 0,
        }
    }

    pub fn failed(stage: Stage, diagnostic: String) -> Self {
        Self {
            stage,
            success: false,
            diagnostics: vec![diagnostic],
            artifacts: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

/// How the whole run ended, for the caller to report.
#[derive(Debug)]
pub enum InstallOutcome {
    Succeeded {
        results: Vec<StageResult>,
        /// Non-fatal problems: failed configuration steps, theme, AUR helper.
        warnings: Vec<String>,
    },
    Failed {
        stage: Stage,
        cause: InstallError,
        results: Vec<StageResult>,
    },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InstallOutcome::Succeeded { .. })
    }

    pub fn results(&self) -> &[StageResult] {
        match self {
            InstallOutcome::Succeeded { results, .. }
            | InstallOutcome::Failed { results, .. } => results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::first();
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, Stage::ALL);
    }

    #[test]
    fn test_success_advances_to_done() {
        let mut state = PipelineState::start();
        for _ in Stage::ALL {
            assert!(!state.is_terminal());
            state = state.advance(Ok(()));
        }
        assert!(matches!(state, PipelineState::Done));
    }

    #[test]
    fn test_failed_is_absorbing() {
        let state = PipelineState::Running(Stage::Mounting)
            .advance(Err(InstallError::PreconditionViolated("busy".into())));
        let state = state.advance(Ok(()));
        assert!(matches!(
            state,
            PipelineState::Failed {
                stage: Stage::Mounting,
                ..
            }
        ));
    }

    #[test]
    fn test_artifact_serializes_tagged() {
        let artifact = Artifact::MappedDevice {
            device: DeviceHandle::new("/dev/mapper/cryptroot"),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["kind"], "mapped_device");
        assert_eq!(json["device"], "/dev/mapper/cryptroot");
    }
}
