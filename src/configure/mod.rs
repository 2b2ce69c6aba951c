//! Declarative configuration of the installed system.
//!
//! Each [`ConfigStep`] describes WHAT to write into the target; the executor
//! decides HOW, in order, honouring each step's requirements.
//!
//! ```text
//! ConfigStep (DATA)                      Executor (LOGIC)
//! ─────────────────────                  ─────────────────
//! LocaleGen {                            requirements met?
//!   requires: [LocaleList],                no  → Skipped
//!   ops: [Chroot(locale-gen)],             yes → run ops, retry if allowed
//! }                                      record outcome
//! ```

pub mod definitions;
pub mod executor;

pub use definitions::steps;
pub use executor::run_steps;

use std::fmt;

use serde::Serialize;

use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StepId {
    Timezone,
    HardwareClock,
    LocaleList,
    LocaleGen,
    Lang,
    Keymap,
    Hostname,
    Hosts,
    NetworkService,
    RootPassword,
    UserAccount,
    UserPassword,
    Sudoers,
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepId::Timezone => "timezone",
            StepId::HardwareClock => "hardware clock",
            StepId::LocaleList => "locale list",
            StepId::LocaleGen => "locale generation",
            StepId::Lang => "LANG",
            StepId::Keymap => "keymap",
            StepId::Hostname => "hostname",
            StepId::Hosts => "hosts file",
            StepId::NetworkService => "network service",
            StepId::RootPassword => "root password",
            StepId::UserAccount => "user account",
            StepId::UserPassword => "user password",
            StepId::Sudoers => "sudoers",
        };
        f.write_str(name)
    }
}

/// One primitive action against the target. Paths are inside the target.
#[derive(Debug, Clone)]
pub enum Op {
    /// Fail unless the file exists.
    Require(String),
    /// Create or replace a file.
    Write(&'static str, String),
    /// Create or replace a file with permissions.
    WriteMode(&'static str, String, u32),
    /// Append to a file.
    Append(&'static str, String),
    /// Create a symlink (target it points to, link path).
    Symlink(String, &'static str),
    /// Run a program inside the target.
    Chroot(Cmd),
}

#[derive(Debug, Clone)]
pub struct ConfigStep {
    pub id: StepId,
    /// Steps that must have succeeded first.
    pub requires: &'static [StepId],
    /// Safe to run again after a failure.
    pub retryable: bool,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Succeeded,
    Failed(String),
    /// Not run because a required step did not succeed.
    Skipped { blocked_by: StepId },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub id: StepId,
    pub status: StepStatus,
    pub attempts: u32,
}

/// Per-step results of a configuration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigReport {
    pub outcomes: Vec<StepOutcome>,
}

impl ConfigReport {
    pub fn status(&self, id: StepId) -> Option<&StepStatus> {
        self.outcomes.iter().find(|o| o.id == id).map(|o| &o.status)
    }

    pub fn succeeded(&self, id: StepId) -> bool {
        self.status(id) == Some(&StepStatus::Succeeded)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == StepStatus::Succeeded)
    }

    /// Human-readable lines for every step that did not succeed.
    pub fn problems(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                StepStatus::Succeeded => None,
                StepStatus::Failed(err) => Some(format!("{} failed: {}", o.id, err)),
                StepStatus::Skipped { blocked_by } => {
                    Some(format!("{} skipped: {} did not succeed", o.id, blocked_by))
                }
            })
            .collect()
    }
}
