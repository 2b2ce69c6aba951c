//! Configuration executor - interprets [`Op`] variants against the target.

use tracing::{info, warn};

use super::{ConfigReport, ConfigStep, Op, StepOutcome, StepStatus};
use crate::error::{InstallError, Result};
use crate::process::CommandRunner;
use crate::target::TargetRoot;

/// Run `steps` in order. Never fails as a whole; see the report.
pub fn run_steps(
    steps: &[ConfigStep],
    target: &TargetRoot,
    runner: &dyn CommandRunner,
    retries: u32,
) -> ConfigReport {
    let mut report = ConfigReport::default();

    for step in steps {
        let blocked_by = step
            .requires
            .iter()
            .find(|required| !report.succeeded(**required))
            .copied();
        if let Some(blocked_by) = blocked_by {
            warn!(step = %step.id, blocked_by = %blocked_by, "skipping step");
            report.outcomes.push(StepOutcome {
                id: step.id,
                status: StepStatus::Skipped { blocked_by },
                attempts: 0,
            });
            continue;
        }

        let max_attempts = if step.retryable { retries + 1 } else { 1 };
        let mut attempts = 0;
        let status = loop {
            attempts += 1;
            match execute_step(step, target, runner) {
                Ok(()) => break StepStatus::Succeeded,
                Err(err) if attempts < max_attempts => {
                    warn!(
                        step = %step.id,
                        attempt = attempts,
                        error = %err,
                        "step failed, retrying"
                    );
                }
                Err(err) => {
                    warn!(step = %step.id, error = %err, "step failed");
                    break StepStatus::Failed(err.to_string());
                }
            }
        };
        if status == StepStatus::Succeeded {
            info!(step = %step.id, "configured");
        }

        report.outcomes.push(StepOutcome {
            id: step.id,
            status,
            attempts,
        });
    }

    report
}

fn execute_step(step: &ConfigStep, target: &TargetRoot, runner: &dyn CommandRunner) -> Result<()> {
    for op in &step.ops {
        execute_op(op, target, runner)?;
    }
    Ok(())
}

fn execute_op(op: &Op, target: &TargetRoot, runner: &dyn CommandRunner) -> Result<()> {
    match op {
        Op::Require(path) => {
            let host = target.path(path);
            if !host.exists() {
                return Err(InstallError::PreconditionViolated(format!(
                    "{} does not exist in the target",
                    path
                )));
            }
        }
        Op::Write(path, content) => target.write(path, content)?,
        Op::WriteMode(path, content, mode) => target.write_mode(path, content, *mode)?,
        Op::Append(path, content) => target.append(path, content)?,
        Op::Symlink(dest, link) => target.symlink(dest, link)?,
        Op::Chroot(cmd) => {
            runner.run(&target.chroot(cmd.clone()))?;
        }
    }
    Ok(())
}
