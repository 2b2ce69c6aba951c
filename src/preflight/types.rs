//! Preflight verdicts and the report printed before an install.

use std::fmt;

/// The part of the host a check looked at. Reports are grouped by area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckArea {
    Privileges,
    Firmware,
    HostTool,
    TargetDisk,
}

impl fmt::Display for CheckArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckArea::Privileges => "Privileges",
            CheckArea::Firmware => "Firmware",
            CheckArea::HostTool => "Host tools",
            CheckArea::TargetDisk => "Target disk",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing stands in the way.
    Ready,
    /// The install would fail or destroy something it must not.
    Blocks,
    /// The install can run, but the operator should look first.
    Caution,
}

/// One finding about the host or the target disk.
#[derive(Debug, Clone)]
pub struct Check {
    pub area: CheckArea,
    pub subject: String,
    pub verdict: Verdict,
    pub note: Option<String>,
}

impl Check {
    fn new(area: CheckArea, subject: &str, verdict: Verdict, note: Option<&str>) -> Self {
        Self {
            area,
            subject: subject.to_string(),
            verdict,
            note: note.map(str::to_string),
        }
    }

    pub fn ready(area: CheckArea, subject: &str) -> Self {
        Self::new(area, subject, Verdict::Ready, None)
    }

    /// Ready, with what was found (a tool's path, a disk's state).
    pub fn found(area: CheckArea, subject: &str, note: &str) -> Self {
        Self::new(area, subject, Verdict::Ready, Some(note))
    }

    pub fn blocks(area: CheckArea, subject: &str, reason: &str) -> Self {
        Self::new(area, subject, Verdict::Blocks, Some(reason))
    }

    pub fn caution(area: CheckArea, subject: &str, reason: &str) -> Self {
        Self::new(area, subject, Verdict::Caution, Some(reason))
    }
}

pub struct PreflightReport {
    pub checks: Vec<Check>,
}

impl PreflightReport {
    /// No check blocks the install. Cautions are allowed.
    pub fn can_install(&self) -> bool {
        self.blockers().next().is_none()
    }

    pub fn blockers(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.verdict == Verdict::Blocks)
    }

    pub fn cautions(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.verdict == Verdict::Caution)
    }

    /// Checks in `area`, in the order they ran.
    pub fn in_area(&self, area: CheckArea) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(move |c| c.area == area)
    }

    /// Print the report to stdout, one section per area.
    pub fn print(&self) {
        println!("=== Preflight ===");

        let mut areas: Vec<CheckArea> = self.checks.iter().map(|c| c.area).collect();
        areas.sort();
        areas.dedup();

        for area in areas {
            println!("\n[{}]", area);
            for check in self.in_area(area) {
                let icon = match check.verdict {
                    Verdict::Ready => "✓",
                    Verdict::Blocks => "✗",
                    Verdict::Caution => "⚠",
                };
                match &check.note {
                    Some(note) => println!("  {} {}: {}", icon, check.subject, note),
                    None => println!("  {} {}", icon, check.subject),
                }
            }
        }

        let blockers = self.blockers().count();
        let cautions = self.cautions().count();
        println!();
        if blockers == 0 {
            println!("Ready to install ({} caution(s))", cautions);
        } else {
            println!(
                "{} blocker(s), {} caution(s) - the install will not start",
                blockers, cautions
            );
        }
    }
}
