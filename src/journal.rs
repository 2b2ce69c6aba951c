//! Append-only record of stage results, one JSON object per line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{InstallError, Result};
use crate::pipeline::StageResult;

/// `$XDG_STATE_HOME/arch-bootstrap/journal.jsonl`, falling back to the
/// working directory when no state dir is known.
pub fn default_path() -> PathBuf {
    dirs::state_dir()
        .map(|dir| dir.join("arch-bootstrap"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("journal.jsonl")
}

pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, result: &StageResult) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
        }
        let mut line = serde_json::to_string(result).map_err(|e| {
            InstallError::io(&self.path, std::io::Error::other(e))
        })?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| InstallError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| InstallError::io(&self.path, e))
    }
}
