use super::{ActivityEntry, ActivityKind};
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::phase::Phase;
use crate::util::{MAX_MESSAGE_CHARS, truncate_message};

pub struct ActivityLog {
    path: PathBuf,
    run_id: Uuid,
    project_id: String,
}

impl ActivityLog {
    pub fn new(path: PathBuf, project_id: &str) -> Self {
        Self {
            path,
            run_id: Uuid::new_v4(),
            project_id: project_id.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Append one entry. The message is truncated to [`MAX_MESSAGE_CHARS`].
    pub fn append(
        &self,
        kind: ActivityKind,
        phase: Option<Phase>,
        attempt: Option<u32>,
        message: &str,
    ) -> Result<()> {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            run_id: self.run_id,
            project_id: self.project_id.clone(),
            kind,
            phase,
            attempt,
            message: truncate_message(message, MAX_MESSAGE_CHARS),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create activity log directory")?;
        }
        let mut line = serde_json::to_string(&entry).context("Failed to serialize activity entry")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open activity log: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .context("Failed to append to activity log")?;
        file.sync_data().context("Failed to flush activity log")?;
        Ok(())
    }

    /// Append, logging instead of failing. Activity logging never stops a run.
    pub fn record(&self, kind: ActivityKind, phase: Option<Phase>, attempt: Option<u32>, message: &str) {
        if let Err(e) = self.append(kind, phase, attempt, message) {
            warn!(error = %format!("{:#}", e), kind = %kind, "Failed to write activity log");
        }
    }

    /// Read every entry in the log. Unparseable lines are skipped.
    pub fn read_all(path: &Path) -> Result<Vec<ActivityEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open activity log: {}", path.display()))?;
        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("Failed to read activity log")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ActivityEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = index + 1, error = %e, "Skipping malformed activity entry"),
            }
        }
        Ok(entries)
    }

    /// The last `limit` entries, oldest first.
    pub fn tail(path: &Path, limit: usize) -> Result<Vec<ActivityEntry>> {
        let mut entries = Self::read_all(path)?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}
