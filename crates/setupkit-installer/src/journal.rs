use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use setupkit_core::{InstallOutcome, Stage};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::InstallLayout;

pub const RUN_METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunMetadata {
    pub version: u32,
    pub run_id: String,
    pub new_version: String,
    pub status: RunStatus,
    pub started_at_unix: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InstallOutcome>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Committed,
    RolledBack,
    Finished,
    /// Stopped by an error before any mutation ran.
    Aborted,
}

/// One diagnostics record in a run journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Stage {
        stage: Stage,
    },
    MutationFailed {
        index: usize,
        kind: String,
        target: String,
        message: String,
    },
    RollbackFailed {
        index: usize,
        kind: String,
        target: String,
        message: String,
    },
    StepFailed {
        step: String,
        message: String,
    },
    Outcome {
        outcome: InstallOutcome,
    },
    Aborted {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub seq: u64,
    pub at_unix: u64,
    #[serde(flatten)]
    pub event: JournalEvent,
}

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Run ids stay unique within one process even when runs share a second.
pub fn new_run_id(started_at_unix: u64) -> String {
    let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("run-{started_at_unix}-{}-{seq}", std::process::id())
}

/// Marks `run_id` as the active run. A marker left behind by a run that
/// never finished is replaced and its id returned so the caller can report it.
pub fn claim_active_run(layout: &InstallLayout, run_id: &str) -> Result<Option<String>> {
    let path = layout.run_active_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let stale = read_active_run(layout)?;
    let mut file = fs::File::create(&path)
        .with_context(|| format!("failed to claim active run file: {}", path.display()))?;
    file.write_all(format!("{run_id}\n").as_bytes())
        .with_context(|| format!("failed to write active run file: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush active run file: {}", path.display()))?;

    Ok(stale.filter(|stale_id| stale_id != run_id))
}

pub fn read_active_run(layout: &InstallLayout) -> Result<Option<String>> {
    let path = layout.run_active_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read active run file: {}", path.display())
            });
        }
    };

    let run_id = raw.trim();
    if run_id.is_empty() {
        return Ok(None);
    }
    Ok(Some(run_id.to_string()))
}

pub fn clear_active_run(layout: &InstallLayout) -> Result<()> {
    let path = layout.run_active_path();
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("failed to clear active run file: {}", path.display()))?;
    }
    Ok(())
}

pub fn write_run_metadata(layout: &InstallLayout, metadata: &RunMetadata) -> Result<PathBuf> {
    let path = layout.run_metadata_path(&metadata.run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let payload = serde_json::to_string_pretty(metadata).context("failed to encode run metadata")?;
    fs::write(&path, payload.as_bytes())
        .with_context(|| format!("failed to write run metadata file: {}", path.display()))?;
    Ok(path)
}

pub fn read_run_metadata(layout: &InstallLayout, run_id: &str) -> Result<Option<RunMetadata>> {
    let path = layout.run_metadata_path(run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read run metadata file: {}", path.display())
            });
        }
    };

    let metadata = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing run metadata file: {}", path.display()))?;
    Ok(Some(metadata))
}

pub fn update_run_status(
    layout: &InstallLayout,
    run_id: &str,
    status: RunStatus,
    outcome: Option<InstallOutcome>,
) -> Result<()> {
    let mut metadata = read_run_metadata(layout, run_id)?
        .ok_or_else(|| anyhow!("run metadata not found for '{run_id}'"))?;
    metadata.status = status;
    if outcome.is_some() {
        metadata.outcome = outcome;
    }
    write_run_metadata(layout, &metadata)?;
    Ok(())
}

pub fn append_journal_entry(
    layout: &InstallLayout,
    run_id: &str,
    entry: &JournalEntry,
) -> Result<PathBuf> {
    let path = layout.run_journal_path(run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let line = serde_json::to_string(entry).context("failed to encode journal entry")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open run journal: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append run journal: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to append run journal newline: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush run journal: {}", path.display()))?;
    Ok(path)
}

pub fn read_journal(layout: &InstallLayout, run_id: &str) -> Result<Vec<JournalEntry>> {
    let path = layout.run_journal_path(run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read run journal: {}", path.display()));
        }
    };

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid run journal line in {}: {line}", path.display()))
        })
        .collect()
}

/// Overwrites the single "latest stage" value for a run.
pub fn write_current_stage(layout: &InstallLayout, run_id: &str, stage: Stage) -> Result<()> {
    let path = layout.run_stage_path(run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, format!("{}\n", stage.as_str()))
        .with_context(|| format!("failed to write run stage file: {}", path.display()))
}

pub fn read_current_stage(layout: &InstallLayout, run_id: &str) -> Result<Option<Stage>> {
    let path = layout.run_stage_path(run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read run stage file: {}", path.display()));
        }
    };
    let token = raw.trim();
    Stage::parse(token)
        .map(Some)
        .ok_or_else(|| anyhow!("unknown stage '{token}' in {}", path.display()))
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}
