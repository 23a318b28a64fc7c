use anyhow::Result;
use setupkit_core::Stage;
use tracing::{debug, warn};

use crate::journal::{
    append_journal_entry, current_unix_timestamp, write_current_stage, JournalEntry,
    JournalEvent,
};
use crate::InstallLayout;

/// Receives stage changes and failure records for crash forensics.
pub trait DiagnosticsSink {
    fn record(&mut self, event: JournalEvent) -> Result<()>;

    /// Run the events belong to, when the sink keeps per-run records.
    fn run_id(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&mut self, _event: JournalEvent) -> Result<()> {
        Ok(())
    }
}

/// Appends every event to the run journal and keeps the run's stage file
/// pointed at the latest stage.
#[derive(Debug)]
pub struct JournalSink {
    layout: InstallLayout,
    run_id: String,
    next_seq: u64,
}

impl JournalSink {
    pub fn new(layout: InstallLayout, run_id: impl Into<String>) -> Self {
        Self {
            layout,
            run_id: run_id.into(),
            next_seq: 1,
        }
    }
}

impl DiagnosticsSink for JournalSink {
    fn record(&mut self, event: JournalEvent) -> Result<()> {
        if let JournalEvent::Stage { stage } = &event {
            write_current_stage(&self.layout, &self.run_id, *stage)?;
        }
        let entry = JournalEntry {
            seq: self.next_seq,
            at_unix: current_unix_timestamp()?,
            event,
        };
        append_journal_entry(&self.layout, &self.run_id, &entry)?;
        self.next_seq += 1;
        Ok(())
    }

    fn run_id(&self) -> Option<&str> {
        Some(&self.run_id)
    }
}

/// Holds the single current stage of an install run.
pub struct StageTracker {
    current: Option<Stage>,
    sink: Box<dyn DiagnosticsSink>,
}

impl StageTracker {
    pub fn new(sink: Box<dyn DiagnosticsSink>) -> Self {
        Self {
            current: None,
            sink,
        }
    }

    pub fn detached() -> Self {
        Self::new(Box::new(NullSink))
    }

    pub fn current(&self) -> Option<Stage> {
        self.current
    }

    pub fn run_id(&self) -> Option<&str> {
        self.sink.run_id()
    }

    pub fn update_stage(&mut self, stage: Stage) {
        debug!(stage = stage.as_str(), "install stage");
        self.current = Some(stage);
        self.record(JournalEvent::Stage { stage });
    }

    /// Forwards a diagnostics record. Sink failures are logged and dropped.
    pub fn record(&mut self, event: JournalEvent) {
        if let Err(err) = self.sink.record(event) {
            warn!(error = %format!("{err:#}"), "failed to record install diagnostics");
        }
    }
}

impl std::fmt::Debug for StageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageTracker")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
