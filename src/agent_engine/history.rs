use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent_engine::actions::{Action, ActionProposal};
use crate::errors::WebClawResult;

/// Durable record of one proposed action, written before it is executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub prompt: String,
    /// Raw model reply the proposal was parsed from.
    pub response: String,
    pub proposal: ActionProposal,
    pub usage: Option<u32>,
}

impl HistoryEntry {
    pub fn action(&self) -> &Action {
        &self.proposal.action
    }
}

/// Append-only history of the current run. The full history is kept for
/// display; only a bounded window is replayed into prompts.
#[derive(Debug, Default)]
pub struct TaskHistory {
    entries: Vec<HistoryEntry>,
    journal: Option<PathBuf>,
}

impl TaskHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History that also appends each entry to `dir/session_<id>.jsonl`.
    pub fn with_journal(dir: &Path, session_id: &str) -> Self {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(path = %dir.display(), error = %e, "cannot create journal dir");
        }
        Self {
            entries: Vec::new(),
            journal: Some(dir.join(format!("session_{session_id}.jsonl"))),
        }
    }

    /// Appends and returns the index of the new entry.
    pub fn push(&mut self, entry: HistoryEntry) -> usize {
        self.entries.push(entry);
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "history journal write failed");
        }
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_deref()
    }

    /// Most recent successfully parsed proposals, oldest first, at most `window` long.
    pub fn replay_window(&self, window: usize) -> Vec<ActionProposal> {
        let valid: Vec<&HistoryEntry> =
            self.entries.iter().filter(|e| !e.action().is_error()).collect();
        let start = valid.len().saturating_sub(window);
        valid[start..].iter().map(|e| e.proposal.clone()).collect()
    }

    /// Append the latest entry to the JSONL file.
    fn flush(&self) -> WebClawResult<()> {
        let (Some(path), Some(last)) = (&self.journal, self.entries.last()) else {
            return Ok(());
        };
        let line = serde_json::to_string(last)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %path.display(), "history entry flushed");
        Ok(())
    }
}

/// `<local data dir>/webclaw/sessions`, falling back to the working directory.
pub fn default_journal_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("webclaw").join("sessions"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}
