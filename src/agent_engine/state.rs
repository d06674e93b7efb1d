use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coarse lifecycle status of a task; gates whether the loop continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    /// Suspended on an `ask_user` question until resumed.
    Pending,
    Running,
    Success,
    Error,
    Interrupted,
}

impl TaskStatus {
    /// The loop keeps going only while running or suspended.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Pending)
    }
}

/// Fine-grained phase of the current iteration. Observational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    #[default]
    Idle,
    AttachingEnvironment,
    PullingSnapshot,
    TransformingSnapshot,
    PerformingQuery,
    PerformingAction,
    Waiting,
}

/// Final status given to a run that ends on a `fail` proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailOutcome {
    #[default]
    Success,
    Error,
}

/// What to do after a proposal whose tool call could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorPolicy {
    /// Report it, drop the rest of the batch and take a fresh snapshot.
    #[default]
    NextIteration,
    /// Treat it as fatal for the run.
    FailRun,
}

/// Tunables of the orchestration loop, read from the `[agent]` config table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_attempts: u32,
    pub history_window: usize,
    pub step_budget: usize,
    pub action_delay_ms: u64,
    pub iteration_delay_ms: u64,
    pub pending_poll_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_duration_minutes: Option<u32>,
    pub fail_outcome: FailOutcome,
    pub parse_error_policy: ParseErrorPolicy,
    /// Append every history entry to a JSONL session file.
    pub journal: bool,
    pub journal_dir: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            history_window: 15,
            step_budget: 50,
            action_delay_ms: 500,
            iteration_delay_ms: 500,
            pending_poll_ms: 1000,
            retry_backoff_ms: 0,
            max_duration_minutes: None,
            fail_outcome: FailOutcome::Success,
            parse_error_policy: ParseErrorPolicy::NextIteration,
            journal: false,
            journal_dir: None,
        }
    }
}

impl LoopConfig {
    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }

    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }

    pub fn pending_poll(&self) -> Duration {
        Duration::from_millis(self.pending_poll_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
