use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent_engine::history::HistoryEntry;
use crate::agent_engine::state::{ActionStatus, TaskStatus};
use crate::llm::types::StreamChunk;

/// Observations published while a task runs. Nothing in the loop reads them back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    StatusChanged { status: TaskStatus },
    ActionStatusChanged { action_status: ActionStatus },
    HistoryAppended { index: usize, entry: HistoryEntry },
    /// The model asked the user something; the task is now pending.
    QuestionAsked { question: String },
    Error { message: String },
    LlmChunk { chunk: StreamChunk },
}

/// Fan-out of [`TaskEvent`]s to any number of UI or telemetry subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Publishing never fails the caller; with no subscribers the event is dropped.
    pub fn send(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("no event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
