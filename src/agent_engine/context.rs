use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::agent_engine::actions::ActionProposal;
use crate::agent_engine::event_bus::{EventBus, TaskEvent};
use crate::agent_engine::history::{HistoryEntry, TaskHistory};
use crate::agent_engine::state::{ActionStatus, TaskStatus};

/// Identifier of the page/tab a run acts on.
pub type SurfaceId = String;

#[derive(Debug, Default)]
struct TaskRecord {
    /// Instructions as typed by the user; copied into `instructions` when a run starts.
    draft_instructions: Option<String>,
    resume: Option<String>,
    memory: Option<String>,
    instructions: Option<String>,
    surface: Option<SurfaceId>,
    history: TaskHistory,
}

struct Inner {
    status: watch::Sender<TaskStatus>,
    action_status: watch::Sender<ActionStatus>,
    record: Mutex<TaskRecord>,
    events: EventBus,
}

/// Shared state of one task. Cloning gives another handle to the same task,
/// so a UI can resume or interrupt while the orchestrator drives the loop.
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<Inner>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::with_events(EventBus::new())
    }

    pub fn with_events(events: EventBus) -> Self {
        let (status, _) = watch::channel(TaskStatus::Idle);
        let (action_status, _) = watch::channel(ActionStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                status,
                action_status,
                record: Mutex::new(TaskRecord::default()),
                events,
            }),
        }
    }

    fn record(&self) -> MutexGuard<'_, TaskRecord> {
        // Writers never panic while holding the lock; recover the data if one did.
        self.inner
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    // ── Inputs set by outer layers ────────────────────────────────────────

    pub fn set_instructions(&self, instructions: impl Into<String>) {
        self.record().draft_instructions = Some(instructions.into());
    }

    pub fn set_resume(&self, resume: impl Into<String>) {
        self.record().resume = Some(resume.into());
    }

    pub fn set_memory(&self, memory: impl Into<String>) {
        self.record().memory = Some(memory.into());
    }

    pub fn draft_instructions(&self) -> Option<String> {
        self.record().draft_instructions.clone()
    }

    pub fn resume_text(&self) -> Option<String> {
        self.record().resume.clone()
    }

    pub fn memory_text(&self) -> Option<String> {
        self.record().memory.clone()
    }

    // ── Run state ─────────────────────────────────────────────────────────

    /// Instructions of the current (or last) run.
    pub fn instructions(&self) -> Option<String> {
        self.record().instructions.clone()
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        self.record().surface.clone()
    }

    pub(crate) fn set_surface(&self, surface: SurfaceId) {
        self.record().surface = Some(surface);
    }

    pub fn status(&self) -> TaskStatus {
        *self.inner.status.borrow()
    }

    pub fn action_status(&self) -> ActionStatus {
        *self.inner.action_status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TaskStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        !self.status().is_active()
    }

    pub fn set_status(&self, status: TaskStatus) {
        let previous = self.inner.status.send_replace(status);
        if previous != status {
            tracing::info!(from = ?previous, to = ?status, "task status changed");
            self.inner.events.send(TaskEvent::StatusChanged { status });
        }
    }

    pub fn set_action_status(&self, action_status: ActionStatus) {
        let previous = self.inner.action_status.send_replace(action_status);
        if previous != action_status {
            tracing::debug!(action_status = ?action_status, "action status");
            self.inner
                .events
                .send(TaskEvent::ActionStatusChanged { action_status });
        }
    }

    /// Claims the task for a new run: copies the draft instructions, clears the
    /// history and moves to `running`. Returns the instructions, or `None` when
    /// there are none or a run is already active.
    pub(crate) fn begin_run(&self, history: TaskHistory) -> Option<String> {
        let instructions = self
            .draft_instructions()
            .filter(|i| !i.trim().is_empty())?;

        let mut claimed = false;
        self.inner.status.send_if_modified(|status| {
            if status.is_active() {
                return false;
            }
            *status = TaskStatus::Running;
            claimed = true;
            true
        });
        if !claimed {
            return None;
        }

        {
            let mut record = self.record();
            record.instructions = Some(instructions.clone());
            record.history = history;
            record.surface = None;
        }
        tracing::info!(instructions = %instructions, "task status changed to running");
        self.inner.events.send(TaskEvent::StatusChanged {
            status: TaskStatus::Running,
        });
        self.set_action_status(ActionStatus::AttachingEnvironment);
        Some(instructions)
    }

    /// `pending → running`. Returns whether the task was waiting.
    pub fn resume(&self) -> bool {
        self.transition(|s| s == TaskStatus::Pending, TaskStatus::Running)
    }

    /// `running|pending → interrupted`, honored at the loop's next checkpoint.
    pub fn interrupt(&self) -> bool {
        self.transition(TaskStatus::is_active, TaskStatus::Interrupted)
    }

    /// `running → pending` for an `ask_user`. Fails if the task stopped meanwhile.
    pub(crate) fn suspend(&self) -> bool {
        self.transition(|s| s == TaskStatus::Running, TaskStatus::Pending)
    }

    /// Moves an active run to its final status. A stop set from outside wins.
    pub(crate) fn settle(&self, to: TaskStatus) -> bool {
        self.transition(TaskStatus::is_active, to)
    }

    fn transition(&self, allowed: impl Fn(TaskStatus) -> bool, to: TaskStatus) -> bool {
        let mut from = None;
        self.inner.status.send_if_modified(|status| {
            if !allowed(*status) {
                return false;
            }
            from = Some(*status);
            *status = to;
            true
        });
        match from {
            Some(from) => {
                tracing::info!(from = ?from, to = ?to, "task status changed");
                self.inner.events.send(TaskEvent::StatusChanged { status: to });
                true
            }
            None => false,
        }
    }

    // ── History ───────────────────────────────────────────────────────────

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.record().history.entries().to_vec()
    }

    pub fn history_len(&self) -> usize {
        self.record().history.len()
    }

    pub(crate) fn push_history(&self, entry: HistoryEntry) -> usize {
        let index = self.record().history.push(entry.clone());
        tracing::debug!(index, action = ?entry.proposal.action, "history entry appended");
        self.inner
            .events
            .send(TaskEvent::HistoryAppended { index, entry });
        index
    }

    pub fn replay_window(&self, window: usize) -> Vec<ActionProposal> {
        self.record().history.replay_window(window)
    }

    // ── Suspension points ─────────────────────────────────────────────────

    /// Blocks while `pending`, re-checking at least every `tick`.
    pub async fn wait_while_pending(&self, tick: Duration) {
        let mut rx = self.subscribe_status();
        while *rx.borrow_and_update() == TaskStatus::Pending {
            // Timeout only bounds the wait; the loop re-reads the status either way.
            let _ = tokio::time::timeout(tick, rx.changed()).await;
        }
    }

    /// Sleeps for `duration` unless the task stops first. Returns `false` if stopped.
    pub async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let mut rx = self.subscribe_status();
        let stopped = async {
            loop {
                if !rx.borrow_and_update().is_active() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = stopped => false,
        }
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_run_requires_instructions() {
        let ctx = TaskContext::new();
        assert!(ctx.begin_run(TaskHistory::new()).is_none());
        ctx.set_instructions("  ");
        assert!(ctx.begin_run(TaskHistory::new()).is_none());
        assert_eq!(ctx.status(), TaskStatus::Idle);
    }

    #[test]
    fn only_one_active_run() {
        let ctx = TaskContext::new();
        ctx.set_instructions("Apply to job X");
        assert_eq!(ctx.begin_run(TaskHistory::new()).as_deref(), Some("Apply to job X"));
        assert_eq!(ctx.status(), TaskStatus::Running);
        assert_eq!(ctx.action_status(), ActionStatus::AttachingEnvironment);
        assert!(ctx.begin_run(TaskHistory::new()).is_none());
    }

    #[test]
    fn resume_and_interrupt_transitions() {
        let ctx = TaskContext::new();
        assert!(!ctx.resume());
        assert!(!ctx.interrupt());

        ctx.set_status(TaskStatus::Pending);
        assert!(ctx.resume());
        assert_eq!(ctx.status(), TaskStatus::Running);
        assert!(!ctx.resume());

        assert!(ctx.interrupt());
        assert_eq!(ctx.status(), TaskStatus::Interrupted);
        assert!(ctx.is_stopped());
    }

    #[test]
    fn settle_and_suspend_never_override_an_interrupt() {
        let ctx = TaskContext::new();
        ctx.set_status(TaskStatus::Running);
        assert!(ctx.interrupt());

        assert!(!ctx.suspend());
        assert!(!ctx.settle(TaskStatus::Error));
        assert_eq!(ctx.status(), TaskStatus::Interrupted);

        ctx.set_status(TaskStatus::Running);
        assert!(ctx.suspend());
        assert_eq!(ctx.status(), TaskStatus::Pending);
        assert!(ctx.settle(TaskStatus::Error));
        assert_eq!(ctx.status(), TaskStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_wait_ends_on_resume() {
        let ctx = TaskContext::new();
        ctx.set_status(TaskStatus::Pending);

        let resumer = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            resumer.resume();
        });

        ctx.wait_while_pending(Duration::from_secs(1)).await;
        assert_eq!(ctx.status(), TaskStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_wakes_early_on_interrupt() {
        let ctx = TaskContext::new();
        ctx.set_status(TaskStatus::Running);

        let interrupter = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            interrupter.interrupt();
        });

        let started = tokio::time::Instant::now();
        assert!(!ctx.sleep_unless_stopped(Duration::from_secs(60)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn history_appends_are_published() {
        use crate::agent_engine::actions::Action;

        let ctx = TaskContext::new();
        let mut rx = ctx.events().subscribe();
        let index = ctx.push_history(HistoryEntry {
            ts: 1,
            prompt: "p".into(),
            response: "r".into(),
            proposal: ActionProposal {
                action: Action::Finish,
                thought: None,
                usage: None,
            },
            usage: None,
        });
        assert_eq!(index, 0);
        assert_eq!(ctx.history_len(), 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            TaskEvent::HistoryAppended { index: 0, .. }
        ));
    }
}
