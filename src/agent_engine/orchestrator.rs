use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::agent_engine::actions::Action;
use crate::agent_engine::context::TaskContext;
use crate::agent_engine::decision::{Decision, DecisionEngine, ErrorCallback};
use crate::agent_engine::event_bus::TaskEvent;
use crate::agent_engine::history::{default_journal_dir, HistoryEntry, TaskHistory};
use crate::agent_engine::loop_control::{LoopController, StopReason};
use crate::agent_engine::prompt::PromptInputs;
use crate::agent_engine::state::{
    ActionStatus, FailOutcome, LoopConfig, ParseErrorPolicy, TaskStatus,
};
use crate::environment::{Environment, EnvironmentLease};
use crate::errors::{WebClawError, WebClawResult};
use crate::executor::dispatcher::{dispatch, ActionExecutor};
use crate::page::reducer::CompactReducer;
use crate::page::traits::{SnapshotProvider, SnapshotReducer};

/// How the loop ended, before it is mapped onto a final [`TaskStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Finished,
    Failed,
    NoMoreActions,
    Limit(StopReason),
    /// Status left `running`/`pending` from outside; keep whatever it is now.
    Stopped,
    /// Already reported through the error callback.
    Aborted,
}

/// Result of processing one decision's proposals.
enum BatchOutcome {
    Continue,
    Suspended,
    Finished,
    Failed,
    Limit(StopReason),
}

/// Interrupts the task if `run_task` is dropped while the run is still active.
struct RunGuard(TaskContext);

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.0.settle(TaskStatus::Interrupted) {
            tracing::warn!("task run dropped before completion");
            self.0.set_action_status(ActionStatus::Idle);
        }
    }
}

/// Drives one task through snapshot → decide → act → wait cycles.
pub struct TaskOrchestrator {
    ctx: TaskContext,
    decision: DecisionEngine,
    snapshots: Arc<dyn SnapshotProvider>,
    reducer: Arc<dyn SnapshotReducer>,
    executor: Arc<dyn ActionExecutor>,
    environment: Arc<dyn Environment>,
    config: LoopConfig,
}

impl TaskOrchestrator {
    pub fn new(
        ctx: TaskContext,
        decision: DecisionEngine,
        snapshots: Arc<dyn SnapshotProvider>,
        executor: Arc<dyn ActionExecutor>,
        environment: Arc<dyn Environment>,
        config: LoopConfig,
    ) -> Self {
        let decision = decision
            .with_history_window(config.history_window)
            .with_retry_backoff(config.retry_backoff())
            .with_events(ctx.events().clone());
        Self {
            ctx,
            decision,
            snapshots,
            reducer: Arc::new(CompactReducer),
            executor,
            environment,
            config,
        }
    }

    pub fn with_reducer(mut self, reducer: Arc<dyn SnapshotReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Runs the task to completion and returns its final status.
    ///
    /// A no-op returning the current status when there are no instructions or
    /// a run is already active. Every fatal error is reported once through
    /// `on_error`; the environment is released on every path. An interrupt
    /// that arrives while a step is in flight keeps the run `interrupted`,
    /// even if that step then fails.
    ///
    /// Dropping the returned future before it completes marks the task
    /// `interrupted` and releases the environment in the background.
    pub async fn run_task(&self, on_error: ErrorCallback) -> TaskStatus {
        let history = if self.config.journal {
            let dir = self
                .config
                .journal_dir
                .clone()
                .unwrap_or_else(default_journal_dir);
            TaskHistory::with_journal(&dir, &uuid::Uuid::new_v4().to_string())
        } else {
            TaskHistory::new()
        };

        let Some(instructions) = self.ctx.begin_run(history) else {
            tracing::debug!(status = ?self.ctx.status(), "run request ignored");
            return self.ctx.status();
        };

        let _guard = RunGuard(self.ctx.clone());
        let report = self.error_reporter(on_error);
        let mut lease = None;

        let result = AssertUnwindSafe(self.drive(&instructions, &mut lease, &report))
            .catch_unwind()
            .await;

        if let Some(lease) = lease.take() {
            lease.release().await;
        }

        match result {
            Ok(Ok(outcome)) => self.finish(outcome, &report),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "task failed");
                report(&e.to_string());
                self.ctx.settle(TaskStatus::Error);
            }
            Err(_) => {
                tracing::error!("task loop panicked");
                report("Task loop panicked");
                self.ctx.settle(TaskStatus::Error);
            }
        }
        self.ctx.set_action_status(ActionStatus::Idle);

        let status = self.ctx.status();
        tracing::info!(status = ?status, entries = self.ctx.history_len(), "task run ended");
        status
    }

    /// Wraps the caller's callback so every message also reaches the event bus.
    fn error_reporter(&self, on_error: ErrorCallback) -> ErrorCallback {
        let events = self.ctx.events().clone();
        Arc::new(move |message: &str| {
            on_error(message);
            events.send(TaskEvent::Error {
                message: message.to_string(),
            });
        })
    }

    fn finish(&self, outcome: RunOutcome, report: &ErrorCallback) {
        let final_status = match outcome {
            RunOutcome::Finished | RunOutcome::NoMoreActions | RunOutcome::Limit(_) => {
                TaskStatus::Success
            }
            RunOutcome::Failed => match self.config.fail_outcome {
                FailOutcome::Success => TaskStatus::Success,
                FailOutcome::Error => {
                    report("The agent reported that it could not complete the task");
                    TaskStatus::Error
                }
            },
            RunOutcome::Aborted => TaskStatus::Error,
            RunOutcome::Stopped => return,
        };

        // An interrupt that landed during the last step wins.
        self.ctx.settle(final_status);
        tracing::info!(outcome = ?outcome, "task loop finished");
    }

    async fn drive(
        &self,
        instructions: &str,
        lease_slot: &mut Option<EnvironmentLease>,
        report: &ErrorCallback,
    ) -> WebClawResult<RunOutcome> {
        let ctx = &self.ctx;

        let surface = self.environment.active_surface().await?;
        ctx.set_surface(surface.clone());
        let lease = lease_slot
            .insert(EnvironmentLease::acquire(self.environment.clone(), &surface).await?);
        lease.disable_capabilities().await?;

        let controller = LoopController::new(&self.config);

        loop {
            if ctx.is_stopped() {
                return Ok(RunOutcome::Stopped);
            }
            if ctx.status() == TaskStatus::Pending {
                tracing::info!("waiting for the user to answer");
                ctx.wait_while_pending(self.config.pending_poll()).await;
                if ctx.is_stopped() {
                    return Ok(RunOutcome::Stopped);
                }
            }

            ctx.set_action_status(ActionStatus::PullingSnapshot);
            let document = self
                .snapshots
                .get_snapshot(ctx)
                .await?
                .ok_or_else(|| WebClawError::Snapshot("page snapshot is empty".into()))?;

            if ctx.is_stopped() {
                return Ok(RunOutcome::Stopped);
            }
            ctx.set_action_status(ActionStatus::TransformingSnapshot);
            let compact = self.reducer.reduce(&document);

            ctx.set_action_status(ActionStatus::PerformingQuery);
            let history = ctx.replay_window(self.config.history_window);
            let resume = ctx.resume_text();
            let memory = ctx.memory_text();
            let inputs = PromptInputs {
                instructions,
                resume: resume.as_deref(),
                memory: memory.as_deref(),
                now: chrono::Local::now(),
                snapshot: &compact.text,
                history: &history,
            };
            let Some(decision) = self
                .decision
                .decide(&inputs, self.config.max_attempts, report, ctx)
                .await?
            else {
                return Ok(if ctx.is_stopped() {
                    RunOutcome::Stopped
                } else {
                    RunOutcome::Aborted
                });
            };

            if ctx.is_stopped() {
                return Ok(RunOutcome::Stopped);
            }
            ctx.set_action_status(ActionStatus::PerformingAction);
            if decision.proposals.is_empty() {
                tracing::info!("model proposed no further actions");
                return Ok(RunOutcome::NoMoreActions);
            }

            match self.perform_batch(&decision, &controller, report).await? {
                BatchOutcome::Finished => return Ok(RunOutcome::Finished),
                BatchOutcome::Failed => return Ok(RunOutcome::Failed),
                BatchOutcome::Limit(reason) => return Ok(RunOutcome::Limit(reason)),
                BatchOutcome::Continue | BatchOutcome::Suspended => {}
            }

            if ctx.is_stopped() {
                return Ok(RunOutcome::Stopped);
            }
            if let Some(reason) = controller.should_stop(ctx.history_len()) {
                tracing::warn!(reason = ?reason, entries = ctx.history_len(), "loop limit reached");
                return Ok(RunOutcome::Limit(reason));
            }

            ctx.set_action_status(ActionStatus::Waiting);
            ctx.sleep_unless_stopped(self.config.iteration_delay()).await;
        }
    }

    /// Records and performs proposals in order. Each proposal is appended to
    /// history before anything is executed.
    async fn perform_batch(
        &self,
        decision: &Decision,
        controller: &LoopController,
        report: &ErrorCallback,
    ) -> WebClawResult<BatchOutcome> {
        let ctx = &self.ctx;

        for proposal in &decision.proposals {
            if ctx.is_stopped() {
                return Ok(BatchOutcome::Continue);
            }
            if let Some(reason) = controller.should_stop(ctx.history_len()) {
                return Ok(BatchOutcome::Limit(reason));
            }

            ctx.push_history(HistoryEntry {
                ts: chrono::Utc::now().timestamp_millis(),
                prompt: decision.prompt.clone(),
                response: decision.response.clone(),
                proposal: proposal.clone(),
                usage: decision.usage,
            });

            match &proposal.action {
                Action::Unparsable(_) => {
                    let message = proposal
                        .action
                        .error_message()
                        .unwrap_or_else(|| "Could not parse action".into());
                    tracing::warn!(error = %message, "unparsable action, dropping batch");
                    return match self.config.parse_error_policy {
                        ParseErrorPolicy::NextIteration => {
                            report(&message);
                            Ok(BatchOutcome::Continue)
                        }
                        ParseErrorPolicy::FailRun => Err(WebClawError::UnparsableAction(message)),
                    };
                }
                Action::Finish => {
                    tracing::info!(thought = ?proposal.thought, "task finished");
                    return Ok(BatchOutcome::Finished);
                }
                Action::Fail => {
                    tracing::warn!(thought = ?proposal.thought, "task failure reported");
                    return Ok(BatchOutcome::Failed);
                }
                Action::Click(_) | Action::SetValue(_) => {
                    dispatch(self.executor.as_ref(), &proposal.action, ctx).await?;
                }
                Action::AskUser(args) => {
                    if !ctx.suspend() {
                        return Ok(BatchOutcome::Continue);
                    }
                    tracing::info!(question = %args.question, "asking the user");
                    ctx.events().send(TaskEvent::QuestionAsked {
                        question: args.question.clone(),
                    });
                    ctx.sleep_unless_stopped(self.config.action_delay()).await;
                    return Ok(BatchOutcome::Suspended);
                }
            }

            if !ctx.sleep_unless_stopped(self.config.action_delay()).await {
                return Ok(BatchOutcome::Continue);
            }
        }

        Ok(BatchOutcome::Continue)
    }
}
