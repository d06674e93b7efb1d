use std::time::Duration;

use tokio::time::Instant;

use crate::agent_engine::state::LoopConfig;

/// Why the loop should stop even though the model has not finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StepBudget,
    TimeLimit,
}

/// Safety valves against runaway loops: a cap on history entries and an
/// optional wall-clock limit. Both end the run successfully.
pub struct LoopController {
    step_budget: usize,
    max_duration: Option<Duration>,
    start_time: Instant,
}

impl LoopController {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            step_budget: config.step_budget,
            max_duration: config
                .max_duration_minutes
                .map(|m| Duration::from_secs(u64::from(m) * 60)),
            start_time: Instant::now(),
        }
    }

    pub fn should_stop(&self, history_len: usize) -> Option<StopReason> {
        if history_len >= self.step_budget {
            return Some(StopReason::StepBudget);
        }
        match self.max_duration {
            Some(max) if self.start_time.elapsed() >= max => Some(StopReason::TimeLimit),
            _ => None,
        }
    }
}
