use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_engine::actions::{parse_tool_call, ActionProposal};
use crate::agent_engine::context::TaskContext;
use crate::agent_engine::event_bus::EventBus;
use crate::agent_engine::prompt::{format_prompt, PromptInputs, SYSTEM_PROMPT};
use crate::errors::{LlmError, WebClawError, WebClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ProviderRegistry;
use crate::llm::tools::load_action_tools;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, ToolDef};

/// Registry role used for decision calls.
pub const DECISION_ROLE: &str = "decision";

/// Receives non-fatal error messages (retries, missing credential, bad actions).
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Result of one successful decision call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// In reply order. Empty when the model proposed nothing.
    pub proposals: Vec<ActionProposal>,
    pub usage: Option<u32>,
    /// Exact prompt sent, kept for the history record.
    pub prompt: String,
    /// Raw reply, serialized.
    pub response: String,
}

pub struct DecisionEngine {
    provider: Arc<dyn LlmProvider>,
    call: CallConfig,
    tools: Vec<ToolDef>,
    system_prompt: String,
    history_window: usize,
    retry_backoff: Duration,
    events: EventBus,
}

impl DecisionEngine {
    /// Temperature is pinned to 0 whatever the provider config says.
    pub fn new(provider: Arc<dyn LlmProvider>, call: CallConfig) -> WebClawResult<Self> {
        Ok(Self {
            provider,
            call: CallConfig {
                temperature: 0.0,
                ..call
            },
            tools: load_action_tools()?,
            system_prompt: SYSTEM_PROMPT.to_string(),
            history_window: 15,
            retry_backoff: Duration::ZERO,
            events: EventBus::new(),
        })
    }

    pub fn from_registry(registry: &ProviderRegistry) -> WebClawResult<Self> {
        let (provider, call) = registry.call_config_for_role(DECISION_ROLE)?;
        Self::new(provider, call)
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Base delay between transient retries, doubled on each further retry.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Bus that streamed reply chunks are forwarded to.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn call_config(&self) -> &CallConfig {
        &self.call
    }

    /// Asks the model for the next actions.
    ///
    /// Returns `Ok(None)` without any request when no credential is configured;
    /// the reason goes to `on_error`. Transient failures are reported to
    /// `on_error` and retried up to `max_attempts` times; anything else aborts.
    ///
    /// Also returns `Ok(None)` once `ctx` is no longer active: no new attempt
    /// starts and a pending backoff ends early. An in-flight call is not cancelled.
    pub async fn decide(
        &self,
        inputs: &PromptInputs<'_>,
        max_attempts: u32,
        on_error: &ErrorCallback,
        ctx: &TaskContext,
    ) -> WebClawResult<Option<Decision>> {
        if inputs.instructions.trim().is_empty() {
            return Err(WebClawError::InvalidInput("task instructions are empty".into()));
        }

        let prompt = format_prompt(inputs, self.history_window);

        if !self.provider.has_credential() {
            let message = format!("No API key found for provider '{}'", self.provider.name());
            tracing::warn!(provider = %self.provider.name(), "decision skipped: no credential");
            on_error(&message);
            return Ok(None);
        }

        let messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(prompt.clone()),
        ];
        let attempts = max_attempts.max(1);

        for attempt in 1..=attempts {
            if ctx.is_stopped() {
                tracing::info!(attempt, status = ?ctx.status(), "decision abandoned: task stopped");
                return Ok(None);
            }
            tracing::info!(
                provider = %self.provider.name(),
                model = %self.call.model,
                attempt,
                history = inputs.history.len(),
                "performing decision query"
            );

            match self
                .provider
                .chat(messages.clone(), self.tools.clone(), &self.call, &self.events)
                .await
            {
                Ok(response) => return Ok(Some(build_decision(prompt, response)?)),
                Err(LlmError::Transient(message)) => {
                    tracing::warn!(attempt, error = %message, "transient decision failure");
                    on_error(&message);
                    if attempt < attempts && !self.retry_backoff.is_zero() {
                        let factor = 1u32 << (attempt - 1).min(16);
                        if !ctx.sleep_unless_stopped(self.retry_backoff * factor).await {
                            tracing::info!(attempt, "retry backoff interrupted");
                            return Ok(None);
                        }
                    }
                }
                Err(fatal) => {
                    tracing::error!(attempt, error = %fatal, "fatal decision failure");
                    return Err(fatal.into());
                }
            }
        }

        Err(WebClawError::AttemptsExhausted { attempts })
    }
}

fn build_decision(prompt: String, response: LlmResponse) -> WebClawResult<Decision> {
    let usage = response.total_tokens;
    let proposals = response
        .tool_calls
        .iter()
        .map(|tc| parse_tool_call(tc, usage))
        .collect();
    Ok(Decision {
        proposals,
        usage,
        prompt,
        response: serde_json::to_string(&response)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Local;

    use super::*;
    use crate::agent_engine::actions::{Action, ClickArgs};
    use crate::agent_engine::state::TaskStatus;
    use crate::llm::types::{FunctionCall, ToolCall};

    struct ScriptedProvider {
        key: bool,
        replies: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
        calls: AtomicUsize,
        seen_temperature: Mutex<Option<f64>>,
    }

    impl ScriptedProvider {
        fn new(key: bool, replies: Vec<Result<LlmResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                key,
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                seen_temperature: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn has_credential(&self) -> bool {
            self.key
        }

        async fn chat(
            &self,
            _messages: Vec<ChatMessage>,
            _tools: Vec<ToolDef>,
            cfg: &CallConfig,
            _events: &EventBus,
        ) -> Result<LlmResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_temperature.lock().unwrap() = Some(cfg.temperature);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::FatalProtocol("script exhausted".into())))
        }
    }

    fn click_reply(id: u32) -> LlmResponse {
        LlmResponse {
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: "click".into(),
                    arguments: format!(r#"{{"thought":"press Apply","element_id":{id}}}"#),
                },
            }],
            total_tokens: Some(120),
            ..Default::default()
        }
    }

    fn engine(provider: Arc<ScriptedProvider>) -> DecisionEngine {
        let call = CallConfig {
            model: "m".into(),
            stream: false,
            temperature: 0.7,
        };
        DecisionEngine::new(provider, call).unwrap()
    }

    fn recorder() -> (ErrorCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ErrorCallback = Arc::new(move |msg: &str| sink.lock().unwrap().push(msg.to_string()));
        (cb, seen)
    }

    fn inputs(instructions: &str) -> PromptInputs<'_> {
        PromptInputs {
            instructions,
            resume: None,
            memory: None,
            now: Local::now(),
            snapshot: "<button id=7>Apply</button>",
            history: &[],
        }
    }

    fn running() -> TaskContext {
        let ctx = TaskContext::new();
        ctx.set_status(TaskStatus::Running);
        ctx
    }

    #[tokio::test]
    async fn single_click_scenario() {
        let provider = ScriptedProvider::new(true, vec![Ok(click_reply(7))]);
        let (cb, errors) = recorder();
        let decision = engine(provider.clone())
            .decide(&inputs("Apply to job X"), 3, &cb, &running())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(decision.proposals.len(), 1);
        assert_eq!(
            decision.proposals[0].action,
            Action::Click(ClickArgs { element_id: 7 })
        );
        assert_eq!(decision.usage, Some(120));
        assert!(decision.prompt.contains("Apply to job X"));
        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(*provider.seen_temperature.lock().unwrap(), Some(0.0));
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let provider = ScriptedProvider::new(
            true,
            vec![
                Err(LlmError::Transient("server error".into())),
                Err(LlmError::Transient("server error again".into())),
                Ok(click_reply(7)),
            ],
        );
        let (cb, errors) = recorder();
        let decision = engine(provider.clone())
            .decide(&inputs("Apply to job X"), 3, &cb, &running())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            *errors.lock().unwrap(),
            vec!["server error".to_string(), "server error again".to_string()]
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(decision.proposals[0].thought.as_deref(), Some("press Apply"));
    }

    #[tokio::test]
    async fn fatal_failure_aborts_without_retry() {
        let provider = ScriptedProvider::new(
            true,
            vec![
                Err(LlmError::FatalInput("Incorrect API key provided".into())),
                Ok(click_reply(7)),
            ],
        );
        let (cb, errors) = recorder();
        let err = engine(provider.clone())
            .decide(&inputs("Apply to job X"), 3, &cb, &running())
            .await
            .unwrap_err();

        assert!(matches!(err, WebClawError::Llm(LlmError::FatalInput(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausting_attempts_names_the_count() {
        let provider = ScriptedProvider::new(
            true,
            (0..3).map(|_| Err(LlmError::Transient("overloaded".into()))).collect(),
        );
        let (cb, errors) = recorder();
        let err = engine(provider)
            .decide(&inputs("Apply to job X"), 3, &cb, &running())
            .await
            .unwrap_err();

        assert!(matches!(err, WebClawError::AttemptsExhausted { attempts: 3 }));
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(errors.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_credential_skips_the_network() {
        let provider = ScriptedProvider::new(false, vec![Ok(click_reply(7))]);
        let (cb, errors) = recorder();
        let result = engine(provider.clone())
            .decide(&inputs("Apply to job X"), 3, &cb, &running())
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(errors.lock().unwrap()[0].contains("No API key found"));
    }

    #[tokio::test]
    async fn empty_instructions_are_rejected() {
        let provider = ScriptedProvider::new(true, vec![Ok(click_reply(7))]);
        let (cb, _) = recorder();
        let err = engine(provider.clone())
            .decide(&inputs("   "), 3, &cb, &running())
            .await
            .unwrap_err();
        assert!(matches!(err, WebClawError::InvalidInput(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_retries() {
        let provider = ScriptedProvider::new(
            true,
            vec![
                Err(LlmError::Transient("busy".into())),
                Err(LlmError::Transient("busy".into())),
                Ok(click_reply(1)),
            ],
        );
        let (cb, _) = recorder();
        let engine = engine(provider).with_retry_backoff(Duration::from_millis(100));
        let started = tokio::time::Instant::now();
        engine.decide(&inputs("go"), 3, &cb, &running()).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_cuts_backoff_short() {
        let provider = ScriptedProvider::new(
            true,
            (0..3).map(|_| Err(LlmError::Transient("busy".into()))).collect(),
        );
        let (cb, errors) = recorder();
        let engine = engine(provider.clone()).with_retry_backoff(Duration::from_secs(60));
        let ctx = running();
        let interrupter = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            interrupter.interrupt();
        });

        let started = tokio::time::Instant::now();
        let result = engine.decide(&inputs("go"), 3, &cb, &ctx).await.unwrap();

        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stopped_task_starts_no_attempt() {
        let provider = ScriptedProvider::new(true, vec![Ok(click_reply(7))]);
        let (cb, _) = recorder();
        let ctx = TaskContext::new();
        ctx.set_status(TaskStatus::Interrupted);
        let result = engine(provider.clone())
            .decide(&inputs("go"), 3, &cb, &ctx)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
