use async_trait::async_trait;

use crate::agent_engine::event_bus::EventBus;
use crate::errors::LlmError;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, ToolDef};

/// Unified LLM provider trait. All providers implement this trait.
///
/// Implementations classify every failure into an [`LlmError`] variant
/// before returning it.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// Whether a credential is configured. Checked before any request is sent.
    fn has_credential(&self) -> bool;

    /// Sends one chat completion. Streaming providers forward chunks to `events`.
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
        events: &EventBus,
    ) -> Result<LlmResponse, LlmError>;
}
