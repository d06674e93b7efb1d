use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::agent_engine::event_bus::{EventBus, TaskEvent};
use crate::errors::{classify_status, LlmError};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunk, StreamChunkKind, ToolCall,
    ToolDef,
};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
        events: &EventBus,
    ) -> Result<LlmResponse, LlmError> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(&tools)
                .map_err(|e| LlmError::FatalProtocol(e.to_string()))?;
            body["tool_choice"] = serde_json::json!("auto");
        }
        if cfg.stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            tools = tools.len(),
            "sending LLM request"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            let message = error_message(&err_body).unwrap_or(err_body);
            tracing::warn!(provider = %self.id, status = %status, "LLM request rejected");
            return Err(classify_status(status.as_u16(), format!("{status}: {message}")));
        }

        if cfg.stream {
            self.handle_stream(response, events).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Handle SSE streaming response.
    /// Forwards chunks to the event bus and accumulates the full response to return.
    async fn handle_stream(
        &self,
        response: reqwest::Response,
        events: &EventBus,
    ) -> Result<LlmResponse, LlmError> {
        let mut byte_stream = response.bytes_stream();
        // Raw bytes: a UTF-8 sequence may be split across network chunks.
        let mut line_buf: Vec<u8> = Vec::new();

        let mut resp_content = String::new();
        let mut resp_reasoning = String::new();
        let mut total_tokens = None;
        // Tool call accumulator: delta index → (id, type, name, accumulated_arguments)
        let mut tc_builders: BTreeMap<usize, (String, String, String, String)> = BTreeMap::new();
        let mut done_emitted = false;

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            line_buf.extend_from_slice(&bytes);

            while let Some(pos) = line_buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = line_buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match sse_parser::parse_sse_line(line) {
                    Ok(Some(chunk)) => {
                        let is_done = chunk.kind == StreamChunkKind::Done;
                        match chunk.kind {
                            StreamChunkKind::Reasoning => resp_reasoning.push_str(&chunk.content),
                            StreamChunkKind::Content => resp_content.push_str(&chunk.content),
                            StreamChunkKind::ToolCall => {
                                merge_tool_call_deltas(&chunk.content, &mut tc_builders)
                            }
                            StreamChunkKind::Usage => total_tokens = chunk.content.parse().ok(),
                            _ => {}
                        }

                        events.send(TaskEvent::LlmChunk { chunk });

                        if is_done {
                            done_emitted = true;
                            break 'stream;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!("SSE parse skipped: {e}");
                    }
                }
            }
        }

        // Fallback Done in case stream ended without [DONE] marker
        if !done_emitted {
            events.send(TaskEvent::LlmChunk {
                chunk: StreamChunk {
                    kind: StreamChunkKind::Done,
                    content: String::new(),
                },
            });
        }

        let tool_calls = build_tool_calls(tc_builders);

        tracing::info!(
            content_len = resp_content.len(),
            reasoning_len = resp_reasoning.len(),
            tool_calls = tool_calls.len(),
            tools = ?tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );

        Ok(LlmResponse {
            content: resp_content,
            reasoning: resp_reasoning,
            tool_calls,
            total_tokens,
        })
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(&self, response: reqwest::Response) -> Result<LlmResponse, LlmError> {
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::FatalProtocol(format!("undecodable reply: {e}")))?;

        let message = json["choices"]
            .as_array()
            .and_then(|c| c.first())
            .map(|choice| &choice["message"])
            .ok_or_else(|| LlmError::FatalProtocol("reply has no choices".into()))?;

        let content = message["content"].as_str().unwrap_or("").to_string();

        let tool_calls: Vec<ToolCall> = message["tool_calls"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|tc| ToolCall {
                        id: tc["id"].as_str().unwrap_or("").to_string(),
                        call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                        function: FunctionCall {
                            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                            arguments: tc["function"]["arguments"]
                                .as_str()
                                .unwrap_or("{}")
                                .to_string(),
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        let total_tokens = json["usage"]["total_tokens"]
            .as_u64()
            .and_then(|t| u32::try_from(t).ok());

        tracing::info!(
            content_len = content.len(),
            tool_calls = tool_calls.len(),
            total_tokens = ?total_tokens,
            "LLM JSON response received"
        );

        Ok(LlmResponse {
            content,
            reasoning: String::new(),
            tool_calls,
            total_tokens,
        })
    }
}

/// Pulls `error.message` out of an OpenAI-style error body.
fn error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json["error"]["message"].as_str().map(str::to_string)
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(
    chunk_content: &str,
    builders: &mut BTreeMap<usize, (String, String, String, String)>,
) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str().filter(|s| !s.is_empty()) {
            entry.0 = id.to_string();
        }
        if let Some(t) = delta["type"].as_str().filter(|s| !s.is_empty()) {
            entry.1 = t.to_string();
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            entry.2.push_str(name);
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

/// Convert accumulated tool-call builders into typed `ToolCall` structs.
fn build_tool_calls(builders: BTreeMap<usize, (String, String, String, String)>) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id,
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}
