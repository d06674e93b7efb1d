use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{WebClawError, WebClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config: LlmConfig::default(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> WebClawResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            WebClawError::Config(format!(
                "Active provider '{}' not found in registry",
                self.active
            ))
        })
    }

    pub fn set_active(&mut self, name: String) -> WebClawResult<()> {
        if self.providers.contains_key(&name) {
            self.active = name;
            Ok(())
        } else {
            Err(WebClawError::Config(format!("Provider '{name}' not registered")))
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Return the provider and call configuration for a named agent role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature, not streamed
    pub fn call_config_for_role(
        &self,
        role: &str,
    ) -> WebClawResult<(Arc<dyn LlmProvider>, CallConfig)> {
        if let Some(entry) = self.llm_config.roles.get(role) {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                WebClawError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role, entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.0)
            });
            tracing::debug!(
                role = role,
                provider = %entry.provider,
                model = %entry.model,
                stream = entry.stream,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature,
                },
            ));
        }

        let provider = self.get_active()?;
        let (model, temperature) = self
            .llm_config
            .providers
            .get(&self.active)
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.0));
        tracing::debug!(
            role = role,
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            provider,
            CallConfig {
                model,
                stream: false,
                temperature,
            },
        ))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `WEBCLAW_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("WEBCLAW_{}_API_KEY", id.to_uppercase()))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            let provider =
                OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        registry
    }
}
