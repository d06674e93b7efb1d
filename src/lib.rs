pub mod agent_engine;
pub mod config;
pub mod environment;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod page;

use std::sync::Arc;

use crate::agent_engine::context::TaskContext;
use crate::agent_engine::decision::DecisionEngine;
use crate::agent_engine::orchestrator::TaskOrchestrator;
use crate::config::AppConfig;
use crate::environment::Environment;
use crate::errors::WebClawResult;
use crate::executor::dispatcher::ActionExecutor;
use crate::llm::registry::ProviderRegistry;
use crate::page::traits::SnapshotProvider;

/// Installs the global `tracing` subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Loaded configuration plus the provider registry built from it.
pub struct Runtime {
    pub config: AppConfig,
    pub registry: ProviderRegistry,
}

impl Runtime {
    pub fn from_config(config: AppConfig) -> Self {
        let registry = ProviderRegistry::from_config(&config);
        Self { config, registry }
    }

    pub fn decision_engine(&self) -> WebClawResult<DecisionEngine> {
        let engine = DecisionEngine::from_registry(&self.registry)?;
        Ok(match &self.config.prompts.system {
            Some(system) => engine.with_system_prompt(system.clone()),
            None => engine,
        })
    }

    /// Wires an orchestrator for `ctx` around the caller's page collaborators.
    pub fn orchestrator(
        &self,
        ctx: TaskContext,
        snapshots: Arc<dyn SnapshotProvider>,
        executor: Arc<dyn ActionExecutor>,
        environment: Arc<dyn Environment>,
    ) -> WebClawResult<TaskOrchestrator> {
        Ok(TaskOrchestrator::new(
            ctx,
            self.decision_engine()?,
            snapshots,
            executor,
            environment,
            self.config.agent.clone(),
        ))
    }
}

/// Tracing, `.env`, then `config.toml`.
pub fn bootstrap() -> WebClawResult<Runtime> {
    init_tracing();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let config = config::load_config()?;
    tracing::info!(
        provider = %config.llm.active_provider,
        step_budget = config.agent.step_budget,
        "webclaw runtime ready"
    );
    Ok(Runtime::from_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderEntry;

    #[test]
    fn runtime_wires_decision_role_from_config() {
        let mut config = AppConfig::default();
        config.llm.active_provider = "local".into();
        config.llm.providers.insert(
            "local".into(),
            ProviderEntry {
                display_name: "Local".into(),
                api_base: "http://127.0.0.1:8080/v1/chat/completions".into(),
                model: "tiny".into(),
                temperature: 0.9,
                api_key: Some("sk-local".into()),
            },
        );
        config.prompts.system = Some("Be terse.".into());

        let runtime = Runtime::from_config(config);
        let engine = runtime.decision_engine().unwrap();
        assert_eq!(engine.call_config().model, "tiny");
        assert_eq!(engine.call_config().temperature, 0.0);
    }

    #[test]
    fn runtime_without_providers_cannot_decide() {
        let runtime = Runtime::from_config(AppConfig::default());
        assert!(runtime.decision_engine().is_err());
    }
}
