// Application state: builds storage, sandbox provider and model client once at startup.
use crate::config::{Config, LlmModelConfig};
use crate::config_store::ConfigStore;
use crate::llm::{build_llm_client, is_llm_configured, ChatModel};
use crate::orchestrator::Orchestrator;
use crate::sandbox::{build_sandbox_provider, SandboxProvider};
use crate::storage::{build_storage, StorageBackend};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config_store: ConfigStore,
    pub storage: Arc<dyn StorageBackend>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config_store: ConfigStore, config: Config) -> Result<Self> {
        let storage = build_storage(&config.storage).context("open project storage")?;
        let sandboxes =
            build_sandbox_provider(&config.sandbox).context("build sandbox provider")?;
        let (model_name, model_config) = config.default_llm_model().unwrap_or_else(|| {
            warn!("no llm model configured, falling back to provider defaults");
            ("default".to_string(), LlmModelConfig::default())
        });
        if !is_llm_configured(&model_config) {
            warn!(model = %model_name, "llm model is missing base_url or model name");
        }
        let model = build_llm_client(&model_config).context("build llm client")?;
        info!(
            model = %model_name,
            sandbox_mode = %config.sandbox.mode,
            "application state initialised"
        );
        Ok(Self::with_components(
            config_store,
            &config,
            storage,
            sandboxes,
            Arc::new(model),
        ))
    }

    /// Wires already-built components; used directly by tests.
    pub fn with_components(
        config_store: ConfigStore,
        config: &Config,
        storage: Arc<dyn StorageBackend>,
        sandboxes: Arc<dyn SandboxProvider>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            config_store.clone(),
            config,
            storage.clone(),
            sandboxes,
            model,
        ));
        Self {
            config_store,
            storage,
            orchestrator,
        }
    }
}
