// Orchestrator: project directory, per-project lease and the bounded tool-calling run.
use crate::config::{Config, GenerationConfig, SandboxConfig};
use crate::config_store::ConfigStore;
use crate::history::{ConversationLog, ConversationStore};
use crate::llm::{ChatMessage, ChatModel, LlmResponse};
use crate::sandbox::{self, SandboxEntry, SandboxError, SandboxHandle, SandboxProvider};
use crate::schemas::{EntryKind, FileTool, Originator, ProjectStatus, TokenUsage};
use crate::storage::{
    NewConversationEntry, ProjectLeaseStatus, ProjectRecord, StorageBackend, StorageError,
};
use crate::tools::{tool_definitions, FileToolInvocation, ToolDispatcher, ToolError};
use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod constants;
mod error;
mod execute;
mod limiter;
mod project;
mod prompt;
mod tool_calls;

use constants::{
    FAILED_TOOL_SUFFIX, MAX_STEPS, MIN_LEASE_HEARTBEAT_S, MIN_LEASE_TTL_S, TITLE_FALLBACK,
    TOOL_CALL_ID_PREFIX, TOOL_ERROR_PREFIX,
};
pub use error::OrchestratorError;
pub use execute::GenerationOutcome;
use limiter::ProjectLimiter;
pub use project::CreatedProject;
use tool_calls::{collect_tool_calls_from_output, compile_regex, strip_tool_calls, ToolCall};

#[derive(Clone)]
pub struct Orchestrator {
    config_store: ConfigStore,
    store: ConversationStore,
    sandboxes: Arc<dyn SandboxProvider>,
    model: Arc<dyn ChatModel>,
    limiter: ProjectLimiter,
}

impl Orchestrator {
    pub fn new(
        config_store: ConfigStore,
        config: &Config,
        storage: Arc<dyn StorageBackend>,
        sandboxes: Arc<dyn SandboxProvider>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config_store,
            limiter: ProjectLimiter::new(storage.clone(), &config.generation),
            store: ConversationStore::new(storage),
            sandboxes,
            model,
        }
    }
}
