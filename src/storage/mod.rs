// Storage: project directory, append-only conversation log and per-project run leases.

mod sqlite;

use crate::config::StorageConfig;
use crate::schemas::{EntryKind, FileTool, Originator, ProjectStatus};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

pub use sqlite::SqliteStorage;

#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub project_id: String,
    pub title: String,
    pub sandbox_id: String,
    pub status: ProjectStatus,
    pub created_at: f64,
    pub updated_at: f64,
    pub status_updated_at: f64,
}

#[derive(Debug, Clone)]
pub struct ConversationEntryRecord {
    pub entry_id: String,
    pub project_id: String,
    pub seq: i64,
    pub originator: Originator,
    pub kind: EntryKind,
    pub content: String,
    pub tool: Option<FileTool>,
    pub created_at: f64,
}

/// An entry that has not been written yet. Ids and timestamps are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversationEntry {
    pub originator: Originator,
    pub kind: EntryKind,
    pub content: String,
    pub tool: Option<FileTool>,
}

impl NewConversationEntry {
    pub fn user_text(content: impl Into<String>) -> Self {
        Self {
            originator: Originator::User,
            kind: EntryKind::TextMessage,
            content: content.into(),
            tool: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            originator: Originator::Assistant,
            kind: EntryKind::TextMessage,
            content: content.into(),
            tool: None,
        }
    }

    pub fn assistant_tool(tool: FileTool, content: impl Into<String>) -> Self {
        Self {
            originator: Originator::Assistant,
            kind: EntryKind::ToolCall,
            content: content.into(),
            tool: Some(tool),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectLeaseRecord {
    pub project_id: String,
    pub token: String,
    pub acquired_at: f64,
    pub heartbeat_at: f64,
    pub expires_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectLeaseStatus {
    Acquired,
    Busy,
}

/// Typed storage failures the orchestrator maps onto request errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    ProjectNotFound(String),
    StatusRegression {
        project_id: String,
        from: ProjectStatus,
        to: ProjectStatus,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ProjectNotFound(project_id) => {
                write!(f, "project not found: {project_id}")
            }
            StorageError::StatusRegression {
                project_id,
                from,
                to,
            } => write!(
                f,
                "project {project_id} cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
        }
    }
}

impl std::error::Error for StorageError {}

pub trait StorageBackend: Send + Sync {
    fn ensure_initialized(&self) -> Result<()>;

    /// Persists the project and its first log entry in one transaction.
    /// Returns the id of the first entry.
    fn create_project(&self, project: &ProjectRecord, first: &NewConversationEntry)
        -> Result<String>;
    fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>>;

    fn append_conversation_entry(
        &self,
        project_id: &str,
        entry: &NewConversationEntry,
    ) -> Result<String>;
    fn get_conversation_entry(&self, entry_id: &str) -> Result<Option<ConversationEntryRecord>>;
    fn list_conversation_entries(&self, project_id: &str) -> Result<Vec<ConversationEntryRecord>>;
    /// Flips the project to UPDATING and appends the user's prompt atomically.
    fn begin_project_update(&self, project_id: &str, prompt: &str) -> Result<String>;
    /// Appends a run's entries and optionally moves the status, all or nothing.
    fn commit_generation_run(
        &self,
        project_id: &str,
        entries: &[NewConversationEntry],
        status: Option<ProjectStatus>,
    ) -> Result<Vec<String>>;

    fn try_acquire_project_lease(
        &self,
        project_id: &str,
        token: &str,
        ttl_s: f64,
    ) -> Result<ProjectLeaseStatus>;
    fn touch_project_lease(&self, project_id: &str, token: &str, ttl_s: f64) -> Result<bool>;
    fn release_project_lease(&self, project_id: &str, token: &str) -> Result<()>;
    fn get_project_lease(&self, project_id: &str) -> Result<Option<ProjectLeaseRecord>>;
}

pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let storage = SqliteStorage::new(config.db_path.trim().to_string());
    storage.ensure_initialized()?;
    Ok(Arc::new(storage))
}
