// Conversation store: async facade over the blocking storage backend.
use crate::schemas::{ConversationEntryView, ProjectStatus};
use crate::storage::{
    ConversationEntryRecord, NewConversationEntry, ProjectRecord, StorageBackend, StorageError,
};
use anyhow::{anyhow, Result};
use std::sync::Arc;

/// Ordered log of one project plus its lifecycle state.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    pub entries: Vec<ConversationEntryRecord>,
    pub status: ProjectStatus,
    pub status_updated_at: f64,
    /// Id of the earliest entry, the prompt that created the project.
    pub chat_id: Option<String>,
    /// A run currently holds the project's lease.
    pub generation_active: bool,
}

impl ConversationLog {
    pub fn views(&self) -> Vec<ConversationEntryView> {
        self.entries.iter().map(entry_view).collect()
    }
}

pub fn entry_view(record: &ConversationEntryRecord) -> ConversationEntryView {
    ConversationEntryView {
        id: record.entry_id.clone(),
        from: record.originator,
        kind: record.kind,
        content: record.content.clone(),
        tool_call: record.tool,
        created_at: record.created_at,
    }
}

#[derive(Clone)]
pub struct ConversationStore {
    storage: Arc<dyn StorageBackend>,
}

impl ConversationStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    async fn blocking<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&dyn StorageBackend) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || job(storage.as_ref()))
            .await
            .map_err(|err| anyhow!("storage task join error: {err}"))?
    }

    pub async fn create_project(&self, project: ProjectRecord, prompt: String) -> Result<String> {
        self.blocking(move |storage| {
            storage.create_project(&project, &NewConversationEntry::user_text(prompt))
        })
        .await
    }

    pub async fn project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let project_id = project_id.to_string();
        self.blocking(move |storage| storage.get_project(&project_id))
            .await
    }

    pub async fn entry(&self, entry_id: &str) -> Result<Option<ConversationEntryRecord>> {
        let entry_id = entry_id.to_string();
        self.blocking(move |storage| storage.get_conversation_entry(&entry_id))
            .await
    }

    /// Tail insert. Fails with [`StorageError::ProjectNotFound`] for unknown projects.
    pub async fn append(&self, project_id: &str, entry: NewConversationEntry) -> Result<String> {
        let project_id = project_id.to_string();
        self.blocking(move |storage| storage.append_conversation_entry(&project_id, &entry))
            .await
    }

    pub async fn list_ordered(&self, project_id: &str) -> Result<ConversationLog> {
        let project_id = project_id.to_string();
        self.blocking(move |storage| {
            let project = storage
                .get_project(&project_id)?
                .ok_or_else(|| StorageError::ProjectNotFound(project_id.clone()))?;
            let entries = storage.list_conversation_entries(&project_id)?;
            let generation_active = storage.get_project_lease(&project_id)?.is_some();
            Ok(ConversationLog {
                chat_id: entries.first().map(|entry| entry.entry_id.clone()),
                entries,
                status: project.status,
                status_updated_at: project.status_updated_at,
                generation_active,
            })
        })
        .await
    }

    pub async fn begin_update(&self, project_id: &str, prompt: &str) -> Result<String> {
        let project_id = project_id.to_string();
        let prompt = prompt.to_string();
        self.blocking(move |storage| storage.begin_project_update(&project_id, &prompt))
            .await
    }

    pub async fn commit_run(
        &self,
        project_id: &str,
        entries: Vec<NewConversationEntry>,
        status: Option<ProjectStatus>,
    ) -> Result<Vec<String>> {
        let project_id = project_id.to_string();
        self.blocking(move |storage| storage.commit_generation_run(&project_id, &entries, status))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{EntryKind, FileTool, Originator};
    use crate::storage::SqliteStorage;

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = SqliteStorage::new(dir.path().join("h.db").to_string_lossy().to_string());
        (dir, ConversationStore::new(Arc::new(storage)))
    }

    fn project(project_id: &str) -> ProjectRecord {
        ProjectRecord {
            project_id: project_id.to_string(),
            title: "Landing page".to_string(),
            sandbox_id: "sbx".to_string(),
            status: ProjectStatus::Pending,
            created_at: 1.0,
            updated_at: 1.0,
            status_updated_at: 1.0,
        }
    }

    #[tokio::test]
    async fn list_ordered_is_stable_and_insertion_ordered() {
        let (_dir, store) = store();
        let chat_id = store
            .create_project(project("p1"), "make a landing page".to_string())
            .await
            .expect("create");
        store
            .append("p1", NewConversationEntry::assistant_text("On it."))
            .await
            .expect("append text");
        store
            .append(
                "p1",
                NewConversationEntry::assistant_tool(
                    FileTool::CreateFile,
                    "creating file /home/user/pages/index.tsx",
                ),
            )
            .await
            .expect("append tool");

        let first = store.list_ordered("p1").await.expect("list");
        let second = store.list_ordered("p1").await.expect("list again");
        let ids = |log: &ConversationLog| {
            log.entries
                .iter()
                .map(|entry| entry.entry_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.chat_id.as_deref(), Some(chat_id.as_str()));
        assert_eq!(first.status, ProjectStatus::Pending);
        assert!(!first.generation_active);
        let shape = first
            .entries
            .iter()
            .map(|entry| (entry.originator, entry.kind, entry.tool))
            .collect::<Vec<_>>();
        assert_eq!(
            shape,
            vec![
                (Originator::User, EntryKind::TextMessage, None),
                (Originator::Assistant, EntryKind::TextMessage, None),
                (
                    Originator::Assistant,
                    EntryKind::ToolCall,
                    Some(FileTool::CreateFile)
                ),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_project_is_reported() {
        let (_dir, store) = store();
        let err = store.list_ordered("missing").await.expect_err("missing");
        assert!(err.downcast_ref::<StorageError>().is_some());
    }

    #[tokio::test]
    async fn commit_rejects_status_regression_atomically() {
        let (_dir, store) = store();
        store
            .create_project(project("p1"), "prompt".to_string())
            .await
            .expect("create");
        store
            .commit_run("p1", Vec::new(), Some(ProjectStatus::Ready))
            .await
            .expect("ready");
        let err = store
            .commit_run(
                "p1",
                vec![NewConversationEntry::assistant_text("late")],
                Some(ProjectStatus::Pending),
            )
            .await
            .expect_err("regression");
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::StatusRegression { .. })
        ));
        let log = store.list_ordered("p1").await.expect("list");
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.status, ProjectStatus::Ready);
    }
}
