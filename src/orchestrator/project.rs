use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedProject {
    pub project_id: String,
    /// Entry id of the prompt; the handle a client passes to generate.
    pub chat_id: String,
}

impl Orchestrator {
    /// Allocates a sandbox, names the project and records the prompt. Generation
    /// is a separate call.
    pub async fn create_project(&self, prompt: &str) -> Result<CreatedProject, OrchestratorError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(OrchestratorError::validation("Invalid Request Body"));
        }
        let config = self.config_store.get().await;
        let sandbox = self.sandboxes.create().await.map_err(|err| {
            warn!("sandbox allocation failed: {err}");
            OrchestratorError::sandbox_unavailable(err)
        })?;
        let title = self
            .derive_title(prompt, config.generation.title_max_chars)
            .await;

        let now = now_ts();
        let project_id = format!("proj_{}", Uuid::new_v4().simple());
        let record = ProjectRecord {
            project_id: project_id.clone(),
            title,
            sandbox_id: sandbox.id().to_string(),
            status: ProjectStatus::Pending,
            created_at: now,
            updated_at: now,
            status_updated_at: now,
        };
        let chat_id = self
            .store
            .create_project(record, prompt.to_string())
            .await
            .map_err(|err| {
                warn!(
                    sandbox_id = sandbox.id(),
                    "project persistence failed after sandbox allocation"
                );
                OrchestratorError::from_storage(err)
            })?;
        info!(
            project_id = %project_id,
            sandbox_id = sandbox.id(),
            "project created"
        );
        Ok(CreatedProject {
            project_id,
            chat_id,
        })
    }

    async fn derive_title(&self, prompt: &str, max_chars: usize) -> String {
        match self.model.complete(&prompt::title_messages(prompt)).await {
            Ok(response) => {
                if let Some(title) = prompt::clean_title(&response.content, max_chars) {
                    return title;
                }
                warn!("title model returned no usable text, using prompt");
            }
            Err(err) => warn!("title derivation failed, using prompt: {err}"),
        }
        prompt::fallback_title(prompt, max_chars)
    }

    pub async fn resolve_project(&self, project_id: &str) -> Result<ProjectRecord, OrchestratorError> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(OrchestratorError::validation("Invalid Request Body"));
        }
        self.store
            .project(project_id)
            .await
            .map_err(OrchestratorError::from_storage)?
            .ok_or_else(|| OrchestratorError::project_not_found(project_id))
    }

    pub async fn project_url(&self, project_id: &str) -> Result<String, OrchestratorError> {
        let project = self.resolve_project(project_id).await?;
        let config = self.config_store.get().await;
        Ok(public_url(&project.sandbox_id, &config.sandbox))
    }

    pub async fn conversation(&self, project_id: &str) -> Result<ConversationLog, OrchestratorError> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(OrchestratorError::validation("Invalid Request Body"));
        }
        self.store
            .list_ordered(project_id)
            .await
            .map_err(OrchestratorError::from_storage)
    }

    /// Project files below the sandbox root, minus build and dependency folders.
    pub async fn list_files(&self, project_id: &str) -> Result<Vec<SandboxEntry>, OrchestratorError> {
        let project = self.resolve_project(project_id).await?;
        let config = self.config_store.get().await;
        let handle = self.reconnect(&project).await?;
        let root = config.sandbox.project_root.as_str();
        let entries = handle
            .list(root, config.sandbox.list_depth)
            .await
            .map_err(|err| match err {
                SandboxError::NotFound(_) => OrchestratorError::file_not_found(root),
                other => OrchestratorError::sandbox_unavailable(other),
            })?;
        Ok(sandbox::filter_project_entries(
            entries,
            root,
            &config.sandbox.ignore_dirs,
        ))
    }

    pub async fn read_file(&self, project_id: &str, path: &str) -> Result<String, OrchestratorError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(OrchestratorError::validation("Invalid Request Body"));
        }
        let project = self.resolve_project(project_id).await?;
        let config = self.config_store.get().await;
        let location = resolve_location(&config.sandbox.project_root, path);
        let handle = self.reconnect(&project).await?;
        handle.read_file(&location).await.map_err(|err| match err {
            SandboxError::NotFound(_) => OrchestratorError::file_not_found(&location),
            other => OrchestratorError::sandbox_unavailable(other),
        })
    }

    pub(super) async fn reconnect(
        &self,
        project: &ProjectRecord,
    ) -> Result<Arc<dyn SandboxHandle>, OrchestratorError> {
        self.sandboxes
            .connect(&project.sandbox_id)
            .await
            .map_err(|err| {
                warn!(
                    project_id = %project.project_id,
                    sandbox_id = %project.sandbox_id,
                    "sandbox reconnect failed: {err}"
                );
                OrchestratorError::sandbox_unavailable(err)
            })
    }
}

pub fn public_url(sandbox_id: &str, config: &SandboxConfig) -> String {
    sandbox::preview_url(sandbox_id, config.preview_port, &config.domain)
}

/// Relative paths are taken from the project root.
fn resolve_location(root: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        path.trim_start_matches("./")
    )
}

pub(super) fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
