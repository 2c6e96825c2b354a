use super::*;

pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const PROJECT_NOT_FOUND: &str = "PROJECT_NOT_FOUND";
pub const CHAT_NOT_FOUND: &str = "CHAT_NOT_FOUND";
pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
pub const PROJECT_BUSY: &str = "PROJECT_BUSY";
pub const UPSTREAM_UNAVAILABLE: &str = "UPSTREAM_UNAVAILABLE";
pub const PARTIAL_RUN_FAILURE: &str = "PARTIAL_RUN_FAILURE";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[derive(Debug)]
pub struct OrchestratorError {
    code: &'static str,
    message: String,
    detail: Option<Value>,
}

impl OrchestratorError {
    pub(super) fn new(code: &'static str, message: impl Into<String>, detail: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            detail,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(VALIDATION_ERROR, message, None)
    }

    pub(super) fn project_not_found(project_id: &str) -> Self {
        Self::new(
            PROJECT_NOT_FOUND,
            "Project Not Found",
            Some(json!({ "projectId": project_id })),
        )
    }

    pub(super) fn chat_not_found(chat_id: &str) -> Self {
        Self::new(
            CHAT_NOT_FOUND,
            "Chat Not Found",
            Some(json!({ "chatId": chat_id })),
        )
    }

    pub(super) fn file_not_found(path: &str) -> Self {
        Self::new(FILE_NOT_FOUND, "File Not Found", Some(json!({ "path": path })))
    }

    pub(super) fn project_busy(project_id: &str) -> Self {
        Self::new(
            PROJECT_BUSY,
            "Project Is Busy",
            Some(json!({ "projectId": project_id })),
        )
    }

    pub(super) fn sandbox_unavailable(detail: impl fmt::Display) -> Self {
        Self::new(
            UPSTREAM_UNAVAILABLE,
            "Sandbox Unavailable",
            Some(json!({ "upstream": "sandbox", "reason": detail.to_string() })),
        )
    }

    pub(super) fn model_unavailable(detail: impl fmt::Display) -> Self {
        Self::new(
            UPSTREAM_UNAVAILABLE,
            "Model Unavailable",
            Some(json!({ "upstream": "model", "reason": detail.to_string() })),
        )
    }

    pub(super) fn partial_run(detail: Value) -> Self {
        Self::new(PARTIAL_RUN_FAILURE, "Generation Interrupted", Some(detail))
    }

    pub(super) fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message, None)
    }

    /// Maps storage failures, keeping not-found distinct from everything else.
    pub(super) fn from_storage(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StorageError>() {
            Some(StorageError::ProjectNotFound(project_id)) => Self::project_not_found(project_id),
            Some(StorageError::StatusRegression { .. }) => Self::internal(err.to_string()),
            None => {
                error!("storage failure: {err:#}");
                Self::internal("Internal Server Error")
            }
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&Value> {
        self.detail.as_ref()
    }

    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(detail) = &self.detail {
            payload["detail"] = detail.clone();
        }
        payload
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OrchestratorError {}
