// API payloads and the closed vocabularies shared by storage, orchestrator and HTTP layer.
use serde::{Deserialize, Serialize};

/// Project lifecycle. Never moves back to `Pending` once it has left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Pending,
    Updating,
    Ready,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Pending => "PENDING",
            ProjectStatus::Updating => "UPDATING",
            ProjectStatus::Ready => "READY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(ProjectStatus::Pending),
            "UPDATING" => Some(ProjectStatus::Updating),
            "READY" => Some(ProjectStatus::Ready),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        match next {
            ProjectStatus::Pending => self == ProjectStatus::Pending,
            ProjectStatus::Updating | ProjectStatus::Ready => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Originator {
    User,
    Assistant,
}

impl Originator {
    pub fn as_str(self) -> &'static str {
        match self {
            Originator::User => "USER",
            Originator::Assistant => "ASSISTANT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "USER" => Some(Originator::User),
            "ASSISTANT" => Some(Originator::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    TextMessage,
    ToolCall,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::TextMessage => "TEXT_MESSAGE",
            EntryKind::ToolCall => "TOOL_CALL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TEXT_MESSAGE" => Some(EntryKind::TextMessage),
            "TOOL_CALL" => Some(EntryKind::ToolCall),
            _ => None,
        }
    }
}

/// The four file capabilities exposed to the model.
///
/// The model addresses them by camelCase name (`createFile`), the log records
/// them by their persisted tag (`WRITE_FILE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileTool {
    #[serde(rename = "WRITE_FILE")]
    CreateFile,
    #[serde(rename = "UPDATE_FILE")]
    UpdateFile,
    #[serde(rename = "DELETE_FILE")]
    DeleteFile,
    #[serde(rename = "READ_FILE")]
    ReadFile,
}

impl FileTool {
    pub const ALL: [FileTool; 4] = [
        FileTool::CreateFile,
        FileTool::UpdateFile,
        FileTool::DeleteFile,
        FileTool::ReadFile,
    ];

    pub fn from_model_name(name: &str) -> Option<Self> {
        match name.trim() {
            "createFile" => Some(FileTool::CreateFile),
            "updateFile" => Some(FileTool::UpdateFile),
            "deleteFile" => Some(FileTool::DeleteFile),
            "readFile" => Some(FileTool::ReadFile),
            _ => None,
        }
    }

    pub fn model_name(self) -> &'static str {
        match self {
            FileTool::CreateFile => "createFile",
            FileTool::UpdateFile => "updateFile",
            FileTool::DeleteFile => "deleteFile",
            FileTool::ReadFile => "readFile",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileTool::CreateFile => "WRITE_FILE",
            FileTool::UpdateFile => "UPDATE_FILE",
            FileTool::DeleteFile => "DELETE_FILE",
            FileTool::ReadFile => "READ_FILE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WRITE_FILE" => Some(FileTool::CreateFile),
            "UPDATE_FILE" => Some(FileTool::UpdateFile),
            "DELETE_FILE" => Some(FileTool::DeleteFile),
            "READ_FILE" => Some(FileTool::ReadFile),
            _ => None,
        }
    }

    /// Human readable log line for an executed invocation.
    pub fn describe(self, location: &str) -> String {
        match self {
            FileTool::CreateFile => format!("creating file {location}"),
            FileTool::UpdateFile => format!("updating file {location}"),
            FileTool::DeleteFile => format!("deleting file {location}"),
            FileTool::ReadFile => format!("reading file {location}"),
        }
    }

    pub fn mutates(self) -> bool {
        !matches!(self, FileTool::ReadFile)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.total += other.total;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectResponse {
    pub project_id: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProjectRequest {
    pub project_id: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub project_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectQuery {
    pub project_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContentQuery {
    pub project_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectUrlResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntryView {
    pub id: String,
    pub from: Originator,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<FileTool>,
    pub created_at: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHistoryResponse {
    pub conversation_history: Vec<ConversationEntryView>,
    pub project_status: ProjectStatus,
    pub status_updated_at: f64,
    pub chat_id: Option<String>,
    pub generation_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntryView {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileEntryView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContentResponse {
    pub content: String,
}
