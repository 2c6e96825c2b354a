// File tools: the four model-facing capabilities, each one sandbox primitive.
use crate::sandbox::{SandboxError, SandboxHandle};
use crate::schemas::FileTool;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct LocationArgs {
    location: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    location: String,
    content: String,
}

/// A parsed, validated invocation ready to run against a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToolInvocation {
    pub tool: FileTool,
    pub location: String,
    pub content: Option<String>,
}

impl FileToolInvocation {
    pub fn parse(tool: FileTool, arguments: &Value) -> Result<Self, ToolError> {
        let parsed = match tool {
            FileTool::CreateFile | FileTool::UpdateFile => {
                let args: WriteArgs = serde_json::from_value(arguments.clone())
                    .map_err(|err| ToolError::InvalidArguments(err.to_string()))?;
                (args.location, Some(args.content))
            }
            FileTool::DeleteFile | FileTool::ReadFile => {
                let args: LocationArgs = serde_json::from_value(arguments.clone())
                    .map_err(|err| ToolError::InvalidArguments(err.to_string()))?;
                (args.location, None)
            }
        };
        let location = parsed.0.trim().to_string();
        if location.is_empty() {
            return Err(ToolError::InvalidArguments(
                "location must not be empty".to_string(),
            ));
        }
        Ok(Self {
            tool,
            location,
            content: parsed.1,
        })
    }

    pub fn describe(&self) -> String {
        self.tool.describe(&self.location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    InvalidArguments(String),
    Sandbox(SandboxError),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::InvalidArguments(detail) => write!(f, "invalid arguments: {detail}"),
            ToolError::Sandbox(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// The four tools bound to one live sandbox.
#[derive(Clone)]
pub struct ToolDispatcher {
    sandbox: Arc<dyn SandboxHandle>,
}

impl ToolDispatcher {
    pub fn bind(sandbox: Arc<dyn SandboxHandle>) -> Self {
        Self { sandbox }
    }

    pub fn sandbox_id(&self) -> &str {
        self.sandbox.id()
    }

    /// Runs one invocation and returns the observation fed back to the model.
    pub async fn dispatch(&self, invocation: &FileToolInvocation) -> Result<String, ToolError> {
        let location = invocation.location.as_str();
        match invocation.tool {
            FileTool::CreateFile => {
                let content = invocation.content.as_deref().unwrap_or_default();
                self.sandbox
                    .write_file(location, content)
                    .await
                    .map_err(ToolError::Sandbox)?;
                Ok(format!("File created at {location}"))
            }
            FileTool::UpdateFile => {
                let content = invocation.content.as_deref().unwrap_or_default();
                self.sandbox
                    .write_file(location, content)
                    .await
                    .map_err(ToolError::Sandbox)?;
                Ok(format!("File updated at {location}"))
            }
            FileTool::DeleteFile => match self.sandbox.remove(location).await {
                Ok(()) => Ok(format!("File deleted at {location}")),
                Err(SandboxError::NotFound(_)) => Ok(format!("File already absent at {location}")),
                Err(err) => Err(ToolError::Sandbox(err)),
            },
            FileTool::ReadFile => self
                .sandbox
                .read_file(location)
                .await
                .map_err(ToolError::Sandbox),
        }
    }
}

/// OpenAI function-tool definitions for the four capabilities.
pub fn tool_definitions() -> Vec<Value> {
    FileTool::ALL.iter().map(|tool| tool_definition(*tool)).collect()
}

fn tool_definition(tool: FileTool) -> Value {
    let location = json!({
        "type": "string",
        "description": "Absolute path of the file inside the sandbox, e.g. /home/user/pages/index.tsx",
    });
    let (description, parameters) = match tool {
        FileTool::CreateFile => (
            "Create a new file at the given location with the given content. Overwrites an existing file.",
            json!({
                "type": "object",
                "properties": {
                    "location": location,
                    "content": { "type": "string", "description": "Full file content" },
                },
                "required": ["location", "content"],
            }),
        ),
        FileTool::UpdateFile => (
            "Replace the whole content of the file at the given location.",
            json!({
                "type": "object",
                "properties": {
                    "location": location,
                    "content": { "type": "string", "description": "New full file content" },
                },
                "required": ["location", "content"],
            }),
        ),
        FileTool::DeleteFile => (
            "Delete the file at the given location.",
            json!({
                "type": "object",
                "properties": { "location": location },
                "required": ["location"],
            }),
        ),
        FileTool::ReadFile => (
            "Read and return the content of the file at the given location.",
            json!({
                "type": "object",
                "properties": { "location": location },
                "required": ["location"],
            }),
        ),
    };
    json!({
        "type": "function",
        "function": {
            "name": tool.model_name(),
            "description": description,
            "parameters": parameters,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::local::MemorySandboxProvider;
    use crate::sandbox::SandboxProvider;

    async fn dispatcher() -> ToolDispatcher {
        let provider = MemorySandboxProvider::new("e2b.app".to_string());
        ToolDispatcher::bind(provider.create().await.expect("create sandbox"))
    }

    fn invocation(tool: FileTool, args: Value) -> FileToolInvocation {
        FileToolInvocation::parse(tool, &args).expect("parse")
    }

    #[tokio::test]
    async fn update_twice_is_idempotent_on_content() {
        let tools = dispatcher().await;
        let update = invocation(
            FileTool::UpdateFile,
            json!({"location": "/home/user/a.txt", "content": "same"}),
        );
        assert_eq!(
            tools.dispatch(&update).await,
            Ok("File updated at /home/user/a.txt".to_string())
        );
        tools.dispatch(&update).await.expect("second update");
        let read = invocation(FileTool::ReadFile, json!({"location": "/home/user/a.txt"}));
        assert_eq!(tools.dispatch(&read).await, Ok("same".to_string()));
    }

    #[tokio::test]
    async fn delete_of_absent_file_is_a_no_op() {
        let tools = dispatcher().await;
        let delete = invocation(FileTool::DeleteFile, json!({"location": "/home/user/gone.txt"}));
        assert_eq!(
            tools.dispatch(&delete).await,
            Ok("File already absent at /home/user/gone.txt".to_string())
        );
    }

    #[tokio::test]
    async fn read_of_missing_file_is_an_error() {
        let tools = dispatcher().await;
        let read = invocation(FileTool::ReadFile, json!({"location": "/home/user/none"}));
        assert!(matches!(
            tools.dispatch(&read).await,
            Err(ToolError::Sandbox(SandboxError::NotFound(_)))
        ));
    }

    #[test]
    fn arguments_are_validated() {
        assert!(matches!(
            FileToolInvocation::parse(FileTool::CreateFile, &json!({"location": "/a"})),
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            FileToolInvocation::parse(FileTool::ReadFile, &json!({"location": "  "})),
            Err(ToolError::InvalidArguments(_))
        ));
        let parsed = FileToolInvocation::parse(
            FileTool::DeleteFile,
            &json!({"location": " /home/user/x "}),
        )
        .expect("parse");
        assert_eq!(parsed.location, "/home/user/x");
        assert_eq!(parsed.describe(), "deleting file /home/user/x");
    }

    #[test]
    fn definitions_cover_all_tools() {
        let names = tool_definitions()
            .iter()
            .filter_map(|item| item["function"]["name"].as_str().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["createFile", "updateFile", "deleteFile", "readFile"]);
    }
}
