use anyhow::anyhow;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use sandcastle_server::config::Config;
use sandcastle_server::config_store::ConfigStore;
use sandcastle_server::llm::{ChatMessage, ChatModel, LlmResponse};
use sandcastle_server::sandbox::local::MemorySandboxProvider;
use sandcastle_server::state::AppState;
use sandcastle_server::storage::{build_storage, ProjectLeaseStatus, StorageBackend};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Replays queued stream rounds; an exhausted script answers with plain text.
struct ScriptedModel {
    title: Mutex<Option<String>>,
    rounds: Mutex<VecDeque<Result<LlmResponse, String>>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedModel {
    fn new() -> Self {
        Self {
            title: Mutex::new(Some("Todo App".to_string())),
            rounds: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// The next stream round waits until the returned gate is notified.
    fn hold_next_round(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    fn push(&self, round: LlmResponse) {
        self.rounds.lock().push_back(Ok(round));
    }

    fn push_failure(&self, message: &str) {
        self.rounds.lock().push_back(Err(message.to_string()));
    }

    fn fail_titles(&self) {
        *self.title.lock() = None;
    }

    fn stream_calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> anyhow::Result<LlmResponse> {
        match self.title.lock().clone() {
            Some(title) => Ok(LlmResponse {
                content: title,
                ..LlmResponse::default()
            }),
            None => Err(anyhow!("title model offline")),
        }
    }

    async fn stream_with_tools(
        &self,
        messages: &[ChatMessage],
        _tools: &[Value],
        on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
    ) -> anyhow::Result<LlmResponse> {
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.seen.lock().push(messages.to_vec());
        let next = self.rounds.lock().pop_front();
        match next {
            Some(Ok(round)) => {
                on_delta(&round.content);
                Ok(round)
            }
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(text_round("Nothing left to do.")),
        }
    }
}

fn text_round(text: &str) -> LlmResponse {
    LlmResponse {
        content: text.to_string(),
        ..LlmResponse::default()
    }
}

fn tool_round(text: &str, calls: &[(&str, Value)]) -> LlmResponse {
    let payload = calls
        .iter()
        .enumerate()
        .map(|(index, (name, args))| {
            json!({
                "id": format!("call_{index}_{name}"),
                "type": "function",
                "function": { "name": name, "arguments": args.to_string() }
            })
        })
        .collect::<Vec<_>>();
    LlmResponse {
        content: text.to_string(),
        tool_calls: Some(Value::Array(payload)),
        ..LlmResponse::default()
    }
}

fn tool_call_block(name: &str, args: &Value) -> String {
    format!(
        "<tool_call>{}</tool_call>",
        json!({ "name": name, "arguments": args })
    )
}

fn create_file(path: &str, content: &str) -> (&'static str, Value) {
    ("createFile", json!({ "location": path, "content": content }))
}

struct Harness {
    _dir: tempfile::TempDir,
    app: Router,
    state: Arc<AppState>,
    model: Arc<ScriptedModel>,
    sandboxes: Arc<MemorySandboxProvider>,
    storage: Arc<dyn StorageBackend>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.storage.db_path = dir.path().join("flow.db").to_string_lossy().to_string();
    let storage = build_storage(&config.storage).expect("storage");
    let model = Arc::new(ScriptedModel::new());
    let sandboxes = Arc::new(MemorySandboxProvider::new(config.sandbox.domain.clone()));
    let state = AppState::with_components(
        ConfigStore::from_config(config.clone()),
        &config,
        storage.clone(),
        sandboxes.clone(),
        model.clone(),
    );
    let state = Arc::new(state);
    let app = sandcastle_server::build_router(state.clone(), &config.server.api_prefix);
    Harness {
        _dir: dir,
        app,
        state,
        model,
        sandboxes,
        storage,
    }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        self.send(request).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request");
        self.send(request).await
    }

    async fn create(&self, prompt: &str) -> (String, String) {
        let (status, body) = self
            .post("/api/project/create", json!({ "prompt": prompt }))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (
            body["projectId"].as_str().expect("projectId").to_string(),
            body["chatId"].as_str().expect("chatId").to_string(),
        )
    }

    async fn chats(&self, project_id: &str) -> Value {
        let (status, body) = self
            .get(&format!("/api/project/chats?projectId={project_id}"))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    fn sandbox_id(&self, project_id: &str) -> String {
        self.storage
            .get_project(project_id)
            .expect("project lookup")
            .expect("project exists")
            .sandbox_id
    }
}

fn entry_shapes(chats: &Value) -> Vec<(String, String, String)> {
    chats["conversationHistory"]
        .as_array()
        .expect("history")
        .iter()
        .map(|entry| {
            (
                entry["from"].as_str().unwrap_or_default().to_string(),
                entry["type"].as_str().unwrap_or_default().to_string(),
                entry["content"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn create_project_starts_pending_with_prompt_entry() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;

    let chats = h.chats(&project_id).await;
    assert_eq!(chats["projectStatus"], "PENDING");
    assert_eq!(chats["chatId"], json!(chat_id));
    assert_eq!(chats["generationActive"], json!(false));
    assert_eq!(
        entry_shapes(&chats),
        vec![(
            "USER".to_string(),
            "TEXT_MESSAGE".to_string(),
            "a todo app".to_string()
        )]
    );
    assert_eq!(chats["conversationHistory"][0]["id"], json!(chat_id));

    let project = h.storage.get_project(&project_id).expect("get").expect("exists");
    assert_eq!(project.title, "Todo App");
}

#[tokio::test]
async fn title_falls_back_to_prompt_when_model_fails() {
    let h = harness();
    h.model.fail_titles();
    let (project_id, _) = h.create("  build me a kanban board\nwith drag and drop").await;
    let project = h.storage.get_project(&project_id).expect("get").expect("exists");
    assert_eq!(project.title, "build me a kanban board");
}

#[tokio::test]
async fn generate_runs_tools_and_marks_ready() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    h.model.push(tool_round(
        "",
        &[
            create_file("/home/user/pages/index.tsx", "export default function Home() {}"),
            create_file("/home/user/components/Todo.tsx", "export const Todo = () => null;"),
            create_file("/home/user/styles/todo.css", ".todo {}"),
        ],
    ));
    h.model.push(text_round("Your todo app is ready."));

    let (status, body) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let sandbox_id = h.sandbox_id(&project_id);
    assert_eq!(body["url"], json!(format!("https://3000-{sandbox_id}.e2b.app")));
    let (_, lookup) = h.get(&format!("/api/project?projectId={project_id}")).await;
    assert_eq!(lookup["url"], body["url"]);

    let chats = h.chats(&project_id).await;
    assert_eq!(chats["projectStatus"], "READY");
    let shapes = entry_shapes(&chats);
    assert_eq!(shapes.len(), 5);
    assert_eq!(
        shapes[1..],
        [
            (
                "ASSISTANT".to_string(),
                "TOOL_CALL".to_string(),
                "creating file /home/user/pages/index.tsx".to_string()
            ),
            (
                "ASSISTANT".to_string(),
                "TOOL_CALL".to_string(),
                "creating file /home/user/components/Todo.tsx".to_string()
            ),
            (
                "ASSISTANT".to_string(),
                "TOOL_CALL".to_string(),
                "creating file /home/user/styles/todo.css".to_string()
            ),
            (
                "ASSISTANT".to_string(),
                "TEXT_MESSAGE".to_string(),
                "Your todo app is ready.".to_string()
            ),
        ]
    );
    assert_eq!(chats["conversationHistory"][1]["toolCall"], "WRITE_FILE");

    let files = h.sandboxes.snapshot(&sandbox_id).expect("sandbox");
    assert_eq!(
        files.get("/home/user/styles/todo.css").map(String::as_str),
        Some(".todo {}")
    );
}

#[tokio::test]
async fn tool_results_are_fed_back_to_the_model() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    h.model.push(tool_round(
        "Checking the page.",
        &[
            ("readFile", json!({ "location": "/home/user/missing.tsx" })),
            ("runCommand", json!({ "cmd": "npm install" })),
        ],
    ));
    h.model.push(text_round("Done."));

    let (status, _) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let seen = h.model.seen.lock().clone();
    assert_eq!(seen.len(), 2);
    let tool_messages = seen[1]
        .iter()
        .filter(|message| message.role == "tool")
        .map(|message| message.content.as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(tool_messages.len(), 2);
    assert!(tool_messages[0].starts_with("Error: "));
    assert_eq!(tool_messages[1], "Error: unknown tool runCommand");

    // Unknown tools never reach the log; the failed read does.
    let shapes = entry_shapes(&h.chats(&project_id).await);
    assert_eq!(
        shapes[1..],
        [
            (
                "ASSISTANT".to_string(),
                "TEXT_MESSAGE".to_string(),
                "Checking the page.".to_string()
            ),
            (
                "ASSISTANT".to_string(),
                "TOOL_CALL".to_string(),
                "reading file /home/user/missing.tsx (failed)".to_string()
            ),
            (
                "ASSISTANT".to_string(),
                "TEXT_MESSAGE".to_string(),
                "Done.".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn step_cap_ends_run_as_ready() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    // Step limits are read per run, so a live config change applies.
    h.state
        .config_store
        .update(|config| config.generation.max_steps = 3)
        .await;
    for index in 0..5 {
        h.model.push(tool_round(
            "",
            &[(
                "updateFile",
                json!({ "location": "/home/user/a.txt", "content": format!("v{index}") }),
            )],
        ));
    }

    let (status, _) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.model.stream_calls(), 3);

    let chats = h.chats(&project_id).await;
    assert_eq!(chats["projectStatus"], "READY");
    let tool_entries = entry_shapes(&chats)
        .into_iter()
        .filter(|(_, kind, _)| kind == "TOOL_CALL")
        .count();
    assert_eq!(tool_entries, 3);
    let files = h.sandboxes.snapshot(&h.sandbox_id(&project_id)).expect("sandbox");
    assert_eq!(files.get("/home/user/a.txt").map(String::as_str), Some("v2"));
}

#[tokio::test]
async fn identical_update_calls_are_each_logged() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    let args = json!({ "location": "/home/user/a.txt", "content": "same" });
    let block = tool_call_block("updateFile", &args);
    h.model.push(text_round(&format!("Writing twice.\n{block}\n{block}")));
    let unnamed = json!({
        "type": "function",
        "function": { "name": "updateFile", "arguments": args.to_string() }
    });
    h.model.push(LlmResponse {
        tool_calls: Some(json!([unnamed.clone(), unnamed])),
        ..LlmResponse::default()
    });
    h.model.push(text_round("Done."));

    let (status, body) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let shapes = entry_shapes(&h.chats(&project_id).await);
    let updates = shapes
        .iter()
        .filter(|(_, kind, content)| {
            kind == "TOOL_CALL" && content == "updating file /home/user/a.txt"
        })
        .count();
    assert_eq!(updates, 4);
    assert_eq!(shapes[1].2, "Writing twice.");
    let files = h.sandboxes.snapshot(&h.sandbox_id(&project_id)).expect("sandbox");
    assert_eq!(files.get("/home/user/a.txt").map(String::as_str), Some("same"));
}

#[tokio::test]
async fn abandoned_request_still_commits_the_run() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    let gate = h.model.hold_next_round();
    h.model.push(tool_round("", &[create_file("/home/user/a.txt", "a")]));
    h.model.push(text_round("Done."));

    let request = h.post(
        "/api/project/generate",
        json!({ "projectId": project_id, "chatId": chat_id }),
    );
    // The client gives up while the model is still streaming.
    assert!(tokio::time::timeout(Duration::from_millis(100), request)
        .await
        .is_err());
    gate.notify_one();

    let mut chats = Value::Null;
    for _ in 0..100 {
        chats = h.chats(&project_id).await;
        if chats["projectStatus"] == "READY" && chats["generationActive"] == json!(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(chats["projectStatus"], "READY");
    assert_eq!(chats["generationActive"], json!(false));
    let shapes = entry_shapes(&chats);
    assert_eq!(shapes.len(), 3);
    assert_eq!(shapes[1].2, "creating file /home/user/a.txt");
    assert_eq!(shapes[2].2, "Done.");
}

#[tokio::test]
async fn update_appends_prompt_and_returns_to_ready() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    h.model.push(tool_round("", &[create_file("/home/user/pages/index.tsx", "v1")]));
    h.model.push(text_round("Built."));
    h.post(
        "/api/project/generate",
        json!({ "projectId": project_id, "chatId": chat_id }),
    )
    .await;

    h.model.push(tool_round(
        "Making it blue.",
        &[(
            "updateFile",
            json!({ "location": "/home/user/pages/index.tsx", "content": "v2" }),
        )],
    ));
    h.model.push(text_round("Updated."));
    let (status, body) = h
        .post(
            "/api/project/update",
            json!({ "projectId": project_id, "prompt": "make it blue" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["url"].as_str().unwrap_or_default().starts_with("https://3000-"));

    let chats = h.chats(&project_id).await;
    assert_eq!(chats["projectStatus"], "READY");
    let shapes = entry_shapes(&chats);
    let update_index = shapes
        .iter()
        .position(|(from, _, content)| from == "USER" && content == "make it blue")
        .expect("update prompt logged");
    assert_eq!(shapes.len(), update_index + 4);
    assert_eq!(shapes[update_index + 2].2, "updating file /home/user/pages/index.tsx");

    // The update run sees the earlier request.
    let seen = h.model.seen.lock().clone();
    let last_task = seen
        .last()
        .and_then(|messages| messages.get(1))
        .and_then(|message| message.content.as_str())
        .unwrap_or_default()
        .to_string();
    assert!(last_task.contains("a todo app"));
    assert!(last_task.ends_with("make it blue"));

    let files = h.sandboxes.snapshot(&h.sandbox_id(&project_id)).expect("sandbox");
    assert_eq!(
        files.get("/home/user/pages/index.tsx").map(String::as_str),
        Some("v2")
    );
}

#[tokio::test]
async fn stream_failure_after_tools_is_partial_and_keeps_updating() {
    let h = harness();
    let (project_id, _) = h.create("a todo app").await;
    h.model.push(tool_round("", &[create_file("/home/user/a.txt", "a")]));
    h.model.push_failure("connection reset");

    let (status, body) = h
        .post(
            "/api/project/update",
            json!({ "projectId": project_id, "prompt": "add a footer" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], "Generation Interrupted");

    let chats = h.chats(&project_id).await;
    assert_eq!(chats["projectStatus"], "UPDATING");
    assert_eq!(chats["generationActive"], json!(false));
    let shapes = entry_shapes(&chats);
    assert_eq!(
        shapes.last().map(|shape| shape.2.as_str()),
        Some("creating file /home/user/a.txt")
    );
}

#[tokio::test]
async fn stream_failure_before_tools_is_upstream_unavailable() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    h.model.push_failure("model overloaded");

    let (status, body) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Model Unavailable");
    let chats = h.chats(&project_id).await;
    assert_eq!(chats["projectStatus"], "PENDING");
    assert_eq!(entry_shapes(&chats).len(), 1);
}

#[tokio::test]
async fn busy_project_is_rejected() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    let status = h
        .storage
        .try_acquire_project_lease(&project_id, "other-run", 60.0)
        .expect("lease");
    assert_eq!(status, ProjectLeaseStatus::Acquired);

    let chats = h.chats(&project_id).await;
    assert_eq!(chats["generationActive"], json!(true));

    let (status, body) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Project Is Busy");
    assert_eq!(h.model.stream_calls(), 0);

    h.storage
        .release_project_lease(&project_id, "other-run")
        .expect("release");
    let (status, _) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn sandbox_reconnect_failure_leaves_status() {
    let h = harness();
    let (project_id, chat_id) = h.create("a todo app").await;
    h.sandboxes.set_offline(true);

    let (status, body) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Sandbox Unavailable");
    assert_eq!(h.model.stream_calls(), 0);

    let chats = h.chats(&project_id).await;
    assert_eq!(chats["projectStatus"], "PENDING");
    assert_eq!(entry_shapes(&chats).len(), 1);
}

#[tokio::test]
async fn sandbox_allocation_failure_persists_nothing() {
    let h = harness();
    h.sandboxes.set_offline(true);
    let (status, body) = h
        .post("/api/project/create", json!({ "prompt": "a todo app" }))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Sandbox Unavailable");
}

#[tokio::test]
async fn invalid_bodies_are_rejected() {
    let h = harness();
    let (status, body) = h.post("/api/project/create", json!({ "prompt": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid Request Body");

    let (status, body) = h.post("/api/project/create", json!({ "text": "hi" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid Request Body");

    let (status, _) = h
        .post("/api/project/generate", json!({ "projectId": "p" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h.get("/api/project/chats").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness();
    let (status, body) = h.get("/api/project/files?projectId=nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "error": "Project Not Found", "code": "PROJECT_NOT_FOUND", "detail": { "projectId": "nope" } }));

    let (project_id, _) = h.create("a todo app").await;
    let (other_id, other_chat) = h.create("a blog").await;
    let (status, body) = h
        .post(
            "/api/project/generate",
            json!({ "projectId": project_id, "chatId": other_chat }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Chat Not Found");
    assert_ne!(project_id, other_id);
}

#[tokio::test]
async fn url_is_stable_and_files_skip_ignored_dirs() {
    let h = harness();
    let (project_id, _) = h.create("a todo app").await;
    let sandbox_id = h.sandbox_id(&project_id);
    assert!(h.sandboxes.seed_file(&sandbox_id, "/home/user/pages/index.tsx", "home"));
    assert!(h.sandboxes.seed_file(&sandbox_id, "/home/user/node_modules/react/index.js", "x"));
    assert!(h.sandboxes.seed_file(&sandbox_id, "/home/user/.next/cache.json", "{}"));

    let (_, first) = h.get(&format!("/api/project?projectId={project_id}")).await;
    let (status, second) = h.get(&format!("/api/project/?projectId={project_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(first["url"], json!(format!("https://3000-{sandbox_id}.e2b.app")));

    let (status, body) = h
        .get(&format!("/api/project/files?projectId={project_id}"))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let paths = body["files"]
        .as_array()
        .expect("files")
        .iter()
        .filter_map(|file| file["path"].as_str().map(str::to_string))
        .collect::<Vec<_>>();
    assert!(paths.contains(&"/home/user/pages/index.tsx".to_string()));
    assert!(paths.contains(&"/home/user/pages".to_string()));
    assert!(!paths.iter().any(|path| path.contains("node_modules") || path.contains(".next")));

    let (status, body) = h
        .get(&format!(
            "/api/project/file?projectId={project_id}&path=pages/index.tsx"
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "home");

    let (status, body) = h
        .get(&format!(
            "/api/project/file?projectId={project_id}&path=/home/user/none.txt"
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "File Not Found");
}

#[tokio::test]
async fn health_is_outside_the_prefix() {
    let h = harness();
    let (status, body) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}
