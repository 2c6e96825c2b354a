// Project API: create, generate, update, conversation log, preview URL and files.
use crate::api::errors::{invalid_request, orchestrator_error_response};
use crate::history::ConversationLog;
use crate::schemas::{
    ConversationHistoryResponse, CreateProjectRequest, CreateProjectResponse, FileContentQuery,
    FileContentResponse, FileEntryView, FileListResponse, GenerateProjectRequest,
    ProjectQuery, ProjectUrlResponse, UpdateProjectRequest,
};
use crate::state::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::{routing::get, routing::post, Json, Router};
use std::sync::Arc;
use tracing::info;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/project/create", post(create_project))
        .route("/project/generate", post(generate_project))
        .route("/project/update", post(update_project))
        .route("/project/chats", get(project_chats))
        .route("/project", get(project_url))
        .route("/project/", get(project_url))
        .route("/project/files", get(project_files))
        .route("/project/file", get(project_file))
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<Json<CreateProjectResponse>, Response> {
    let Json(request) = payload.map_err(invalid_request)?;
    let created = state
        .orchestrator
        .create_project(&request.prompt)
        .await
        .map_err(orchestrator_error_response)?;
    Ok(Json(CreateProjectResponse {
        project_id: created.project_id,
        chat_id: created.chat_id,
    }))
}

async fn generate_project(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateProjectRequest>, JsonRejection>,
) -> Result<Json<ProjectUrlResponse>, Response> {
    let Json(request) = payload.map_err(invalid_request)?;
    let outcome = state
        .orchestrator
        .generate_project(&request.project_id, &request.chat_id)
        .await
        .map_err(orchestrator_error_response)?;
    info!(
        project_id = %request.project_id,
        steps = outcome.steps,
        tool_calls = outcome.tool_calls,
        files_changed = outcome.files_changed,
        hit_step_limit = outcome.hit_step_limit,
        input_tokens = outcome.usage.input,
        output_tokens = outcome.usage.output,
        "project generated"
    );
    Ok(Json(ProjectUrlResponse { url: outcome.url }))
}

async fn update_project(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateProjectRequest>, JsonRejection>,
) -> Result<Json<ProjectUrlResponse>, Response> {
    let Json(request) = payload.map_err(invalid_request)?;
    let outcome = state
        .orchestrator
        .update_project(&request.project_id, &request.prompt)
        .await
        .map_err(orchestrator_error_response)?;
    info!(
        project_id = %request.project_id,
        steps = outcome.steps,
        tool_calls = outcome.tool_calls,
        files_changed = outcome.files_changed,
        hit_step_limit = outcome.hit_step_limit,
        input_tokens = outcome.usage.input,
        output_tokens = outcome.usage.output,
        "project updated"
    );
    Ok(Json(ProjectUrlResponse { url: outcome.url }))
}

async fn project_chats(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ProjectQuery>, QueryRejection>,
) -> Result<Json<ConversationHistoryResponse>, Response> {
    let Query(query) = query.map_err(invalid_request)?;
    let log = state
        .orchestrator
        .conversation(&query.project_id)
        .await
        .map_err(orchestrator_error_response)?;
    Ok(Json(history_response(log)))
}

fn history_response(log: ConversationLog) -> ConversationHistoryResponse {
    ConversationHistoryResponse {
        conversation_history: log.views(),
        project_status: log.status,
        status_updated_at: log.status_updated_at,
        chat_id: log.chat_id,
        generation_active: log.generation_active,
    }
}

async fn project_url(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ProjectQuery>, QueryRejection>,
) -> Result<Json<ProjectUrlResponse>, Response> {
    let Query(query) = query.map_err(invalid_request)?;
    let url = state
        .orchestrator
        .project_url(&query.project_id)
        .await
        .map_err(orchestrator_error_response)?;
    Ok(Json(ProjectUrlResponse { url }))
}

async fn project_files(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ProjectQuery>, QueryRejection>,
) -> Result<Json<FileListResponse>, Response> {
    let Query(query) = query.map_err(invalid_request)?;
    let entries = state
        .orchestrator
        .list_files(&query.project_id)
        .await
        .map_err(orchestrator_error_response)?;
    let files = entries
        .into_iter()
        .map(|entry| FileEntryView {
            path: entry.path,
            kind: entry.kind.as_str().to_string(),
        })
        .collect();
    Ok(Json(FileListResponse { files }))
}

async fn project_file(
    State(state): State<Arc<AppState>>,
    query: Result<Query<FileContentQuery>, QueryRejection>,
) -> Result<Json<FileContentResponse>, Response> {
    let Query(query) = query.map_err(invalid_request)?;
    let content = state
        .orchestrator
        .read_file(&query.project_id, &query.path)
        .await
        .map_err(orchestrator_error_response)?;
    Ok(Json(FileContentResponse { content }))
}
