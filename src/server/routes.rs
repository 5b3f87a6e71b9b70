use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::git::{GitBackend, GitBackendError, GitConfigUpdate};

/// Backend shared across requests.
pub type SharedBackend = Arc<GitBackend>;

/// Request body for writing a file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileBody {
    pub content: String,
    #[serde(default)]
    pub commit_message: Option<String>,
}

/// Request body for renaming a file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    pub old_filename: String,
    pub new_filename: String,
}

/// Query parameters for the history endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

const DEFAULT_HISTORY_LIMIT: usize = 20;

fn error_response(err: GitBackendError) -> Response {
    let status = match &err {
        GitBackendError::FileNotFound(_) => StatusCode::NOT_FOUND,
        GitBackendError::InvalidName(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    log::error!("Request failed: {}", err);
    (
        status,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}

pub async fn get_status(State(backend): State<SharedBackend>) -> Response {
    match backend.status() {
        Ok(status) => Json(json!({ "success": true, "status": status })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get_config(State(backend): State<SharedBackend>) -> Response {
    let config = backend.get_config();
    let public_key = backend.public_key();
    Json(json!({ "success": true, "config": config, "publicKey": public_key })).into_response()
}

pub async fn update_config(
    State(backend): State<SharedBackend>,
    Json(update): Json<GitConfigUpdate>,
) -> Response {
    match backend.update_config(update) {
        Ok(config) => Json(json!({ "success": true, "config": config })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list_files(State(backend): State<SharedBackend>) -> Response {
    match backend.list_files() {
        Ok(files) => Json(json!({ "success": true, "files": files })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn read_file(
    State(backend): State<SharedBackend>,
    Path(name): Path<String>,
) -> Response {
    match backend.read_file(&name) {
        Ok((content, last_commit)) => {
            Json(json!({ "success": true, "content": content, "lastCommit": last_commit }))
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn write_file(
    State(backend): State<SharedBackend>,
    Path(name): Path<String>,
    Json(body): Json<WriteFileBody>,
) -> Response {
    match backend.write_file(&name, &body.content, body.commit_message.as_deref()) {
        Ok(commit) => Json(json!({ "success": true, "commit": commit })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn rename_file(
    State(backend): State<SharedBackend>,
    Json(body): Json<RenameBody>,
) -> Response {
    match backend.rename_file(&body.old_filename, &body.new_filename) {
        Ok(commit) => Json(json!({ "success": true, "commit": commit })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_file(
    State(backend): State<SharedBackend>,
    Path(name): Path<String>,
) -> Response {
    match backend.delete_file(&name) {
        Ok(commit) => Json(json!({ "success": true, "commit": commit })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn file_history(
    State(backend): State<SharedBackend>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    match backend.file_history(&name, limit) {
        Ok(history) => Json(json!({ "success": true, "history": history })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Merge conflicts are reported through the body (`success: false` plus
/// the conflicting paths), not an error status.
pub async fn sync_remote(State(backend): State<SharedBackend>) -> Response {
    match backend.sync_with_remote() {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}
