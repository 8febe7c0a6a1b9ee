use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use coze_flow::{
    CozeApi, CozeClient, CozeConfig, CozeError, InMemorySessionStorage, PageController,
    PageSession, Poller, PromptRunner, RetrieveResult, SessionStorage, TriggerResult,
    UploadResult, UploadedFile, WorkflowRequest, types::DEFAULT_PROMPT_TYPE,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::models::{GenerateRequest, SessionResponse, UploadFileRequest, WorkflowResultQuery};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

/// Wrap a failed Coze call as `"<prefix>: <user message>"`.
fn procedure_error(prefix: &str, err: &CozeError) -> ApiError {
    let message = format!("{prefix}: {}", err.user_message());
    match err {
        CozeError::Precondition(_) => bad_request_error(&message),
        _ => internal_error(&message, &err.to_string()),
    }
}

fn session_error(session_id: &str, err: &CozeError) -> ApiError {
    match err {
        CozeError::SessionNotFound(_) => not_found_error("Session not found", session_id),
        CozeError::SessionBusy(_) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": err.user_message(),
                "session_id": session_id
            })),
        ),
        _ => internal_error("Failed to run generate cycle", &err.to_string()),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn CozeApi>,
    pub sessions: Arc<dyn SessionStorage>,
    pub runner: PromptRunner,
}

impl AppState {
    pub fn new(api: Arc<dyn CozeApi>, poller: Poller) -> Self {
        let sessions: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        let runner = PromptRunner::new(PageController::new(api.clone(), poller), sessions.clone());
        Self {
            api,
            sessions,
            runner,
        }
    }
}

pub fn create_app(config: CozeConfig) -> Router {
    let poller = Poller::from_config(&config);
    let api: Arc<dyn CozeApi> = Arc::new(CozeClient::new(config));
    build_router(AppState::new(api, poller))
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/coze/upload-file", post(upload_file))
        .route("/coze/generate-prompt", post(generate_prompt))
        .route("/coze/workflow-result", get(workflow_result))
        .route("/image-to-prompt/sessions", post(create_session))
        .route(
            "/image-to-prompt/sessions/{session_id}",
            get(get_session).delete(close_session),
        )
        .route(
            "/image-to-prompt/sessions/{session_id}/generate",
            post(generate_for_session),
        )
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Image to Prompt Service",
        "version": "0.1.0",
        "description": "Turns an uploaded image into a text-to-image prompt via a Coze workflow",
        "endpoints": {
            "POST /coze/upload-file": "Upload a base64 image to Coze",
            "POST /coze/generate-prompt": "Trigger the prompt workflow for an uploaded file",
            "GET /coze/workflow-result?executeId=": "Query an asynchronous workflow run",
            "POST /image-to-prompt/sessions": "Open a page session",
            "GET /image-to-prompt/sessions/{session_id}": "Get page state and toasts",
            "POST /image-to-prompt/sessions/{session_id}/generate": "Run one generate cycle",
            "DELETE /image-to-prompt/sessions/{session_id}": "Leave the page",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn upload_file(
    State(state): State<AppState>,
    Json(request): Json<UploadFileRequest>,
) -> ApiResult<UploadResult> {
    info!(file_name = %request.file_name, file_type = %request.file_type, "Upload requested");

    let file = UploadedFile::from_base64(&request.file, request.file_name, request.file_type)
        .map_err(|e| procedure_error("文件上传失败", &e))?;

    state.api.upload_file(&file).await.map(Json).map_err(|e| {
        error!("Upload failed: {}", e);
        procedure_error("文件上传失败", &e)
    })
}

async fn generate_prompt(
    State(state): State<AppState>,
    Json(request): Json<WorkflowRequest>,
) -> ApiResult<TriggerResult> {
    info!(file_id = ?request.file_id, "Workflow run requested");

    state
        .api
        .generate_prompt(&request)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Workflow run failed: {}", e);
            procedure_error("工作流调用失败", &e)
        })
}

async fn workflow_result(
    State(state): State<AppState>,
    Query(query): Query<WorkflowResultQuery>,
) -> ApiResult<RetrieveResult> {
    if query.execute_id.trim().is_empty() {
        return Err(bad_request_error("executeId is required"));
    }

    state
        .api
        .get_result(&query.execute_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!(execute_id = %query.execute_id, "Result query failed: {}", e);
            procedure_error("获取工作流结果失败", &e)
        })
}

async fn create_session(State(state): State<AppState>) -> ApiResult<SessionResponse> {
    let session = PageSession::new();
    info!(session_id = %session.id, "Opening page session");

    state.sessions.save(session.clone()).await.map_err(|e| {
        error!("Failed to create session: {}", e);
        internal_error("Failed to create page session", &e.to_string())
    })?;

    Ok(Json(session.into()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    match state.sessions.get(&session_id).await {
        Ok(Some(session)) => Ok(Json(session.into())),
        Ok(None) => Err(not_found_error("Session not found", &session_id)),
        Err(e) => {
            error!("Failed to load session {}: {}", session_id, e);
            Err(internal_error("Failed to load session", &e.to_string()))
        }
    }
}

async fn generate_for_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<SessionResponse> {
    let selection = decode_selection(&request)?;
    let prompt_type = request
        .prompt_type
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(DEFAULT_PROMPT_TYPE);

    match state
        .runner
        .generate(&session_id, selection, prompt_type)
        .await
    {
        Ok(session) => Ok(Json(session.into())),
        Err(e) => {
            warn!("Generate cycle for session {} did not settle: {}", session_id, e);
            Err(session_error(&session_id, &e))
        }
    }
}

/// An absent or blank `file` means nothing is selected.
fn decode_selection(request: &GenerateRequest) -> Result<Option<UploadedFile>, ApiError> {
    let Some(encoded) = request.file.as_deref().filter(|f| !f.trim().is_empty()) else {
        return Ok(None);
    };

    UploadedFile::from_base64(
        encoded,
        request.file_name.as_deref().unwrap_or("image"),
        request
            .file_type
            .as_deref()
            .unwrap_or("application/octet-stream"),
    )
    .map(Some)
    .map_err(|e| bad_request_error(&e.user_message()))
}

async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    state.sessions.delete(&session_id).await.map_err(|e| {
        error!("Failed to close session {}: {}", session_id, e);
        internal_error("Failed to close session", &e.to_string())
    })?;

    info!(session_id = %session_id, "Page session closed");
    Ok(Json(json!({
        "session_id": session_id,
        "status": "closed"
    })))
}
