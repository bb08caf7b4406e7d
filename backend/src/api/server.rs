//! HTTP server for the RegexFlow API.
//!
//! One dataset per server process, shared by every chat session.
//!
//! # API Endpoints
//!
//! | Method | Path                   | Description                               |
//! |--------|------------------------|-------------------------------------------|
//! | GET    | `/health`              | Health check                              |
//! | POST   | `/api/upload`          | Upload CSV (multipart `file`)             |
//! | GET    | `/api/preview_data`    | One page of rows (`page`, `page_size`)    |
//! | POST   | `/api/generate-tasks`  | Instruction to task list                  |
//! | POST   | `/api/preview_replace` | Diff of a task list, dataset untouched    |
//! | POST   | `/api/replace`         | Apply a task list                         |
//! | POST   | `/api/chat`            | One conversational turn                   |
//! | DELETE | `/api/chat/{id}`       | End a chat session                        |
//! | GET    | `/api/download`        | Current dataset as CSV                    |
//! | GET    | `/api/logs`            | SSE stream for real-time logs             |

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Sse},
    routing::{delete, get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_error, log_info, log_success, LOG_BROADCASTER};
use super::types::{
    apply_status, csv_status, generator_status, reject, store_status, ChatRequest, ChatResponse,
    GenerateRequest, GenerateResponse, PageQuery, PreviewResponse, Rejection, ReplaceResponse,
    TasksRequest, UploadResponse,
};
use crate::apply::apply;
use crate::config::Config;
use crate::diff::preview;
use crate::generator::{AiClient, DisabledGenerator, TaskGenerator};
use crate::models::Dataset;
use crate::parser::{check_file_name, format_delimiter, parse_bytes_auto, to_csv};
use crate::session::{Role, SessionManager};
use crate::store::{DatasetStore, MemoryStore, Page};
use crate::task::TaskBatch;

/// Where the current dataset came from
#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub filename: Option<String>,
    pub encoding: String,
    pub delimiter: char,
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DatasetStore>,
    pub generator: Arc<dyn TaskGenerator>,
    pub sessions: Arc<SessionManager>,
    pub config: Arc<Config>,
    pub upload: Arc<RwLock<Option<UploadInfo>>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn DatasetStore>,
        generator: Arc<dyn TaskGenerator>,
    ) -> Self {
        Self {
            store,
            generator,
            sessions: Arc::new(
                SessionManager::new(config.preview_limit).with_idle_ttl(config.session_ttl),
            ),
            config: Arc::new(config),
            upload: Arc::new(RwLock::new(None)),
        }
    }

    /// In-memory store, AI generator when an API key is configured.
    pub fn from_config(config: Config) -> Self {
        let generator: Arc<dyn TaskGenerator> = match &config.api_key {
            Some(key) => {
                let client = AiClient::new(key.clone());
                let client = match &config.model {
                    Some(model) => client.with_model(model),
                    None => client,
                };
                tracing::info!(model = client.model(), "task generator enabled");
                Arc::new(client)
            }
            None => Arc::new(DisabledGenerator),
        };
        Self::new(config, Arc::new(MemoryStore::new()), generator)
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/upload", post(upload_csv))
        .route("/api/preview_data", get(preview_data))
        .route("/api/generate-tasks", post(generate_tasks))
        .route("/api/preview_replace", post(preview_replace))
        .route("/api/replace", post(replace))
        .route("/api/chat", post(chat))
        .route("/api/chat/{session_id}", delete(end_chat))
        .route("/api/download", get(download))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;
    if !config.has_generator() {
        tracing::warn!("ANTHROPIC_API_KEY not set; /api/generate-tasks and /api/chat will fail");
    }
    let app = router(AppState::from_config(config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 RegexFlow server running on http://localhost:{}", port);
    println!("   POST /api/upload          - Upload CSV file");
    println!("   GET  /api/preview_data    - Page through the dataset");
    println!("   POST /api/generate-tasks  - Instruction to regex tasks");
    println!("   POST /api/preview_replace - Preview a task list");
    println!("   POST /api/replace         - Apply a task list");
    println!("   POST /api/chat            - Conversational edit");
    println!("   GET  /api/download        - Download CSV");
    println!("   GET  /api/logs            - SSE log stream");
    println!("   GET  /health              - Health check");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "regexflow",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Upload CSV endpoint
async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, Rejection> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(|s| s.to_string());
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let bytes = file_data.ok_or_else(|| reject(StatusCode::BAD_REQUEST, "No file provided."))?;
    if let Some(name) = file_name.as_deref() {
        check_file_name(name).map_err(|e| reject(csv_status(&e), e))?;
    }

    log_info(format!(
        "📄 Upload: {} ({} bytes)",
        file_name.as_deref().unwrap_or("unknown"),
        bytes.len()
    ));

    let parsed = parse_bytes_auto(&bytes).map_err(|e| {
        log_error(format!("Parse error: {}", e));
        reject(csv_status(&e), e)
    })?;

    log_success(format!("Detected encoding: {}", parsed.encoding));
    log_success(format!("Detected separator: '{}'", format_delimiter(parsed.delimiter)));
    log_success(format!(
        "Read {} rows, {} columns",
        parsed.dataset.row_count(),
        parsed.dataset.columns.len()
    ));

    let columns = parsed.dataset.columns.clone();
    state
        .store
        .load(parsed.dataset)
        .await
        .map_err(|e| reject(store_status(&e), e))?;
    *state.upload.write().await = Some(UploadInfo {
        filename: file_name.clone(),
        encoding: parsed.encoding.clone(),
        delimiter: parsed.delimiter,
    });

    let first_page = state
        .store
        .read_page(1, state.config.page_size)
        .await
        .map_err(|e| reject(store_status(&e), e))?;

    Ok(Json(UploadResponse::new(
        file_name,
        parsed.encoding,
        format_delimiter(parsed.delimiter),
        columns,
        first_page,
    )))
}

async fn preview_data(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page>, Rejection> {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(state.config.page_size);

    let page = state
        .store
        .read_page(page, page_size)
        .await
        .map_err(|e| reject(store_status(&e), e))?;
    Ok(Json(page))
}

async fn generate_tasks(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, Rejection> {
    let description = request.description.trim();
    if description.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "Missing description."));
    }

    let snapshot = current_dataset(&state).await?;
    let tasks = state
        .generator
        .generate(description, &snapshot.columns)
        .await
        .map_err(|e| reject(generator_status(&e), e))?;

    log_success(format!("Generated {} tasks", tasks.len()));
    Ok(Json(GenerateResponse { tasks }))
}

async fn preview_replace(
    State(state): State<AppState>,
    Json(request): Json<TasksRequest>,
) -> Result<Json<PreviewResponse>, Rejection> {
    let snapshot = current_dataset(&state).await?;
    let batch = expand_tasks(&request, &snapshot)?;

    let report = preview(&batch, &snapshot, state.config.preview_limit)
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(report.into()))
}

async fn replace(
    State(state): State<AppState>,
    Json(request): Json<TasksRequest>,
) -> Result<Json<ReplaceResponse>, Rejection> {
    let snapshot = current_dataset(&state).await?;
    let batch = expand_tasks(&request, &snapshot)?;

    let report = apply(&batch, state.store.as_ref(), state.config.preview_limit)
        .await
        .map_err(|e| {
            log_error(format!("Replacement failed: {}", e));
            reject(apply_status(&e), e)
        })?;

    log_success(format!("Replaced {} items", report.total_replacements));
    Ok(Json(report.into()))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, Rejection> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "Missing message."));
    }

    let (session_id, session) = state
        .sessions
        .get_or_create(request.session_id.as_deref())
        .await;
    let mut session = session.lock().await;

    let seq = session.message_seq();
    let result = session
        .handle_input(message, state.generator.as_ref(), state.store.as_ref())
        .await;

    let replies = session
        .messages_since(seq)
        .iter()
        .filter(|m| m.role == Role::Bot)
        .cloned()
        .collect();
    let (outcome, error) = match result {
        Ok(outcome) => (Some(outcome), None),
        Err(e) => (None, Some(e.to_string())),
    };

    Ok(Json(ChatResponse {
        session_id,
        replies,
        state: session.state().name().to_string(),
        outcome,
        error,
    }))
}

async fn end_chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, Rejection> {
    if !state.sessions.remove(&session_id).await {
        return Err(reject(
            StatusCode::NOT_FOUND,
            format!("Unknown session: {}", session_id),
        ));
    }
    log_info(format!("Chat session {} ended", session_id));
    Ok(Json(json!({ "status": "ok", "sessionId": session_id })))
}

async fn download(State(state): State<AppState>) -> Result<impl IntoResponse, Rejection> {
    let snapshot = current_dataset(&state).await?;
    let upload = state.upload.read().await.clone();

    let delimiter = upload.as_ref().map(|u| u.delimiter).unwrap_or(',');
    let filename = upload
        .and_then(|u| u.filename)
        .map(|name| format!("modified_{}", name))
        .unwrap_or_else(|| "modified.csv".to_string());

    let body = to_csv(&snapshot, delimiter).map_err(|e| reject(csv_status(&e), e))?;
    log_info(format!("CSV file generated for download ({} rows)", snapshot.row_count()));

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename.replace('"', "")),
            ),
        ],
        body,
    ))
}

// =============================================================================
// Helpers
// =============================================================================

async fn current_dataset(state: &AppState) -> Result<Dataset, Rejection> {
    state
        .store
        .snapshot()
        .await
        .map_err(|e| reject(store_status(&e), e))
}

fn expand_tasks(request: &TasksRequest, snapshot: &Dataset) -> Result<TaskBatch, Rejection> {
    if request.tasks.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "No tasks provided."));
    }
    TaskBatch::from_specs(&request.tasks, snapshot).map_err(|e| reject(StatusCode::BAD_REQUEST, e))
}
