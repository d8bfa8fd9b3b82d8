use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::{Context, Result};
use architect_contracts::event_payload;
use architect_contracts::events::EventWriter;
use architect_engine::chat::{ChatRequest, EMPTY_REPLY};
use architect_engine::upload::{media_type_for_path, UploadedFile};
use architect_engine::{AnalysisProvider, AssetStore, ChatProvider, LocalAssetStore};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    store: Arc<LocalAssetStore>,
    analyzer: Arc<dyn AnalysisProvider>,
    chat: Arc<dyn ChatProvider>,
    events: EventWriter,
}

impl AppState {
    pub fn new(
        store: Arc<LocalAssetStore>,
        analyzer: Arc<dyn AnalysisProvider>,
        chat: Arc<dyn ChatProvider>,
        events: EventWriter,
    ) -> Self {
        Self {
            inner: Arc::new(AppInner {
                store,
                analyzer,
                chat,
                events,
            }),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/chat", post(chat_handler))
        .route("/uploads/{name}", get(asset_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local = listener.local_addr()?;
    info!(%local, "architect server listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server stopped with an error")?;
    info!("architect server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("blocking task panicked")?
}

async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let file = match read_upload(&mut multipart).await {
        Ok(Some(file)) => file,
        Ok(None) => return error_response(StatusCode::BAD_REQUEST, "No file uploaded"),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "unreadable upload");
            return error_response(StatusCode::BAD_REQUEST, "Invalid upload");
        }
    };

    let store = Arc::clone(&state.inner.store);
    let file_name = file.file_name.clone();
    let size = file.size();
    match blocking(move || store.store(&file)).await {
        Ok(image_url) => {
            state.inner.events.record(
                "upload_stored",
                event_payload! {
                    "image_url" => image_url,
                    "file_name" => file_name,
                    "size" => size,
                },
            );
            Json(json!({ "imageUrl": image_url })).into_response()
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "upload error");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed")
        }
    }
}

async fn read_upload(multipart: &mut Multipart) -> Result<Option<UploadedFile>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("floorplan").to_string();
        let media_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| media_type_for_path(FsPath::new(&file_name)).to_string());
        let bytes = field.bytes().await?;
        return Ok(Some(UploadedFile::new(file_name, media_type, bytes.to_vec())));
    }
    Ok(None)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    image_url: String,
}

/// Returns the model's JSON as-is; validation happens on the results side.
async fn analyze_handler(
    State(state): State<AppState>,
    request: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            error!(error = %rejection.body_text(), "analysis error");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Analysis failed");
        }
    };

    if !is_remote_url(&request.image_url) {
        warn!(image_url = %request.image_url, "analysis refused for non-http image url");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Analysis failed");
    }

    let analyzer = Arc::clone(&state.inner.analyzer);
    let image_url = request.image_url.clone();
    match blocking(move || analyzer.analyze(&image_url)).await {
        Ok(analysis) => {
            state.inner.events.record(
                "analysis_received",
                event_payload! {
                    "image_url" => request.image_url,
                    "analyzer" => state.inner.analyzer.name(),
                },
            );
            Json(analysis).into_response()
        }
        Err(err) => {
            error!(image_url = %request.image_url, error = %format!("{err:#}"), "analysis error");
            state.inner.events.record(
                "submission_failed",
                event_payload! {
                    "stage" => "analysis",
                    "image_url" => request.image_url,
                    "error" => format!("{err:#}"),
                },
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Analysis failed")
        }
    }
}

/// Callers may only point the analyzer at http(s) references.
fn is_remote_url(image_url: &str) -> bool {
    let lower = image_url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

async fn chat_handler(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            error!(error = %rejection.body_text(), "chat error");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate response",
            );
        }
    };

    let chat = Arc::clone(&state.inner.chat);
    let message_chars = request.message.chars().count();
    match blocking(move || chat.reply(&request)).await {
        Ok(reply) => {
            let content = if reply.trim().is_empty() {
                EMPTY_REPLY.to_string()
            } else {
                reply
            };
            state.inner.events.record(
                "chat_turn",
                event_payload! {
                    "provider" => state.inner.chat.name(),
                    "message_chars" => message_chars,
                    "reply_chars" => content.chars().count(),
                },
            );
            Json(json!({ "content": content })).into_response()
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "chat error");
            state.inner.events.record(
                "chat_turn_failed",
                event_payload! {
                    "provider" => state.inner.chat.name(),
                    "error" => format!("{err:#}"),
                },
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate response",
            )
        }
    }
}

async fn asset_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(path) = state.inner.store.resolve_name(&name) else {
        return error_response(StatusCode::NOT_FOUND, "Not found");
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, media_type_for_path(&path))], bytes).into_response(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "stored asset unreadable");
            error_response(StatusCode::NOT_FOUND, "Not found")
        }
    }
}
