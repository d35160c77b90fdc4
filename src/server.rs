//! HTTP server for the chat page and the question API.
//!
//! # Endpoints
//!
//! | Method | Path         | Description |
//! |--------|--------------|-------------|
//! | `GET`  | `/`          | Static chat page |
//! | `POST` | `/ask`       | Answer a question (form fields `question`, `session_id`, `reset`) |
//! | `GET`  | `/documents` | Loaded documents with a short summary |
//! | `GET`  | `/health`    | Health check (version and document count) |
//!
//! # Error Contract
//!
//! Every error response is `{ "error": "<message>" }`:
//!
//! - `400` for a missing, empty or oversized question, or a malformed form,
//! - `502` when the completion API fails,
//! - `504` when the completion API times out.
//!
//! Upstream failure details are logged, never returned.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::FormRejection, Form, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::{AskError, ChatService};
use crate::config::Config;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Characters of raw text shown per document in `GET /documents`.
const SUMMARY_CHARS: usize = 200;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

/// Loads documents, builds the chat service and serves until Ctrl+C or
/// SIGTERM.
///
/// Fails before binding when the documents cannot be loaded.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let chat = ChatService::from_config(config)?;
    let state = AppState {
        chat: Arc::new(chat),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %config.server.bind, "listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/ask", post(handle_ask))
        .route("/documents", get(handle_documents))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::Input(message) => bad_request(message),
            AskError::Upstream(e) if e.is_timeout() => AppError {
                status: StatusCode::GATEWAY_TIMEOUT,
                message: "El servicio de respuestas tardó demasiado. Intenta de nuevo.".to_string(),
            },
            AskError::Upstream(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                message: "No se pudo generar una respuesta. Intenta de nuevo más tarde.".to_string(),
            },
        }
    }
}

// ============ GET / ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// ============ POST /ask ============

#[derive(Debug, Deserialize)]
pub struct AskForm {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub reset: Option<String>,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    response: String,
    session_id: String,
    document_used: Option<String>,
}

fn new_session_id() -> String {
    format!("session_{}", Uuid::new_v4().simple())
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "on" | "yes")
    )
}

async fn handle_ask(
    State(state): State<AppState>,
    form: Result<Form<AskForm>, FormRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Form(form) = form.map_err(|e| bad_request(format!("Formulario inválido: {}", e)))?;

    let session_id = form
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(new_session_id);
    let reset = parse_flag(form.reset.as_deref());
    let question = form.question.unwrap_or_default();

    let answer = state.chat.answer(&question, &session_id, reset).await?;

    Ok(Json(AskResponse {
        response: answer.response,
        session_id,
        document_used: answer.document_used,
    }))
}

// ============ GET /documents ============

#[derive(Debug, Serialize)]
struct DocumentSummary {
    filename: String,
    title: String,
    chars: usize,
    sections: usize,
    tables: usize,
    summary: String,
}

async fn handle_documents(State(state): State<AppState>) -> Json<Vec<DocumentSummary>> {
    let docs = state
        .chat
        .documents()
        .documents()
        .map(|d| DocumentSummary {
            filename: d.filename.clone(),
            title: d.title.clone(),
            chars: d.raw_text.chars().count(),
            sections: d.sections.len(),
            tables: d.tables.len(),
            summary: d.raw_text.chars().take(SUMMARY_CHARS).collect(),
        })
        .collect();
    Json(docs)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    documents: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        documents: state.chat.documents().len(),
    })
}
