//! JSON HTTP API over the knowledge base.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and retrieval strategy) |
//! | `POST` | `/search` | Retrieve matching chunks for a query |
//! | `POST` | `/ask` | Retrieve context and generate a grounded answer |
//! | `POST` | `/ingest` | Ingest the corpus, or one path |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! | Cause | Status | Code |
//! |-------|--------|------|
//! | invalid input | 400 | `bad_request` |
//! | configuration | 500 | `configuration` |
//! | embedding / generation provider | 502 | `provider_error` |
//! | anything else | 500 | `internal` |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use opskb_core::answer::{Answer, AnswerGenerator};
use opskb_core::models::{IngestSummary, KnowledgeMatch, MatchOrigin, SourceType};
use opskb_core::retrieve::Retriever;
use opskb_core::KbError;

use crate::config::Config;
use crate::generation::DisabledGenerator;
use crate::ingest::Ingestor;
use crate::pipeline::{Pipeline, RetrievalOverrides};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    retriever: Arc<Retriever>,
    answerer: Arc<AnswerGenerator>,
    ingestor: Arc<Ingestor>,
}

impl AppState {
    /// Build handler state from an open pipeline.
    ///
    /// A generation provider that cannot be built does not stop the server;
    /// `/ask` then fails with a configuration error.
    pub async fn new(pipeline: &Pipeline) -> Self {
        let answerer = match pipeline.answerer() {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "generation unavailable; /ask will fail");
                pipeline.answerer_with(Arc::new(DisabledGenerator))
            }
        };
        Self::from_parts(
            pipeline.config.clone(),
            pipeline.retriever().await,
            answerer,
            pipeline.ingestor(),
        )
    }

    pub fn from_parts(
        config: Arc<Config>,
        retriever: Retriever,
        answerer: AnswerGenerator,
        ingestor: Ingestor,
    ) -> Self {
        Self {
            config,
            retriever: Arc::new(retriever),
            answerer: Arc::new(answerer),
            ingestor: Arc::new(ingestor),
        }
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let state = AppState::new(&pipeline).await;
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, strategy = state.retriever.strategy_name(), "server listening");
    println!("Knowledge base listening on http://{}", bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/ask", post(handle_ask))
        .route("/ingest", post(handle_ingest))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let (status, code) = match err.downcast_ref::<KbError>() {
            Some(KbError::InvalidInput(_)) => (StatusCode::BAD_REQUEST, "bad_request"),
            Some(KbError::Configuration(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration")
            }
            Some(e) if e.is_provider_error() => (StatusCode::BAD_GATEWAY, "provider_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status != StatusCode::BAD_REQUEST {
            tracing::error!(error = %format!("{:#}", err), "request failed");
        }
        AppError {
            status,
            code,
            message: format!("{:#}", err),
        }
    }
}

fn require_query(query: &str) -> Result<(), AppError> {
    if query.trim().is_empty() {
        return Err(anyhow::Error::from(KbError::InvalidInput(
            "query must not be empty".to_string(),
        ))
        .into());
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    strategy: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        strategy: state.retriever.strategy_name(),
    })
}

// ============ POST /search ============

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    keyword: Option<bool>,
}

impl QueryRequest {
    fn overrides(&self) -> RetrievalOverrides {
        RetrievalOverrides {
            limit: self.limit,
            threshold: self.threshold,
            keyword: self.keyword,
        }
    }
}

/// A match as returned over HTTP; the embedding is never sent.
#[derive(Debug, Serialize)]
struct MatchView {
    source_path: String,
    chunk_index: i64,
    source_type: SourceType,
    origin: MatchOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    similarity: Option<f64>,
    content: String,
}

impl From<&KnowledgeMatch> for MatchView {
    fn from(m: &KnowledgeMatch) -> Self {
        Self {
            source_path: m.chunk.source_path.clone(),
            chunk_index: m.chunk.chunk_index,
            source_type: m.chunk.source_type,
            origin: m.origin,
            similarity: m.similarity,
            content: m.chunk.content.clone(),
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    strategy: &'static str,
    results: Vec<MatchView>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    require_query(&req.query)?;
    let request = req.overrides().request(&state.config, &req.query);
    let matches = state.retriever.retrieve(&request).await?;

    Ok(Json(SearchResponse {
        strategy: state.retriever.strategy_name(),
        results: matches.iter().map(MatchView::from).collect(),
    }))
}

// ============ POST /ask ============

#[derive(Serialize)]
struct AskResponse {
    #[serde(flatten)]
    answer: Answer,
    context: Vec<MatchView>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<AskResponse>, AppError> {
    require_query(&req.query)?;
    let request = req.overrides().request(&state.config, &req.query);
    let matches = state.retriever.retrieve(&request).await?;
    let answer = state.answerer.answer(&req.query, &matches).await?;

    Ok(Json(AskResponse {
        answer,
        context: matches.iter().map(MatchView::from).collect(),
    }))
}

// ============ POST /ingest ============

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IngestRequest {
    /// One path relative to the ingest root; the whole corpus when absent.
    path: Option<String>,
    priority_only: bool,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestSummary>, AppError> {
    let ingest_config = &state.config.ingest;

    let summary = match req.path.as_deref() {
        Some(path) => {
            let mut summary = IngestSummary::default();
            summary.record(state.ingestor.ingest_path(ingest_config, path).await);
            summary
        }
        None => {
            state
                .ingestor
                .ingest_all(ingest_config, req.priority_only)
                .await?
        }
    };
    Ok(Json(summary))
}
