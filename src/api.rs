//! REST API server for the conversation digest
//!
//! Exposes analysis and search over HTTP.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analysis::AnalysisReport;
use crate::context::AppContext;
use crate::error::DigestError;
use crate::models::ChunkSummary;

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Restrict the search to these conversations
    #[serde(default)]
    pub conversation_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunksResponse {
    pub conversation_id: String,
    pub chunks: Vec<ChunkSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn error_response(e: DigestError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        DigestError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    error!(%status, "Request failed: {}", e);
    (
        status,
        Json(ErrorResponse {
            detail: e.to_string(),
        }),
    )
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Search Endpoint
/// =============================

async fn search_conversation(
    State(state): State<AppContext>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    info!("Received search request: {}", req.query);

    let result = match req.conversation_ids {
        Some(ids) => state.search.search_in(&req.query, &ids).await,
        None => state.search.search(&req.query).await,
    };

    result
        .map(|result| Json(SearchResponse { result }))
        .map_err(error_response)
}

/// =============================
/// Analysis Endpoints
/// =============================

async fn analyze_conversation(
    State(state): State<AppContext>,
    Path(conversation_id): Path<String>,
) -> ApiResult<ChunksResponse> {
    let chunks = state
        .analyzer
        .analyze(&conversation_id)
        .await
        .map_err(error_response)?;

    Ok(Json(ChunksResponse {
        conversation_id,
        chunks,
    }))
}

async fn analyze_all(State(state): State<AppContext>) -> ApiResult<AnalysisReport> {
    state
        .analyzer
        .analyze_all()
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_chunks(
    State(state): State<AppContext>,
    Path(conversation_id): Path<String>,
) -> ApiResult<ChunksResponse> {
    let chunks = state
        .analyzer
        .chunk_summaries(&conversation_id)
        .await
        .map_err(error_response)?;

    Ok(Json(ChunksResponse {
        conversation_id,
        chunks,
    }))
}

/// =============================
/// Router
/// =============================

pub fn create_router(context: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search-conversation", post(search_conversation))
        .route("/api/conversations/analyze", post(analyze_all))
        .route("/api/conversations/:id/analyze", post(analyze_conversation))
        .route("/api/conversations/:id/chunks", get(get_chunks))
        .with_state(context)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    context: AppContext,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(context.clone());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    context.shutdown().await;
    Ok(())
}
