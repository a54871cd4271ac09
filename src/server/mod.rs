//! HTTP API 서버
//!
//! - `POST /query` : `{collectionId, query, sessionId}` -> `{result}`
//! - `GET /health` : 상태 및 캐시/세션 수

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::RagError;
use crate::orchestrator::{QueryOrchestrator, QueryRequest};

/// 시간 초과 응답의 Retry-After (초)
pub const RETRY_AFTER_SECS: u64 = 5;

// ============================================================================
// State
// ============================================================================

/// 핸들러 공유 상태
pub struct AppState {
    pub orchestrator: Arc<QueryOrchestrator>,
    started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<QueryOrchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

// ============================================================================
// Router
// ============================================================================

/// 라우터 생성
///
/// `cors_origin`이 없으면 모든 origin을 허용합니다.
pub fn create_router(state: Arc<AppState>, cors_origin: Option<&str>) -> Result<Router> {
    let cors = match cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                HeaderValue::from_str(origin)
                    .with_context(|| format!("Invalid CORS origin: {}", origin))?,
            )
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Ok(Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// 서버 실행 (Ctrl+C로 정상 종료)
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    cors_origin: Option<&str>,
) -> Result<()> {
    let app = create_router(state, cors_origin)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("API server failed")?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// 상태 응답
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub cached_collections: usize,
    pub active_sessions: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        cached_collections: state.orchestrator.indexes().cached_count(),
        active_sessions: state.orchestrator.sessions().session_count(),
    })
}

/// 질의 응답
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub result: String,
}

async fn query(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> std::result::Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::Body)?;
    let outcome = state.orchestrator.answer(&request).await?;
    Ok(Json(QueryResponse {
        result: outcome.answer,
    }))
}

// ============================================================================
// Errors
// ============================================================================

/// 에러 응답 본문
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
}

/// HTTP 경계 에러
#[derive(Debug)]
pub enum ApiError {
    /// JSON 본문을 읽을 수 없음
    Body(JsonRejection),
    Rag(RagError),
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        Self::Rag(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Body(rejection) => {
                tracing::warn!(error = %rejection.body_text(), "Rejected request body");
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: "Bad request".to_string(),
                        details: rejection.body_text(),
                    }),
                )
                    .into_response()
            }
            Self::Rag(RagError::Validation(message)) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Bad request".to_string(),
                    details: message,
                }),
            )
                .into_response(),
            Self::Rag(e @ RagError::Timeout(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                Json(ErrorResponse {
                    error: "Request timed out".to_string(),
                    details: e.to_string(),
                }),
            )
                .into_response(),
            Self::Rag(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Internal server error".to_string(),
                    details: e.to_string(),
                }),
            )
                .into_response(),
        }
    }
}
