//! HTTP 서버 - axum
//!
//! ## 라우트
//! - `POST /hackrx/run`, `POST /api/v1/hackrx/run`: 문서 질의응답
//! - `GET /documents`: 색인된 문서 목록
//! - `GET /health`: 헬스 체크 (인증 없음)

mod error;
mod handlers;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::knowledge::DocumentIndex;
use crate::llm::{GenerationProvider, GeminiGenerator};
use crate::qa::QaService;

pub use error::ApiError;
pub use handlers::{HealthResponse, RunRequest, RunResponse, MISSING_FIELDS_MESSAGE};

/// 라우트 공유 상태
#[derive(Clone)]
pub struct AppState {
    pub qa: Arc<QaService>,
    /// 설정되면 보호 라우트에 `Authorization: Bearer` 요구
    pub bearer_token: Option<Arc<str>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(qa: Arc<QaService>, bearer_token: Option<String>) -> Self {
        Self {
            qa,
            bearer_token: bearer_token.map(Arc::from),
            started_at: Instant::now(),
        }
    }
}

/// Bearer 토큰 검증 미들웨어
async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    // 토큰 미설정 시 모두 허용
    let Some(expected) = state.bearer_token.as_deref() else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    if provided == Some(expected) {
        next.run(req).await
    } else {
        tracing::warn!("Rejected request to {}: bad bearer token", req.uri().path());
        ApiError::Unauthorized.into_response()
    }
}

/// 라우터 구성
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/hackrx/run", post(handlers::run))
        .route("/api/v1/hackrx/run", post(handlers::run))
        .route("/documents", get(handlers::list_documents))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    let public = Router::new().route("/health", get(handlers::health));

    protected
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 서버 실행 (Ctrl-C 로 종료)
///
/// # Arguments
/// * `config` - 애플리케이션 설정 (API 키 필요)
/// * `in_memory` - 색인을 디스크에 저장하지 않음
pub async fn serve(config: AppConfig, in_memory: bool) -> Result<()> {
    let index = Arc::new(DocumentIndex::from_config(&config, in_memory).await?);
    let generator: Arc<dyn GenerationProvider> = Arc::new(
        GeminiGenerator::from_config(&config).context("Failed to create generator")?,
    );
    let qa = Arc::new(QaService::new(
        index,
        generator,
        config.top_k,
        config.max_concurrent_questions,
    ));

    if config.bearer_token.is_some() {
        tracing::info!("Bearer token authentication enabled");
    }

    let app = router(AppState::new(qa, config.bearer_token.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

// ============================================================================
// Tests
// ============================================================================
