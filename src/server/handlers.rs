//! 라우트 핸들러

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::knowledge::IndexedDocument;

use super::error::ApiError;
use super::AppState;

/// 필수 필드 누락 메시지
pub const MISSING_FIELDS_MESSAGE: &str = "Missing 'documents' or 'questions' in payload";

const DEFAULT_LIST_LIMIT: usize = 100;

// ============================================================================
// Request / Response
// ============================================================================

/// `POST /hackrx/run` 요청 본문
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// 문서 URL (또는 로컬 경로)
    #[serde(default)]
    pub documents: Option<String>,
    #[serde(default)]
    pub questions: Option<Vec<String>>,
}

/// `POST /hackrx/run` 응답 본문
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    /// 질문 순서와 같은 순서의 답변
    pub answers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DocumentsResponse {
    pub documents: Vec<IndexedDocument>,
    pub total: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// 문서 색인 + 질문 답변
pub async fn run(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!("Rejected payload: {}", rejection.body_text());
        ApiError::BadRequest(format!("Invalid JSON payload: {}", rejection.body_text()))
    })?;

    let documents = request
        .documents
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(MISSING_FIELDS_MESSAGE.to_string()))?;
    let questions = request
        .questions
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest(MISSING_FIELDS_MESSAGE.to_string()))?;

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("hackrx_run", %request_id, questions = questions.len());

    async move {
        tracing::info!("Processing document: {}", documents);
        let answers = state.qa.answer_questions(&documents, &questions).await?;
        tracing::info!("Answered {} questions", answers.len());
        Ok::<_, ApiError>(Json(RunResponse { answers }))
    }
    .instrument(span)
    .await
}

/// 헬스 체크
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// 색인된 문서 목록
pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let documents = state
        .qa
        .index()
        .registry()
        .list_documents(params.limit.unwrap_or(DEFAULT_LIST_LIMIT))?;

    Ok(Json(DocumentsResponse {
        total: documents.len(),
        documents,
    }))
}
