//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 청크는 `RETRIEVAL_DOCUMENT`, 질문은 `RETRIEVAL_QUERY` 태스크로 임베딩합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::new(api_key, "text-embedding-004", 768, 150)?;
//! let vectors = embedder.embed_batch(&chunks).await?;
//! let query = embedder.embed_query("What is the grace period?").await?;
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, MAX_EMBEDDING_DIMENSION};
use crate::gemini::{model_resource, GeminiClient};

/// batchEmbedContents 요청당 최대 텍스트 수
pub const MAX_BATCH_SIZE: usize = 100;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서 청크 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 검색 질문 임베딩 (기본 구현: 문서와 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// 임베딩 태스크 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

/// Google Gemini 임베딩 구현체
///
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug)]
pub struct GeminiEmbedding {
    client: GeminiClient,
    model: String,
    dimension: usize,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 임베딩 모델 (예: `text-embedding-004`)
    /// * `dimension` - 출력 차원
    /// * `requests_per_minute` - 분당 요청 수 상한
    pub fn new(
        api_key: String,
        model: &str,
        dimension: usize,
        requests_per_minute: u32,
    ) -> Result<Self> {
        if dimension == 0 || dimension > MAX_EMBEDDING_DIMENSION {
            anyhow::bail!(
                "Invalid dimension: {}. Must be between 1 and {}",
                dimension,
                MAX_EMBEDDING_DIMENSION
            );
        }

        Ok(Self {
            client: GeminiClient::new(api_key, requests_per_minute)?,
            model: model_resource(model),
            dimension,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let embedder = Self::new(
            config.api_key()?.to_string(),
            &config.embedding_model,
            config.embedding_dimension,
            config.requests_per_minute,
        )?;
        tracing::info!(
            "Using Gemini embedding {} (dimension: {})",
            embedder.model,
            embedder.dimension
        );
        Ok(embedder)
    }

    /// 기본 URL 변경
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client = self.client.with_base_url(base_url);
        self
    }

    fn build_request(&self, text: &str, task_type: TaskType) -> EmbedRequest {
        EmbedRequest {
            model: self.model.clone(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type,
            output_dimensionality: Some(self.dimension),
        }
    }

    /// 반환된 벡터 차원 검증
    fn check_dimension(&self, values: Vec<f32>) -> Result<Vec<f32>> {
        if values.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                values.len()
            );
        }
        Ok(values)
    }

    async fn embed_single(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>> {
        // 빈 텍스트는 API 호출 없이 영벡터
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let url = self.client.model_url(&self.model, "embedContent");
        let response: EmbedResponse = self
            .client
            .post_json(&url, &self.build_request(text, task_type))
            .await
            .context("Failed to embed text")?;

        self.check_dimension(response.embedding.values)
    }
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: TaskType,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_single(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_single(text, TaskType::RetrievalQuery).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let url = self.client.model_url(&self.model, "batchEmbedContents");
        let batch_count = texts.len().div_ceil(MAX_BATCH_SIZE);

        for (i, batch) in texts.chunks(MAX_BATCH_SIZE).enumerate() {
            tracing::debug!("Embedding batch {}/{} ({} texts)", i + 1, batch_count, batch.len());

            // 빈 텍스트는 요청에서 제외하고 영벡터로 채움
            let non_empty: Vec<&String> = batch.iter().filter(|t| !t.trim().is_empty()).collect();

            let embedded: Vec<Vec<f32>> = if non_empty.is_empty() {
                Vec::new()
            } else {
                let request = BatchEmbedRequest {
                    requests: non_empty
                        .iter()
                        .map(|t| self.build_request(t, TaskType::RetrievalDocument))
                        .collect(),
                };
                let response: BatchEmbedResponse = self
                    .client
                    .post_json(&url, &request)
                    .await
                    .with_context(|| format!("Failed to embed batch {}/{}", i + 1, batch_count))?;

                if response.embeddings.len() != non_empty.len() {
                    anyhow::bail!(
                        "Gemini returned {} embeddings for {} texts",
                        response.embeddings.len(),
                        non_empty.len()
                    );
                }
                response
                    .embeddings
                    .into_iter()
                    .map(|e| self.check_dimension(e.values))
                    .collect::<Result<Vec<_>>>()?
            };
            let mut embedded = embedded.into_iter();

            for text in batch {
                if text.trim().is_empty() {
                    results.push(vec![0.0; self.dimension]);
                } else if let Some(values) = embedded.next() {
                    results.push(values);
                }
            }
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
