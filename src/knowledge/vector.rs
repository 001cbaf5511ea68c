//! Vector Store - 벡터 검색 트레이트 및 유틸리티
//!
//! 모든 검색은 문서 단위(`doc_key`)로 제한됩니다.
//! 한 요청의 질문이 다른 문서의 청크를 근거로 답하지 않도록 하기 위함입니다.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 문서 키 (원본 주소의 SHA-256)
    pub doc_key: String,
    /// 청크 인덱스 (0-based)
    pub chunk_index: i32,
    /// 원본 페이지 번호 (1-based)
    pub page: i32,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub doc_key: String,
    pub chunk_index: i32,
    pub page: i32,
    pub chunk_text: String,
    /// 유사도 스코어 (높을수록 관련성 높음)
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 삽입
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 한 문서 안에서 벡터 검색 (유사도 내림차순)
    async fn search(
        &self,
        doc_key: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    /// 문서의 모든 벡터 삭제
    async fn delete_by_doc(&self, doc_key: &str) -> Result<usize>;

    /// 전체 벡터 개수
    async fn count(&self) -> Result<usize>;

    /// 특정 문서의 임베딩 존재 여부
    async fn has_embeddings(&self, doc_key: &str) -> Result<bool>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 문서 주소로부터 문서 키 생성 (SHA-256 hex)
pub fn document_key(source: &str) -> String {
    let digest = Sha256::digest(source.trim().as_bytes());
    format!("{:x}", digest)
}

/// 문서 키 형식 검증 (필터 문자열에 그대로 들어가므로 hex 만 허용)
pub fn is_valid_doc_key(doc_key: &str) -> bool {
    doc_key.len() == 64 && doc_key.chars().all(|c| c.is_ascii_hexdigit())
}

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
