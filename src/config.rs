//! 설정 모듈
//!
//! 환경변수(및 `.env` 파일)에서 서버/파이프라인 설정을 읽어옵니다.
//! CLI 플래그가 주어지면 환경변수 값을 덮어씁니다.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::knowledge::ChunkConfig;

/// API 키 환경변수 (우선순위 순)
pub const API_KEY_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "GOOGLE_AI_API_KEY"];

/// 최대 임베딩 차원 (Gemini 임베딩 모델 상한)
pub const MAX_EMBEDDING_DIMENSION: usize = 3072;

/// 고정 768 차원을 반환하는 구형 임베딩 모델
const LEGACY_768_MODELS: [&str; 2] = ["text-embedding-004", "embedding-001"];

// ============================================================================
// Data Directory
// ============================================================================

/// 기본 데이터 디렉토리 (~/.palank-docqa/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-docqa")
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위: `GEMINI_API_KEY` > `GOOGLE_API_KEY` > `GOOGLE_AI_API_KEY`
pub fn get_api_key() -> Result<String> {
    for var in API_KEY_VARS {
        if let Ok(key) = std::env::var(var) {
            if !key.trim().is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key.trim().to_string());
            }
        }
    }

    bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 설정 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

/// 모델이 지원하는 최대 출력 차원
pub fn model_max_dimension(model: &str) -> usize {
    let name = model.trim_start_matches("models/");
    if LEGACY_768_MODELS.contains(&name) {
        768
    } else {
        MAX_EMBEDDING_DIMENSION
    }
}

// ============================================================================
// AppConfig
// ============================================================================

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Gemini API 키 (없으면 서버/질의 명령 실행 불가)
    pub api_key: Option<String>,
    pub host: String,
    pub port: u16,
    /// registry.db 와 chunks.lance 가 저장되는 디렉토리
    pub data_dir: PathBuf,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub generation_model: String,
    /// 생성 샘플링 온도 (없으면 모델 기본값)
    pub generation_temperature: Option<f32>,
    pub chunk: ChunkConfig,
    /// 질문당 검색할 청크 수
    pub top_k: usize,
    /// 동시에 처리할 질문 수
    pub max_concurrent_questions: usize,
    /// Gemini 엔드포인트별 분당 요청 수 상한
    pub requests_per_minute: u32,
    pub max_document_bytes: usize,
    /// 설정되면 `/hackrx/run` 호출 시 `Authorization: Bearer` 검증
    pub bearer_token: Option<String>,
    /// false 면 로컬 경로/file:// 문서 거부 (http(s) 만 허용)
    pub allow_local_documents: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            data_dir: get_data_dir(),
            embedding_model: "text-embedding-004".to_string(),
            embedding_dimension: 768,
            generation_model: "gemini-1.5-flash".to_string(),
            generation_temperature: None,
            chunk: ChunkConfig::default(),
            top_k: 4,
            max_concurrent_questions: 4,
            requests_per_minute: 150,
            max_document_bytes: 50 * 1024 * 1024,
            bearer_token: None,
            allow_local_documents: true,
        }
    }
}

impl AppConfig {
    /// `.env` 파일과 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        // .env 파일은 선택 사항
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }

        let defaults = Self::default();

        let config = Self {
            api_key: get_api_key().ok(),
            host: env_string("DOCQA_HOST").unwrap_or(defaults.host),
            port: env_parse("DOCQA_PORT")?.unwrap_or(defaults.port),
            data_dir: env_string("DOCQA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            embedding_model: env_string("DOCQA_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dimension: env_parse("DOCQA_EMBEDDING_DIMENSION")?
                .unwrap_or(defaults.embedding_dimension),
            generation_model: env_string("DOCQA_GENERATION_MODEL")
                .unwrap_or(defaults.generation_model),
            generation_temperature: env_parse("DOCQA_TEMPERATURE")?,
            chunk: ChunkConfig {
                chunk_size: env_parse("DOCQA_CHUNK_SIZE")?.unwrap_or(defaults.chunk.chunk_size),
                chunk_overlap: env_parse("DOCQA_CHUNK_OVERLAP")?
                    .unwrap_or(defaults.chunk.chunk_overlap),
            },
            top_k: env_parse("DOCQA_TOP_K")?.unwrap_or(defaults.top_k),
            max_concurrent_questions: env_parse("DOCQA_MAX_CONCURRENT_QUESTIONS")?
                .unwrap_or(defaults.max_concurrent_questions),
            requests_per_minute: env_parse("DOCQA_REQUESTS_PER_MINUTE")?
                .unwrap_or(defaults.requests_per_minute),
            max_document_bytes: env_parse("DOCQA_MAX_DOCUMENT_BYTES")?
                .unwrap_or(defaults.max_document_bytes),
            bearer_token: env_string("DOCQA_BEARER_TOKEN"),
            allow_local_documents: env_parse("DOCQA_ALLOW_LOCAL_DOCUMENTS")?
                .unwrap_or(defaults.allow_local_documents),
        };

        config.validate()?;
        Ok(config)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        self.chunk.validate()?;

        if self.top_k == 0 {
            bail!("DOCQA_TOP_K must be at least 1");
        }
        if self.max_concurrent_questions == 0 {
            bail!("DOCQA_MAX_CONCURRENT_QUESTIONS must be at least 1");
        }
        if self.requests_per_minute == 0 {
            bail!("DOCQA_REQUESTS_PER_MINUTE must be at least 1");
        }
        let max_dimension = model_max_dimension(&self.embedding_model);
        if self.embedding_dimension == 0 || self.embedding_dimension > max_dimension {
            bail!(
                "Invalid embedding dimension: {}. {} supports between 1 and {}",
                self.embedding_dimension,
                self.embedding_model,
                max_dimension
            );
        }
        if let Some(temperature) = self.generation_temperature {
            if !(0.0..=2.0).contains(&temperature) {
                bail!("DOCQA_TEMPERATURE must be between 0.0 and 2.0");
            }
        }
        if self.max_document_bytes == 0 {
            bail!("DOCQA_MAX_DOCUMENT_BYTES must be greater than 0");
        }

        Ok(())
    }

    /// API 키 반환 (없으면 설정 방법 안내 에러)
    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set.\n\
                 Set: export GEMINI_API_KEY=your-api-key\n\
                 Get your API key at: https://aistudio.google.com/app/apikey"
            )
        })
    }

    /// 서버 바인드 주소
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.db")
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir.join("chunks.lance")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 비어있지 않은 환경변수 값
fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 환경변수 파싱 (없으면 None, 형식 오류면 에러)
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        None => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================
