//! 테스트용 가짜 프로바이더
//!
//! 네트워크 없이 색인/질의응답/HTTP 경로를 검증하기 위한 구현들입니다.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tempfile::TempDir;

use crate::embedding::EmbeddingProvider;
use crate::knowledge::{
    recursive_chunker, ChunkConfig, DocumentIndex, DocumentRegistry, MemoryVectorStore,
};
use crate::llm::GenerationProvider;
use crate::loader::DocumentLoader;

pub const TEST_DIMENSION: usize = 256;

/// 단어 해시 기반 결정적 임베딩
///
/// 같은 단어를 공유하는 텍스트끼리 코사인 유사도가 높아집니다.
#[derive(Default)]
pub struct HashEmbedding {
    pub batch_calls: AtomicUsize,
}

impl HashEmbedding {
    fn vectorize(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; TEST_DIMENSION];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % TEST_DIMENSION as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// 생성기 응답 방식
pub enum Reply {
    /// 고정 텍스트
    Fixed(String),
    /// 프롬프트의 질문을 그대로 돌려줌
    EchoQuestion,
    /// 항상 실패
    Fail(String),
}

/// 미리 정한 대로 답하는 생성기 (받은 프롬프트 기록)
pub struct ScriptedGenerator {
    reply: Reply,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        match &self.reply {
            Reply::Fixed(text) => Ok(text.clone()),
            Reply::EchoQuestion => Ok(prompt
                .split("Question: ")
                .nth(1)
                .and_then(|rest| rest.lines().next())
                .unwrap_or_default()
                .to_string()),
            Reply::Fail(message) => Err(anyhow::anyhow!(message.clone())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 메모리 레지스트리 + 메모리 벡터 저장소 + 해시 임베딩으로 구성된 색인
pub fn test_index() -> (DocumentIndex, Arc<HashEmbedding>) {
    let embedder = Arc::new(HashEmbedding::default());
    let index = DocumentIndex::new(
        DocumentRegistry::open_in_memory().unwrap(),
        Arc::new(MemoryVectorStore::new()),
        embedder.clone(),
        recursive_chunker(ChunkConfig {
            chunk_size: 80,
            chunk_overlap: 20,
        }),
        DocumentLoader::new(1024 * 1024).unwrap(),
    );
    (index, embedder)
}

/// 임시 디렉토리에 문서를 쓰고 경로 문자열 반환
pub fn write_document(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

// ============================================================================
// Stub HTTP Server
// ============================================================================

/// 스텁 서버가 돌려줄 응답
#[derive(Clone)]
pub struct StubResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// true 면 Content-Length 없이 두 조각으로 스트리밍
    pub chunked: bool,
}

impl StubResponse {
    pub fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
            chunked: false,
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self::new(status, "application/json", body)
    }

    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }
}

/// 스텁 서버가 받은 요청
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub api_key: Option<String>,
    pub body: String,
}

#[derive(Clone)]
struct StubState {
    responses: Arc<Vec<StubResponse>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// 정해진 순서대로 응답하는 로컬 HTTP 서버 (마지막 응답은 반복)
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubServer {
    pub async fn start(responses: Vec<StubResponse>) -> Self {
        let state = StubState {
            responses: Arc::new(responses),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let requests = state.requests.clone();

        let app = Router::new().fallback(respond).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

async fn respond(
    State(state): State<StubState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let index = {
        let mut requests = state.requests.lock().unwrap();
        requests.push(RecordedRequest {
            path: uri.path().to_string(),
            api_key: headers
                .get("x-goog-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        requests.len() - 1
    };

    let reply = &state.responses[index.min(state.responses.len() - 1)];
    let status = StatusCode::from_u16(reply.status).unwrap();

    let body = if reply.chunked {
        let (head, tail) = reply.body.split_at(reply.body.len() / 2);
        let pieces = vec![
            Ok::<_, std::io::Error>(Bytes::copy_from_slice(head)),
            Ok(Bytes::copy_from_slice(tail)),
        ];
        Body::from_stream(futures::stream::iter(pieces))
    } else {
        Body::from(reply.body.clone())
    };

    (status, [(header::CONTENT_TYPE, reply.content_type)], body).into_response()
}
