//! palank-docqa - 문서 URL 기반 질의응답 서버
//!
//! 문서(PDF/HTML/텍스트)를 내려받아 청크로 나누고 Gemini 로 임베딩한 뒤
//! LanceDB 에 저장하고, 질문마다 관련 청크를 문맥으로 Gemini 답변을 생성합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod gemini;
pub mod knowledge;
pub mod llm;
pub mod loader;
pub mod qa;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::{get_api_key, get_data_dir, has_api_key, AppConfig};
pub use embedding::{EmbeddingProvider, GeminiEmbedding};
pub use knowledge::{
    ChunkConfig, Chunker, DocumentIndex, DocumentRegistry, IndexedDocument, LanceVectorStore,
    MemoryVectorStore, RecursiveChunker, SearchResult, VectorEntry, VectorStore,
};
pub use llm::{GeminiGenerator, GenerationProvider};
pub use loader::{DocumentFormat, DocumentLoader, DocumentSource, LoadedDocument, Page};
pub use qa::QaService;
