//! Knowledge 모듈 - 문서 색인과 검색
//!
//! - SQLite: 색인된 문서 레지스트리
//! - LanceDB: 청크 벡터 검색 (문서 단위 필터)
//! - Memory: 프로세스 내 벡터 저장소
//! - Chunker: 재귀 문자 분할

mod chunker;
mod index;
mod lance;
mod memory;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    chunk_pages, recursive_chunker, Chunk, ChunkConfig, Chunker,
    RecursiveChunker, DEFAULT_SEPARATORS,
};
pub use index::{remove_document, DocumentIndex, IndexStats};
pub use lance::LanceVectorStore;
pub use memory::MemoryVectorStore;
pub use store::{DocumentRegistry, IndexedDocument, NewDocument, RegistryStats};
pub use vector::{
    cosine_similarity, document_key, is_valid_doc_key, SearchResult, VectorEntry, VectorStore,
};
