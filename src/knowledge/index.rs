//! 문서 색인 - 로드/청킹/임베딩/저장 파이프라인
//!
//! 문서 하나를 받아 레지스트리(SQLite)와 벡터 저장소(LanceDB)에 기록하고,
//! 질문이 들어오면 같은 문서 안에서 관련 청크를 찾습니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::embedding::{EmbeddingProvider, GeminiEmbedding};
use crate::loader::DocumentLoader;

use super::chunker::{chunk_pages, recursive_chunker, Chunker};
use super::lance::LanceVectorStore;
use super::memory::MemoryVectorStore;
use super::store::{DocumentRegistry, IndexedDocument, NewDocument};
use super::vector::{document_key, SearchResult, VectorEntry, VectorStore};

// ============================================================================
// Types
// ============================================================================

/// 색인 통계
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    /// 레지스트리에 기록된 청크 수
    pub chunk_count: usize,
    /// 벡터 저장소의 실제 행 수
    pub vector_count: usize,
    pub total_content_bytes: usize,
}

// ============================================================================
// DocumentIndex
// ============================================================================

/// 문서 색인기
pub struct DocumentIndex {
    registry: DocumentRegistry,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Box<dyn Chunker>,
    loader: DocumentLoader,
    /// 같은 문서를 동시에 두 번 색인하지 않도록 직렬화
    index_lock: Mutex<()>,
}

impl DocumentIndex {
    pub fn new(
        registry: DocumentRegistry,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Box<dyn Chunker>,
        loader: DocumentLoader,
    ) -> Self {
        Self {
            registry,
            vector,
            embedder,
            chunker,
            loader,
            index_lock: Mutex::new(()),
        }
    }

    /// 설정에서 생성
    ///
    /// # Arguments
    /// * `config` - 애플리케이션 설정 (API 키 필요)
    /// * `in_memory` - true 면 디스크에 아무것도 쓰지 않음
    pub async fn from_config(config: &AppConfig, in_memory: bool) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            GeminiEmbedding::from_config(config).context("Failed to create embedder")?,
        );

        let (registry, vector): (DocumentRegistry, Arc<dyn VectorStore>) = if in_memory {
            tracing::info!("Using in-memory document index");
            (
                DocumentRegistry::open_in_memory()?,
                Arc::new(MemoryVectorStore::new()),
            )
        } else {
            if !config.data_dir.exists() {
                std::fs::create_dir_all(&config.data_dir)
                    .context("Failed to create data directory")?;
            }

            let registry = DocumentRegistry::open(&config.registry_path())
                .context("Failed to open document registry")?;
            let vector =
                LanceVectorStore::open(&config.vectors_path(), config.embedding_dimension)
                    .await
                    .context("Failed to open vector store")?;

            tracing::info!("Document index at {}", config.data_dir.display());
            (registry, Arc::new(vector))
        };

        Ok(Self::new(
            registry,
            vector,
            embedder,
            recursive_chunker(config.chunk.clone()),
            DocumentLoader::new(config.max_document_bytes)?
                .with_local_documents(config.allow_local_documents),
        ))
    }

    /// 문서 색인
    ///
    /// 문서는 매번 새로 가져옵니다. 같은 주소의 기존 색인이 있고 원본 해시가 같으며
    /// `force` 가 false 면 임베딩을 건너뛰고 기존 색인을 반환합니다.
    /// 그 외에는 청킹 → 임베딩 → 벡터 교체 → 레지스트리 갱신 순으로 진행합니다.
    pub async fn index_document(&self, source: &str, force: bool) -> Result<IndexedDocument> {
        let source = source.trim();
        let doc_key = document_key(source);

        let document = self
            .loader
            .load(source)
            .await
            .with_context(|| format!("Failed to load document: {}", source))?;

        if !force {
            if let Some(existing) = self.cached(&doc_key, &document.content_hash).await? {
                return Ok(existing);
            }
        }

        let _guard = self.index_lock.lock().await;

        // 대기 중 다른 요청이 같은 내용을 색인했을 수 있음
        if !force {
            if let Some(existing) = self.cached(&doc_key, &document.content_hash).await? {
                return Ok(existing);
            }
        }

        let chunks = chunk_pages(self.chunker.as_ref(), &document.pages);
        if chunks.is_empty() {
            tracing::warn!("No text extracted from {}; indexing with zero chunks", source);
        } else {
            tracing::info!(
                "Split {} into {} chunks ({})",
                source,
                chunks.len(),
                self.chunker.name()
            );
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed_batch(&texts)
                .await
                .context("Failed to embed chunks")?
        };

        if embeddings.len() != chunks.len() {
            anyhow::bail!(
                "Embedding count mismatch: {} chunks, {} embeddings",
                chunks.len(),
                embeddings.len()
            );
        }

        let entries: Vec<VectorEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorEntry {
                doc_key: doc_key.clone(),
                chunk_index: chunk.index as i32,
                page: chunk.page as i32,
                chunk_text: chunk.text,
                embedding,
            })
            .collect();

        let removed = self
            .vector
            .delete_by_doc(&doc_key)
            .await
            .context("Failed to clear previous vectors")?;
        if removed > 0 {
            tracing::debug!("Removed {} stale vectors for {}", removed, source);
        }

        if !entries.is_empty() {
            self.vector
                .insert_batch(&entries)
                .await
                .context("Failed to insert vectors")?;
        }

        let id = self.registry.upsert(NewDocument {
            doc_key,
            source: source.to_string(),
            format: document.format.to_string(),
            page_count: document.pages.len(),
            chunk_count: entries.len(),
            content_bytes: document.content_bytes(),
            content_hash: document.content_hash.clone(),
        })?;

        self.registry
            .get_document(id)?
            .ok_or_else(|| anyhow::anyhow!("Document {} vanished from registry", id))
    }

    /// 재사용 가능한 기존 색인
    async fn cached(&self, doc_key: &str, content_hash: &str) -> Result<Option<IndexedDocument>> {
        let Some(existing) = self.registry.get_by_key(doc_key)? else {
            return Ok(None);
        };

        if existing.content_hash != content_hash {
            tracing::info!("Content changed for {}; re-indexing", existing.source);
            return Ok(None);
        }

        // 레지스트리만 남고 벡터가 사라진 경우는 다시 색인
        if existing.chunk_count > 0 && !self.vector.has_embeddings(doc_key).await? {
            tracing::warn!("Vectors missing for {}; re-indexing", existing.source);
            return Ok(None);
        }

        tracing::info!(
            "Reusing index for {} (id={}, chunks={})",
            existing.source,
            existing.id,
            existing.chunk_count
        );
        Ok(Some(existing))
    }

    /// 문서 안에서 질문과 가장 가까운 청크 검색
    pub async fn retrieve(
        &self,
        document: &IndexedDocument,
        question: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        if document.chunk_count == 0 || limit == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed_query(question)
            .await
            .context("Failed to embed question")?;

        self.vector
            .search(&document.doc_key, &query_embedding, limit)
            .await
            .context("Vector search failed")
    }

    /// 문서 삭제 (벡터 + 레지스트리)
    pub async fn delete_document(&self, id: i64) -> Result<bool> {
        remove_document(&self.registry, self.vector.as_ref(), id).await
    }

    /// 색인 통계
    pub async fn stats(&self) -> Result<IndexStats> {
        let registry_stats = self.registry.stats()?;
        let vector_count = self.vector.count().await?;

        Ok(IndexStats {
            document_count: registry_stats.document_count,
            chunk_count: registry_stats.chunk_count,
            vector_count,
            total_content_bytes: registry_stats.total_content_bytes,
        })
    }

    /// 내부 레지스트리 접근
    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }
}

/// 레지스트리와 벡터 저장소에서 문서 제거
///
/// 임베딩 없이 저장소만 열어야 하는 CLI 명령에서도 사용합니다.
pub async fn remove_document(
    registry: &DocumentRegistry,
    vector: &dyn VectorStore,
    id: i64,
) -> Result<bool> {
    let Some(doc) = registry.get_document(id)? else {
        return Ok(false);
    };

    // 벡터 먼저 삭제
    let removed = vector.delete_by_doc(&doc.doc_key).await?;
    tracing::info!("Deleted {} vectors for {}", removed, doc.source);

    registry.delete_document(id)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_index, write_document};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const POLICY: &str = "The grace period for premium payment is thirty days.\n\n\
        Maternity expenses are covered after nine months of continuous coverage.\n\n\
        Cataract surgery has a waiting period of two years.";

    #[tokio::test]
    async fn test_index_document_records_chunks() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (index, embedder) = test_index();

        let doc = index.index_document(&source, false).await.unwrap();
        assert_eq!(doc.format, "text");
        assert_eq!(doc.page_count, 1);
        assert_eq!(doc.chunk_count, 3);
        assert_eq!(doc.doc_key, document_key(&source));

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.vector_count, 3);
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_index_document_reuses_existing_index() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (index, embedder) = test_index();

        let first = index.index_document(&source, false).await.unwrap();
        let second = index.index_document(&source, false).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);

        // force 는 다시 임베딩하지만 벡터는 중복되지 않음
        let third = index.index_document(&source, true).await.unwrap();
        assert_eq!(first.id, third.id);
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(index.stats().await.unwrap().vector_count, 3);
    }

    #[tokio::test]
    async fn test_changed_content_is_reindexed() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (index, embedder) = test_index();

        let first = index.index_document(&source, false).await.unwrap();
        write_document(&dir, "policy.txt", "The grace period is fifteen days.");

        let second = index.index_document(&source, false).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(second.chunk_count, 1);
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 2);

        // 이전 내용의 벡터는 남지 않음
        let results = index.retrieve(&second, "grace period", 4).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].chunk_text.contains("fifteen"));
        assert_eq!(index.stats().await.unwrap().vector_count, 1);
    }

    #[tokio::test]
    async fn test_local_documents_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let embedder = Arc::new(crate::testing::HashEmbedding::default());
        let index = DocumentIndex::new(
            DocumentRegistry::open_in_memory().unwrap(),
            Arc::new(MemoryVectorStore::new()),
            embedder,
            recursive_chunker(crate::knowledge::ChunkConfig::default()),
            DocumentLoader::new(1024).unwrap().with_local_documents(false),
        );

        let err = index.index_document(&source, false).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Local documents are disabled"));
        assert_eq!(index.stats().await.unwrap().document_count, 0);
    }

    #[tokio::test]
    async fn test_retrieve_ranks_matching_chunk_first() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (index, _) = test_index();

        let doc = index.index_document(&source, false).await.unwrap();
        let results = index
            .retrieve(&doc, "waiting period for cataract surgery", 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].chunk_text.contains("Cataract"));
        assert!(results.iter().all(|r| r.doc_key == doc.doc_key));
    }

    #[tokio::test]
    async fn test_retrieve_is_scoped_to_document() {
        let dir = TempDir::new().unwrap();
        let policy = write_document(&dir, "policy.txt", POLICY);
        let other = write_document(&dir, "other.txt", "Cataract cataract cataract surgery.");
        let (index, _) = test_index();

        let policy_doc = index.index_document(&policy, false).await.unwrap();
        index.index_document(&other, false).await.unwrap();

        let results = index.retrieve(&policy_doc, "cataract", 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.doc_key == policy_doc.doc_key));
    }

    #[tokio::test]
    async fn test_empty_document_indexes_zero_chunks() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "blank.txt", "   \n\n  ");
        let (index, embedder) = test_index();

        let doc = index.index_document(&source, false).await.unwrap();
        assert_eq!(doc.chunk_count, 0);
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 0);

        let results = index.retrieve(&doc, "anything", 4).await.unwrap();
        assert!(results.is_empty());

        // 빈 문서도 캐시됨
        let again = index.index_document(&source, false).await.unwrap();
        assert_eq!(doc.id, again.id);
    }

    #[tokio::test]
    async fn test_missing_document_is_error() {
        let dir = TempDir::new().unwrap();
        let (index, _) = test_index();

        let missing = dir.path().join("missing.pdf");
        let err = index
            .index_document(missing.to_str().unwrap(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load document"));
        assert_eq!(index.stats().await.unwrap().document_count, 0);
    }

    #[tokio::test]
    async fn test_delete_document_removes_vectors() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (index, _) = test_index();

        let doc = index.index_document(&source, false).await.unwrap();
        assert!(index.delete_document(doc.id).await.unwrap());
        assert!(!index.delete_document(doc.id).await.unwrap());

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.vector_count, 0);
    }
}
