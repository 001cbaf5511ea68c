//! 메모리 벡터 저장소
//!
//! 프로세스 수명 동안만 유지되는 저장소입니다.
//! `serve --in-memory` 모드와 테스트에서 사용합니다.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector::{cosine_similarity, SearchResult, VectorEntry, VectorStore};

/// 코사인 유사도 기반 선형 탐색 저장소
#[derive(Default)]
pub struct MemoryVectorStore {
    entries: RwLock<Vec<VectorEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        let mut stored = self.entries.write().await;
        stored.extend_from_slice(entries);
        Ok(entries.len())
    }

    async fn search(
        &self,
        doc_key: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let stored = self.entries.read().await;

        let mut results: Vec<SearchResult> = stored
            .iter()
            .filter(|e| e.doc_key == doc_key)
            .map(|e| SearchResult {
                doc_key: e.doc_key.clone(),
                chunk_index: e.chunk_index,
                page: e.page,
                chunk_text: e.chunk_text.clone(),
                similarity: cosine_similarity(query_embedding, &e.embedding),
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        results.truncate(limit);

        Ok(results)
    }

    async fn delete_by_doc(&self, doc_key: &str) -> Result<usize> {
        let mut stored = self.entries.write().await;
        let before = stored.len();
        stored.retain(|e| e.doc_key != doc_key);
        Ok(before - stored.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn has_embeddings(&self, doc_key: &str) -> Result<bool> {
        Ok(self.entries.read().await.iter().any(|e| e.doc_key == doc_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(doc_key: &str, chunk_index: i32, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry {
            doc_key: doc_key.to_string(),
            chunk_index,
            page: 1,
            chunk_text: format!("chunk {} of {}", chunk_index, doc_key),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity_within_document() {
        let store = MemoryVectorStore::new();
        store
            .insert_batch(&[
                entry("doc-a", 0, vec![1.0, 0.0]),
                entry("doc-a", 1, vec![0.0, 1.0]),
                entry("doc-a", 2, vec![0.7, 0.7]),
                entry("doc-b", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store.search("doc-a", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_index, 0);
        assert_eq!(results[1].chunk_index, 2);
        assert!(results.iter().all(|r| r.doc_key == "doc-a"));
    }

    #[tokio::test]
    async fn test_delete_and_count() {
        let store = MemoryVectorStore::new();
        store
            .insert_batch(&[
                entry("doc-a", 0, vec![1.0]),
                entry("doc-a", 1, vec![1.0]),
                entry("doc-b", 0, vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert!(store.has_embeddings("doc-a").await.unwrap());

        assert_eq!(store.delete_by_doc("doc-a").await.unwrap(), 2);
        assert!(!store.has_embeddings("doc-a").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_unknown_document_is_empty() {
        let store = MemoryVectorStore::new();
        let results = store.search("missing", &[1.0], 4).await.unwrap();
        assert!(results.is_empty());
    }
}
