//! LanceDB Vector Store - 디스크 기반 벡터 검색
//!
//! 모든 문서의 청크를 하나의 `chunks` 테이블에 저장하고,
//! 검색 시 `doc_key` 필터로 문서 범위를 제한합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use tokio::sync::Mutex;

use super::vector::{is_valid_doc_key, SearchResult, VectorEntry, VectorStore};

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    dimension: i32,
    /// 테이블 생성/추가/삭제 직렬화
    write_lock: Mutex<()>,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원 (테이블 스키마에 고정됨)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let dimension = i32::try_from(dimension).context("Embedding dimension too large")?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        tracing::debug!("LanceDB opened at {} (dimension={})", path_str, dimension);

        Ok(Self {
            db,
            dimension,
            write_lock: Mutex::new(()),
        })
    }

    /// 청크 테이블 스키마
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("doc_key", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("page", DataType::Int32, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != self.dimension as usize)
        {
            anyhow::bail!(
                "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                bad.chunk_index,
                self.dimension,
                bad.embedding.len()
            );
        }

        let doc_keys: Vec<&str> = entries.iter().map(|e| e.doc_key.as_str()).collect();
        let chunk_indices: Vec<i32> = entries.iter().map(|e| e.chunk_index).collect();
        let pages: Vec<i32> = entries.iter().map(|e| e.page).collect();
        let chunk_texts: Vec<&str> = entries.iter().map(|e| e.chunk_text.as_str()).collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(Self::create_schema(self.dimension)),
            vec![
                Arc::new(StringArray::from(doc_keys)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(Int32Array::from(pages)),
                Arc::new(StringArray::from(chunk_texts)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open chunk table")?;
        Ok(Some(table))
    }

    /// 문서 키 필터 (hex 만 허용 - 필터 인젝션 방지)
    fn doc_filter(doc_key: &str) -> Result<String> {
        if !is_valid_doc_key(doc_key) {
            anyhow::bail!("Invalid document key: {:?}", doc_key);
        }
        Ok(format!("doc_key = '{}'", doc_key))
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let _guard = self.write_lock.lock().await;

        match self.open_table().await? {
            Some(table) => {
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add vectors to table")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
            }
        }

        Ok(entries.len())
    }

    async fn search(
        &self,
        doc_key: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let filter = Self::doc_filter(doc_key)?;

        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let stream = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .only_if(filter)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to read vector search results")?;

        let mut search_results = Vec::new();

        for batch in batches {
            let doc_keys = batch
                .column_by_name("doc_key")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing doc_key column"))?;

            let chunk_indices = batch
                .column_by_name("chunk_index")
                .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_index column"))?;

            let pages = batch
                .column_by_name("page")
                .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing page column"))?;

            let chunk_texts = batch
                .column_by_name("chunk_text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_text column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가, L2)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                search_results.push(SearchResult {
                    doc_key: doc_keys.value(i).to_string(),
                    chunk_index: chunk_indices.value(i),
                    page: pages.value(i),
                    chunk_text: chunk_texts.value(i).to_string(),
                    similarity: 1.0 / (1.0 + distances.value(i)),
                });
            }
        }

        search_results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        search_results.truncate(limit);

        Ok(search_results)
    }

    async fn delete_by_doc(&self, doc_key: &str) -> Result<usize> {
        let filter = Self::doc_filter(doc_key)?;

        let _guard = self.write_lock.lock().await;

        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows before delete")?;

        if before == 0 {
            return Ok(0);
        }

        table
            .delete(&filter)
            .await
            .context("Failed to delete vectors")?;

        Ok(before)
    }

    async fn count(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        table.count_rows(None).await.context("Failed to count rows")
    }

    async fn has_embeddings(&self, doc_key: &str) -> Result<bool> {
        let filter = Self::doc_filter(doc_key)?;

        let Some(table) = self.open_table().await? else {
            return Ok(false);
        };

        let count = table
            .count_rows(Some(filter))
            .await
            .context("Failed to count rows for document")?;

        Ok(count > 0)
    }
}

// ============================================================================
// Tests
// ============================================================================
