//! Document Registry - rusqlite 기반 색인 문서 목록
//!
//! 색인된 문서마다 한 행을 기록합니다. 벡터는 LanceDB 에 있고,
//! 여기에는 재색인 여부 판단과 목록 조회에 필요한 메타데이터만 둡니다.
//! 저장 위치: ~/.palank-docqa/registry.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 색인된 문서 엔트리
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: i64,
    /// 원본 주소의 SHA-256 (벡터 저장소 필터 키)
    pub doc_key: String,
    pub source: String,
    pub format: String,
    pub page_count: usize,
    pub chunk_count: usize,
    /// 추출된 텍스트 크기
    pub content_bytes: usize,
    /// 색인 당시 원본 바이트의 SHA-256
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub doc_key: String,
    pub source: String,
    pub format: String,
    pub page_count: usize,
    pub chunk_count: usize,
    pub content_bytes: usize,
    pub content_hash: String,
}

/// 레지스트리 통계
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub total_content_bytes: usize,
    /// 메모리 DB 면 None
    pub db_path: Option<PathBuf>,
}

const SELECT_COLUMNS: &str = "SELECT id, doc_key, source, format, page_count, chunk_count, \
                              content_bytes, content_hash, indexed_at FROM documents";

// ============================================================================
// DocumentRegistry
// ============================================================================

/// 문서 레지스트리
#[derive(Clone)]
pub struct DocumentRegistry {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl DocumentRegistry {
    /// 레지스트리 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (부모 디렉토리도 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(path.to_path_buf()),
        };

        registry.initialize()?;
        Ok(registry)
    }

    /// 메모리 DB 로 열기 (`serve --in-memory`, 테스트)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        };

        registry.initialize()?;
        Ok(registry)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_key TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                format TEXT NOT NULL,
                page_count INTEGER NOT NULL DEFAULT 0,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                content_bytes INTEGER NOT NULL DEFAULT 0,
                content_hash TEXT NOT NULL DEFAULT '',
                indexed_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create documents table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_indexed_at ON documents(indexed_at)",
            [],
        )
        .context("Failed to create indexed_at index")?;

        tracing::debug!(
            "Document registry initialized at {}",
            self.db_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        );
        Ok(())
    }

    /// 문서 기록 (doc_key 가 같으면 갱신, id 유지)
    pub fn upsert(&self, doc: NewDocument) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO documents
                (doc_key, source, format, page_count, chunk_count, content_bytes,
                 content_hash, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(doc_key) DO UPDATE SET
                source = excluded.source,
                format = excluded.format,
                page_count = excluded.page_count,
                chunk_count = excluded.chunk_count,
                content_bytes = excluded.content_bytes,
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at",
            params![
                doc.doc_key,
                doc.source,
                doc.format,
                doc.page_count as i64,
                doc.chunk_count as i64,
                doc.content_bytes as i64,
                doc.content_hash,
                now
            ],
        )
        .context("Failed to upsert document")?;

        let id: i64 = conn
            .query_row(
                "SELECT id FROM documents WHERE doc_key = ?1",
                params![doc.doc_key],
                |row| row.get(0),
            )
            .context("Failed to read document id")?;

        tracing::info!(
            "Registered document: {} (id={}, chunks={})",
            doc.source,
            id,
            doc.chunk_count
        );

        Ok(id)
    }

    /// 문서 키로 조회
    pub fn get_by_key(&self, doc_key: &str) -> Result<Option<IndexedDocument>> {
        self.query_one(&format!("{} WHERE doc_key = ?1", SELECT_COLUMNS), doc_key)
    }

    /// 원본 주소로 조회
    pub fn get_by_source(&self, source: &str) -> Result<Option<IndexedDocument>> {
        self.query_one(&format!("{} WHERE source = ?1", SELECT_COLUMNS), source.trim())
    }

    /// ID로 조회
    pub fn get_document(&self, id: i64) -> Result<Option<IndexedDocument>> {
        self.query_one(&format!("{} WHERE id = ?1", SELECT_COLUMNS), id)
    }

    fn query_one<P: rusqlite::ToSql>(&self, sql: &str, param: P) -> Result<Option<IndexedDocument>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;

        stmt.query_row(params![param], row_to_document)
            .optional()
            .context("Failed to query document")
    }

    /// 문서 목록 (최근 색인 순)
    pub fn list_documents(&self, limit: usize) -> Result<Vec<IndexedDocument>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY indexed_at DESC, id DESC LIMIT ?1",
            SELECT_COLUMNS
        ))?;

        let docs = stmt
            .query_map(params![limit as i64], row_to_document)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }

    /// 문서 삭제
    pub fn delete_document(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;

        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;

        Ok(rows > 0)
    }

    /// 레지스트리 통계
    pub fn stats(&self) -> Result<RegistryStats> {
        let conn = self.lock()?;

        let (count, chunks, bytes): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(chunk_count), 0), COALESCE(SUM(content_bytes), 0)
                 FROM documents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to read registry stats")?;

        Ok(RegistryStats {
            document_count: count as usize,
            chunk_count: chunks as usize,
            total_content_bytes: bytes as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<IndexedDocument> {
    Ok(IndexedDocument {
        id: row.get(0)?,
        doc_key: row.get(1)?,
        source: row.get(2)?,
        format: row.get(3)?,
        page_count: row.get::<_, i64>(4)? as usize,
        chunk_count: row.get::<_, i64>(5)? as usize,
        content_bytes: row.get::<_, i64>(6)? as usize,
        content_hash: row.get(7)?,
        indexed_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
