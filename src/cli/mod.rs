//! CLI 모듈
//!
//! palank-docqa CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{has_api_key, AppConfig};
use crate::knowledge::{
    remove_document, DocumentIndex, DocumentRegistry, LanceVectorStore, VectorStore,
};
use crate::llm::{GenerationProvider, GeminiGenerator};
use crate::qa::QaService;
use crate::server::{self, RunResponse};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-docqa")]
#[command(version, about = "문서 URL 기반 질의응답 서버", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: DOCQA_DATA_DIR 또는 ~/.palank-docqa)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP 서버 실행
    Serve {
        /// 바인드 호스트
        #[arg(long)]
        host: Option<String>,

        /// 바인드 포트
        #[arg(short, long)]
        port: Option<u16>,

        /// 색인을 디스크에 저장하지 않음
        #[arg(long)]
        in_memory: bool,
    },

    /// 문서에 대해 질문 (서버 없이)
    Ask {
        /// 문서 URL 또는 로컬 경로
        #[arg(short, long)]
        document: String,

        /// 질문 (여러 번 지정 가능)
        #[arg(short = 'q', long = "question", required = true)]
        questions: Vec<String>,

        /// 내용이 바뀌지 않았어도 다시 임베딩
        #[arg(long)]
        reindex: bool,

        /// `/hackrx/run` 응답과 같은 JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 색인된 문서 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        #[arg(short, long)]
        id: Option<i64>,

        /// 삭제할 문서 주소
        #[arg(short, long)]
        source: Option<String>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::from_env()?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Serve {
            host,
            port,
            in_memory,
        } => cmd_serve(config, host, port, in_memory).await,
        Commands::Ask {
            document,
            questions,
            reindex,
            json,
        } => cmd_ask(&config, &document, &questions, reindex, json).await,
        Commands::List { limit } => cmd_list(&config, limit),
        Commands::Delete { id, source } => cmd_delete(&config, id, source).await,
        Commands::Status => cmd_status(&config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 서버 실행 명령어 (serve)
async fn cmd_serve(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    in_memory: bool,
) -> Result<()> {
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    // API 키 확인
    config.api_key()?;

    server::serve(config, in_memory).await
}

/// 질문 명령어 (ask)
///
/// 문서를 색인(내용이 같으면 기존 색인 재사용)하고 각 질문의 답변을 출력합니다.
async fn cmd_ask(
    config: &AppConfig,
    document: &str,
    questions: &[String],
    reindex: bool,
    json: bool,
) -> Result<()> {
    config.api_key()?;

    let index = Arc::new(
        DocumentIndex::from_config(config, false)
            .await
            .context("DocumentIndex 초기화 실패")?,
    );
    let generator: Arc<dyn GenerationProvider> = Arc::new(GeminiGenerator::from_config(config)?);
    let qa = QaService::new(
        index.clone(),
        generator,
        config.top_k,
        config.max_concurrent_questions,
    );

    if !json {
        println!("[*] 문서 색인 중: {}", document);
    }

    let doc = index
        .index_document(document, reindex)
        .await
        .context("문서 색인 실패")?;

    if !json {
        println!(
            "[OK] 문서 #{} ({}, {} 페이지, {} 청크)\n",
            doc.id, doc.format, doc.page_count, doc.chunk_count
        );
    }

    let answers = qa
        .answer_for_document(&doc, questions)
        .await
        .context("답변 생성 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&RunResponse { answers })?);
        return Ok(());
    }

    for (i, (question, answer)) in questions.iter().zip(answers.iter()).enumerate() {
        println!("Q{}. {}", i + 1, question);
        println!("A{}. {}", i + 1, answer);
        println!();
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(config: &AppConfig, limit: usize) -> Result<()> {
    let registry =
        DocumentRegistry::open(&config.registry_path()).context("DocumentRegistry 열기 실패")?;

    let docs = registry
        .list_documents(limit)
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 색인된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 색인된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        println!("  #{:<4} [{}] {}", doc.id, doc.format, truncate_text(&doc.source, 70));
        println!(
            "        {} | {} 페이지 | {} 청크 | {}",
            doc.indexed_at.format("%Y-%m-%d %H:%M"),
            doc.page_count,
            doc.chunk_count,
            format_bytes(doc.content_bytes)
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
///
/// ID 또는 문서 주소로 레지스트리 행과 벡터를 함께 삭제합니다.
async fn cmd_delete(config: &AppConfig, id: Option<i64>, source: Option<String>) -> Result<()> {
    let registry =
        DocumentRegistry::open(&config.registry_path()).context("DocumentRegistry 열기 실패")?;

    let doc_id = if let Some(id) = id {
        id
    } else if let Some(ref source) = source {
        registry
            .get_by_source(source)
            .context("문서 조회 실패")?
            .ok_or_else(|| anyhow::anyhow!("주소 '{}'인 문서를 찾을 수 없습니다", source))?
            .id
    } else {
        bail!("--id 또는 --source 중 하나를 지정해야 합니다");
    };

    if registry.get_document(doc_id)?.is_none() {
        bail!("ID {}인 문서를 찾을 수 없습니다", doc_id);
    }

    let vector = LanceVectorStore::open(&config.vectors_path(), config.embedding_dimension)
        .await
        .context("LanceDB 열기 실패")?;

    if remove_document(&registry, &vector, doc_id)
        .await
        .context("문서 삭제 실패")?
    {
        println!("[OK] 문서 #{} 삭제됨", doc_id);
    } else {
        println!("[!] 삭제할 문서를 찾을 수 없습니다");
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &AppConfig) -> Result<()> {
    println!("palank-docqa v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 임베딩 모델: {} ({}차원)", config.embedding_model, config.embedding_dimension);
    println!("[*] 생성 모델: {}", config.generation_model);
    println!(
        "[*] 청크: {}자 / 중첩 {}자, top-k {}",
        config.chunk.chunk_size, config.chunk.chunk_overlap, config.top_k
    );
    if !config.allow_local_documents {
        println!("[*] 로컬 문서: 비활성화 (http(s) URL 만 허용)");
    }

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match DocumentRegistry::open(&config.registry_path()).and_then(|r| r.stats()) {
        Ok(stats) => {
            println!("[OK] 색인된 문서: {} 건 ({} 청크)", stats.document_count, stats.chunk_count);
            println!("     총 콘텐츠: {}", format_bytes(stats.total_content_bytes));
        }
        Err(e) => {
            println!("[!] 레지스트리 조회 실패: {}", e);
        }
    }

    // 벡터 저장소는 이미 만들어진 경우에만 열기
    if config.vectors_path().exists() {
        match LanceVectorStore::open(&config.vectors_path(), config.embedding_dimension).await {
            Ok(vector) => match vector.count().await {
                Ok(count) => println!("[OK] 벡터 인덱스: {} 청크", count),
                Err(e) => tracing::debug!("벡터 통계 조회 실패: {}", e),
            },
            Err(e) => tracing::debug!("LanceDB 열기 실패: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
