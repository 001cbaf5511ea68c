//! 문서 로더 모듈
//!
//! 원격 URL 또는 로컬 경로에서 문서를 가져와 페이지별 텍스트로 변환합니다.
//! - PDF: pdf-extract 로 텍스트 추출
//! - HTML: 제목 + 본문 추출
//! - 그 외: UTF-8 텍스트

pub mod html;
pub mod pdf;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use url::Url;

// ============================================================================
// Types
// ============================================================================

/// 문서 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// http(s) URL
    Remote(Url),
    /// 로컬 파일 (경로 또는 file:// URL)
    Local(PathBuf),
}

impl DocumentSource {
    /// 문자열에서 문서 위치 해석
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            bail!("Document location is empty");
        }

        match Url::parse(trimmed) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Remote(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::Local)
                    .map_err(|_| anyhow::anyhow!("Invalid file URL: {}", trimmed)),
                // Windows 드라이브 문자 (C:\docs\a.pdf)
                scheme if scheme.len() == 1 => Ok(Self::Local(PathBuf::from(trimmed))),
                scheme => bail!("Unsupported URL scheme: {}", scheme),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(Self::Local(PathBuf::from(trimmed)))
            }
            Err(e) => Err(e).with_context(|| format!("Invalid document URL: {}", trimmed)),
        }
    }

    /// 형식 추정용 경로 문자열 (쿼리 문자열 제외)
    fn path_hint(&self) -> String {
        match self {
            Self::Remote(url) => url.path().to_lowercase(),
            Self::Local(path) => path.to_string_lossy().to_lowercase(),
        }
    }
}

/// 문서 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Html,
    Text,
}

impl DocumentFormat {
    /// 내용/Content-Type/경로로 형식 판별
    ///
    /// 우선순위: PDF 매직 바이트 > Content-Type > 확장자 > HTML 시작 태그
    pub fn detect(bytes: &[u8], content_type: Option<&str>, path_hint: &str) -> Self {
        // 일부 PDF는 헤더 앞에 쓰레기 바이트가 있음 (최대 1024 바이트 허용)
        let head = &bytes[..bytes.len().min(1024)];
        if head.windows(5).any(|w| w == b"%PDF-") {
            return Self::Pdf;
        }

        let content_type = content_type.unwrap_or_default().to_lowercase();
        if content_type.contains("application/pdf") || path_hint.ends_with(".pdf") {
            return Self::Pdf;
        }

        if content_type.contains("text/html")
            || path_hint.ends_with(".html")
            || path_hint.ends_with(".htm")
        {
            return Self::Html;
        }

        let prefix: String = String::from_utf8_lossy(&bytes[..bytes.len().min(512)])
            .trim_start()
            .chars()
            .take(15)
            .collect::<String>()
            .to_lowercase();
        if prefix.starts_with("<!doctype html") || prefix.starts_with("<html") {
            return Self::Html;
        }

        Self::Text
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 페이지 텍스트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 페이지 번호 (1부터 시작)
    pub number: usize,
    pub text: String,
}

/// 로드된 문서
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// 요청된 문서 주소 (원문 그대로)
    pub source: String,
    pub format: DocumentFormat,
    /// 비어있지 않은 페이지만 포함
    pub pages: Vec<Page>,
    /// 원본 바이트 크기
    pub byte_len: usize,
    /// 원본 바이트의 SHA-256 (내용 변경 감지용)
    pub content_hash: String,
}

impl LoadedDocument {
    /// 추출된 전체 텍스트 크기 (바이트)
    pub fn content_bytes(&self) -> usize {
        self.pages.iter().map(|p| p.text.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

// ============================================================================
// DocumentLoader
// ============================================================================

/// 문서 로더
pub struct DocumentLoader {
    client: reqwest::Client,
    max_bytes: usize,
    allow_local: bool,
}

impl DocumentLoader {
    /// 새 로더 생성
    ///
    /// # Arguments
    /// * `max_bytes` - 허용할 최대 문서 크기
    pub fn new(max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("palank-docqa/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            max_bytes,
            allow_local: true,
        })
    }

    /// 로컬 경로/file:// 허용 여부 (기본 허용)
    pub fn with_local_documents(mut self, allow: bool) -> Self {
        self.allow_local = allow;
        self
    }

    /// 문서 로드 (다운로드/읽기 + 텍스트 추출)
    pub async fn load(&self, location: &str) -> Result<LoadedDocument> {
        let source = DocumentSource::parse(location)?;

        let (bytes, content_type) = match &source {
            DocumentSource::Remote(url) => self.fetch(url).await?,
            DocumentSource::Local(_) if !self.allow_local => {
                bail!("Local documents are disabled; use an http(s) URL")
            }
            DocumentSource::Local(path) => (self.read_local(path).await?, None),
        };

        let format = DocumentFormat::detect(&bytes, content_type.as_deref(), &source.path_hint());
        tracing::info!(
            "Loading document: {} ({}, {} bytes)",
            location,
            format,
            bytes.len()
        );

        let byte_len = bytes.len();
        let content_hash = hash_bytes(&bytes);
        let pages = parse_pages(bytes, format).await?;

        tracing::info!("Loaded {} pages from {}", pages.len(), location);

        Ok(LoadedDocument {
            source: location.trim().to_string(),
            format,
            pages,
            byte_len,
            content_hash,
        })
    }

    /// 원격 문서 다운로드 (크기 제한 적용)
    async fn fetch(&self, url: &Url) -> Result<(Vec<u8>, Option<String>)> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to download document: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Failed to download document: {} returned {}", url, status);
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                bail!(
                    "Document too large: {} bytes (limit {} bytes)",
                    len,
                    self.max_bytes
                );
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read document body")?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                bail!("Document too large: exceeds {} bytes", self.max_bytes);
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok((bytes, content_type))
    }

    /// 로컬 파일 읽기
    async fn read_local(&self, path: &Path) -> Result<Vec<u8>> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Document not found at {}", path.display()))?;

        if metadata.len() as usize > self.max_bytes {
            bail!(
                "Document too large: {} bytes (limit {} bytes)",
                metadata.len(),
                self.max_bytes
            );
        }

        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read document: {}", path.display()))
    }
}

/// 원본 바이트 해시 (hex)
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// 형식별 페이지 텍스트 추출
async fn parse_pages(bytes: Vec<u8>, format: DocumentFormat) -> Result<Vec<Page>> {
    let raw_pages: Vec<(usize, String)> = match format {
        DocumentFormat::Pdf => {
            // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
            tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf(&bytes))
                .await
                .context("PDF extraction task failed")??
        }
        DocumentFormat::Html => {
            let html = String::from_utf8_lossy(&bytes);
            let extracted = html::extract_html(&html);
            vec![(1, extracted.to_text())]
        }
        DocumentFormat::Text => vec![(1, String::from_utf8_lossy(&bytes).into_owned())],
    };

    Ok(raw_pages
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(number, text)| Page { number, text })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
