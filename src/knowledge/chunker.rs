//! Text Chunking Module
//!
//! 문서 텍스트를 고정 크기(문자 수)의 중첩 청크로 분할합니다.
//! 문단 → 줄 → 단어 → 문자 순으로 더 잘게 나누는 재귀 분할 방식입니다.

use anyhow::{bail, Result};

use crate::loader::Page;

/// 기본 구분자 (거친 것 → 세밀한 것 순)
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 인접 청크 간 중첩 크기 (문자 수)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("Chunk size must be greater than 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

/// 페이지 정보를 가진 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 문서 전체 기준 청크 인덱스 (0-based)
    pub index: usize,
    /// 원본 페이지 번호 (1-based)
    pub page: usize,
    pub text: String,
}

/// 페이지별로 청킹하고 문서 전체에서 연속된 인덱스를 부여
pub fn chunk_pages(chunker: &dyn Chunker, pages: &[Page]) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            chunker
                .chunk(&page.text)
                .into_iter()
                .map(move |text| (page.number, text))
        })
        .enumerate()
        .map(|(index, (page, text))| Chunk { index, page, text })
        .collect()
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 재귀 문자 분할 청커
///
/// 텍스트에 존재하는 가장 거친 구분자로 먼저 나누고,
/// `chunk_size` 를 넘는 조각만 다음 구분자로 다시 나눕니다.
/// 작은 조각들은 `chunk_size` 이내로 합쳐지며, 이전 청크의 끝부분
/// (최대 `chunk_overlap` 문자)이 다음 청크 앞에 다시 포함됩니다.
pub struct RecursiveChunker {
    config: ChunkConfig,
    separators: Vec<String>,
    /// 구분자를 다음 조각의 앞에 붙여 유지
    keep_separator: bool,
}

impl RecursiveChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            keep_separator: true,
        }
    }

    /// 기본 설정으로 생성 (1000자 / 200자 중첩)
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        // 텍스트에 존재하는 첫 번째 구분자 선택 ("" 는 항상 매치)
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                finer = &separators[i + 1..];
                break;
            }
        }

        let splits = split_with_separator(text, separator, self.keep_separator);
        let merge_separator = if self.keep_separator { "" } else { separator };

        let mut good_splits: Vec<&str> = Vec::new();
        for split in splits {
            if char_len(split) < self.config.chunk_size {
                good_splits.push(split);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits, merge_separator));
                good_splits.clear();
            }

            if finer.is_empty() {
                final_chunks.push(split.to_string());
            } else {
                final_chunks.extend(self.split_recursive(split, finer));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits, merge_separator));
        }

        final_chunks
    }

    /// 작은 조각들을 `chunk_size` 이내의 청크로 병합 (오버랩 유지)
    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for &split in splits {
            let len = char_len(split);
            let joined_len = |current: &[&str]| if current.is_empty() { 0 } else { separator_len };

            if total + len + joined_len(&current) > self.config.chunk_size {
                if total > self.config.chunk_size {
                    tracing::warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total,
                        self.config.chunk_size
                    );
                }

                if !current.is_empty() {
                    if let Some(doc) = join_docs(&current, separator) {
                        docs.push(doc);
                    }

                    // 오버랩 크기 이하가 되고 새 조각이 들어갈 때까지 앞에서 제거
                    while total > self.config.chunk_overlap
                        || (total + len + joined_len(&current) > self.config.chunk_size
                            && total > 0)
                    {
                        let dropped = char_len(current[0])
                            + if current.len() > 1 { separator_len } else { 0 };
                        total = total.saturating_sub(dropped);
                        current.remove(0);
                    }
                }
            }

            current.push(split);
            total += len + if current.len() > 1 { separator_len } else { 0 };
        }

        if let Some(doc) = join_docs(&current, separator) {
            docs.push(doc);
        }

        docs
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        self.split_recursive(text, &self.separators)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect()
    }

    fn name(&self) -> &'static str {
        "RecursiveChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자 수 (바이트 수가 아님)
#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 구분자로 분할
///
/// `keep_separator` 이면 구분자를 다음 조각 앞에 붙입니다.
/// 구분자가 빈 문자열이면 문자 단위로 분할합니다. 빈 조각은 버립니다.
fn split_with_separator<'a>(text: &'a str, separator: &str, keep_separator: bool) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    if !keep_separator {
        return text.split(separator).filter(|s| !s.is_empty()).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[start..idx]);
        start = idx;
    }
    pieces.push(&text[start..]);

    pieces.into_iter().filter(|s| !s.is_empty()).collect()
}

/// 조각 결합 후 공백 제거 (빈 결과는 None)
fn join_docs(docs: &[&str], separator: &str) -> Option<String> {
    let text = docs.join(separator);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 설정을 지정한 청커 생성
pub fn recursive_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(RecursiveChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================
