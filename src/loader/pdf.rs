//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.

use anyhow::{Context, Result};

/// PDF 바이트에서 텍스트 추출
///
/// 페이지별로 텍스트를 추출하여 (페이지 번호, 텍스트) 튜플 벡터로 반환합니다.
/// 페이지 번호는 1부터 시작합니다. 텍스트가 없으면 빈 벡터입니다.
pub fn extract_text_from_pdf(bytes: &[u8]) -> Result<Vec<(usize, String)>> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).context("Failed to extract text from PDF")?;

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from PDF. It might be a scanned document.");
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text))
}

/// PDF 텍스트를 페이지별로 분리
///
/// 번호는 빈 페이지를 걸러내기 전에 매기므로 원본 페이지 번호와 일치합니다.
fn split_pdf_pages(text: &str) -> Vec<(usize, String)> {
    // 폼피드 문자 (\x0c)로 페이지 분리 시도
    if text.contains('\x0c') {
        return text
            .split('\x0c')
            .enumerate()
            .map(|(i, s)| (i + 1, s.trim().to_string()))
            .filter(|(_, s)| !s.is_empty())
            .collect();
    }

    // 페이지 구분자 패턴 (예: "--- Page 2 ---"), 구분자 뒤 텍스트는 해당 번호
    if let Ok(page_pattern) =
        regex::Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
    {
        let mut pages = Vec::new();
        let mut current_page = 1;
        let mut last_end = 0;

        for captures in page_pattern.captures_iter(text) {
            let Some(marker) = captures.get(0) else {
                continue;
            };
            pages.push((current_page, text[last_end..marker.start()].trim().to_string()));
            current_page = captures
                .get(1)
                .and_then(|n| n.as_str().parse().ok())
                .unwrap_or(current_page + 1);
            last_end = marker.end();
        }

        if !pages.is_empty() {
            pages.push((current_page, text[last_end..].trim().to_string()));
            return pages.into_iter().filter(|(_, s)| !s.is_empty()).collect();
        }
    }

    // 분리 실패 - 전체를 하나의 페이지로
    vec![(1, text.trim().to_string())]
}

// ============================================================================
// Tests
// ============================================================================
