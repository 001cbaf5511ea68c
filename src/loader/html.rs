//! HTML 텍스트 추출 모듈
//!
//! 문서 URL이 PDF 대신 웹 페이지를 가리킬 때 사용합니다.
//! 제목과 본문 텍스트만 남기고 스크립트/스타일은 버립니다.

use scraper::{ElementRef, Html, Selector};

/// 본문 후보 선택자 (우선순위 순)
const CONTENT_SELECTORS: [&str; 6] = [
    "article",
    "main",
    "[role=main]",
    ".content",
    "#content",
    "body",
];

/// 텍스트를 수집하지 않을 태그
const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

/// 추출된 HTML 콘텐츠
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlContent {
    pub title: Option<String>,
    /// 본문 텍스트 (HTML 태그 제거됨)
    pub content: String,
}

impl HtmlContent {
    /// 제목 + 본문을 하나의 텍스트로
    pub fn to_text(&self) -> String {
        match &self.title {
            Some(title) if !self.content.starts_with(title.as_str()) => {
                format!("{}\n\n{}", title, self.content)
            }
            _ => self.content.clone(),
        }
    }
}

/// HTML 문서에서 제목과 본문 추출
pub fn extract_html(html: &str) -> HtmlContent {
    let document = Html::parse_document(html);
    HtmlContent {
        title: extract_title(&document),
        content: extract_content(&document),
    }
}

/// 제목 추출 (<title> → <h1>)
fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let title = collapse_whitespace(&element.text().collect::<String>());
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }

    None
}

/// 본문 추출 (article > main > ... > body)
fn extract_content(document: &Html) -> String {
    for selector_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let text = extract_text_from_element(&element);
                if text.len() > 100 {
                    return text;
                }
            }
        }
    }

    // 폴백: 짧더라도 body 텍스트
    if let Ok(selector) = Selector::parse("body") {
        if let Some(element) = document.select(&selector).next() {
            return extract_text_from_element(&element);
        }
    }

    String::new()
}

/// 요소에서 텍스트 추출 (스크립트/스타일 제외)
fn extract_text_from_element(element: &ElementRef) -> String {
    let mut text = String::new();

    for node in element.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };

        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|e| SKIPPED_TAGS.contains(&e.name()))
                .unwrap_or(false)
        });
        if skipped {
            continue;
        }

        let fragment: &str = fragment;
        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }
    }

    collapse_whitespace(&text)
}

/// 연속 공백 정리
fn collapse_whitespace(text: &str) -> String {
    if let Ok(re) = regex::Regex::new(r"\s+") {
        re.replace_all(text, " ").trim().to_string()
    } else {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
