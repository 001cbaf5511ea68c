//! 질의응답 모듈
//!
//! 문서를 한 번 색인한 뒤 각 질문마다
//! 관련 청크 검색 → 프롬프트 구성 → 답변 생성을 수행합니다.

mod prompt;

use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::knowledge::{DocumentIndex, IndexedDocument};
use crate::llm::GenerationProvider;

pub use prompt::{
    build_prompt, generation_error_answer, EMPTY_RESPONSE_ANSWER, GENERATION_ERROR_PREFIX,
    NO_CONTEXT_ANSWER,
};

/// 질의응답 서비스
pub struct QaService {
    index: Arc<DocumentIndex>,
    generator: Arc<dyn GenerationProvider>,
    top_k: usize,
    max_concurrency: usize,
}

impl QaService {
    /// # Arguments
    /// * `top_k` - 질문당 검색할 청크 수
    /// * `max_concurrency` - 동시에 처리할 질문 수
    pub fn new(
        index: Arc<DocumentIndex>,
        generator: Arc<dyn GenerationProvider>,
        top_k: usize,
        max_concurrency: usize,
    ) -> Self {
        Self {
            index,
            generator,
            top_k: top_k.max(1),
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn index(&self) -> &Arc<DocumentIndex> {
        &self.index
    }

    /// 문서를 가져와 색인하고 모든 질문에 답변 (질문 순서 유지)
    pub async fn answer_questions(&self, source: &str, questions: &[String]) -> Result<Vec<String>> {
        let document = self.index.index_document(source, false).await?;
        self.answer_for_document(&document, questions).await
    }

    /// 이미 색인된 문서에 대해 답변
    pub async fn answer_for_document(
        &self,
        document: &IndexedDocument,
        questions: &[String],
    ) -> Result<Vec<String>> {
        tracing::info!(
            "Answering {} questions for {} (concurrency {})",
            questions.len(),
            document.source,
            self.max_concurrency
        );

        let futures: Vec<_> = questions.iter().map(|q| self.answer(document, q)).collect();
        stream::iter(futures)
            .buffered(self.max_concurrency)
            .try_collect()
            .await
    }

    /// 질문 하나에 답변
    ///
    /// 검색 실패는 에러로 전파되고, 생성 실패는 답변 문자열로 바뀝니다.
    pub async fn answer(&self, document: &IndexedDocument, question: &str) -> Result<String> {
        let results = self.index.retrieve(document, question, self.top_k).await?;

        if results.is_empty() {
            tracing::debug!("No chunks retrieved for question: {}", question);
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let context = results
            .iter()
            .map(|r| r.chunk_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = build_prompt(&context, question);

        let answer = match self.generator.generate(&prompt).await {
            Ok(text) if text.trim().is_empty() => {
                tracing::warn!("Empty response from {}", self.generator.name());
                EMPTY_RESPONSE_ANSWER.to_string()
            }
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Generation failed: {:#}", e);
                generation_error_answer(&e)
            }
        };

        Ok(answer.trim().to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_index, write_document, Reply, ScriptedGenerator};
    use tempfile::TempDir;

    const POLICY: &str = "The grace period for premium payment is thirty days.\n\n\
        Maternity expenses are covered after nine months of continuous coverage.\n\n\
        Cataract surgery has a waiting period of two years.";

    fn service(reply: Reply) -> (QaService, Arc<ScriptedGenerator>) {
        let (index, _) = test_index();
        let generator = Arc::new(ScriptedGenerator::new(reply));
        let qa = QaService::new(Arc::new(index), generator.clone(), 2, 3);
        (qa, generator)
    }

    fn questions(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_answers_keep_question_order() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (qa, _) = service(Reply::EchoQuestion);

        let asked = questions(&[
            "What is the grace period?",
            "Is maternity covered?",
            "Cataract waiting period?",
            "Is dental covered?",
        ]);
        let answers = qa.answer_questions(&source, &asked).await.unwrap();
        assert_eq!(answers, asked);
    }

    #[tokio::test]
    async fn test_prompt_contains_retrieved_context() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (qa, generator) = service(Reply::Fixed("  Thirty days.  \n".to_string()));

        let answers = qa
            .answer_questions(&source, &questions(&["grace period premium payment"]))
            .await
            .unwrap();
        assert_eq!(answers, vec!["Thirty days.".to_string()]);

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(
            "Context:\nThe grace period for premium payment is thirty days.\n"
        ));
        assert!(prompts[0].contains("Question: grace period premium payment\n\nAnswer:"));
    }

    #[tokio::test]
    async fn test_updated_document_is_answered_from_new_text() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", "The grace period is thirty days.");
        let (qa, generator) = service(Reply::Fixed("ok".to_string()));
        let asked = questions(&["grace period"]);

        qa.answer_questions(&source, &asked).await.unwrap();
        write_document(&dir, "policy.txt", "The grace period is fifteen days.");
        qa.answer_questions(&source, &asked).await.unwrap();

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("thirty days"));
        assert!(prompts[1].contains("fifteen days"));
        assert!(!prompts[1].contains("thirty days"));
    }

    #[tokio::test]
    async fn test_empty_document_returns_no_context_answer() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "blank.txt", "\n\n");
        let (qa, generator) = service(Reply::Fixed("unused".to_string()));

        let answers = qa
            .answer_questions(&source, &questions(&["Anything?", "Else?"]))
            .await
            .unwrap();
        assert_eq!(answers, vec![NO_CONTEXT_ANSWER.to_string(); 2]);
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_empty_model_response() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (qa, _) = service(Reply::Fixed("   ".to_string()));

        let answers = qa
            .answer_questions(&source, &questions(&["grace period?"]))
            .await
            .unwrap();
        assert_eq!(answers, vec![EMPTY_RESPONSE_ANSWER.to_string()]);
    }

    #[tokio::test]
    async fn test_generation_error_becomes_answer() {
        let dir = TempDir::new().unwrap();
        let source = write_document(&dir, "policy.txt", POLICY);
        let (qa, _) = service(Reply::Fail("quota exceeded".to_string()));

        let answers = qa
            .answer_questions(&source, &questions(&["grace period?"]))
            .await
            .unwrap();
        assert_eq!(
            answers,
            vec![format!("{}quota exceeded", GENERATION_ERROR_PREFIX)]
        );
    }

    #[tokio::test]
    async fn test_missing_document_fails_whole_call() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.pdf");
        let (qa, generator) = service(Reply::Fixed("unused".to_string()));

        let result = qa
            .answer_questions(missing.to_str().unwrap(), &questions(&["Q?"]))
            .await;
        assert!(result.is_err());
        assert!(generator.prompts().is_empty());
    }
}
