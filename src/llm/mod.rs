//! 답변 생성 모듈 - Gemini generateContent
//!
//! 검색된 문맥과 질문으로 구성된 프롬프트를 보내고 답변 텍스트를 받습니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::gemini::{model_resource, GeminiClient};

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// 텍스트 생성 프로바이더 트레이트
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 프롬프트로 답변 생성
    ///
    /// 모델이 텍스트를 돌려주지 않으면 (안전 필터 차단 등) 빈 문자열을 반환합니다.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Gemini Generator
// ============================================================================

/// Gemini 생성 모델 구현체
#[derive(Debug)]
pub struct GeminiGenerator {
    client: GeminiClient,
    model: String,
    temperature: Option<f32>,
}

impl GeminiGenerator {
    /// 새 생성기
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 생성 모델 (예: `gemini-1.5-flash`)
    /// * `requests_per_minute` - 분당 요청 수 상한
    pub fn new(api_key: String, model: &str, requests_per_minute: u32) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key, requests_per_minute)?,
            model: model_resource(model),
            temperature: None,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut generator = Self::new(
            config.api_key()?.to_string(),
            &config.generation_model,
            config.requests_per_minute,
        )?;
        if let Some(temperature) = config.generation_temperature {
            generator = generator.with_temperature(temperature);
        }
        tracing::info!("Using Gemini generation model {}", generator.model);
        Ok(generator)
    }

    /// 샘플링 온도 지정 (미지정 시 모델 기본값)
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// 기본 URL 변경
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client = self.client.with_base_url(base_url);
        self
    }

    fn build_request(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![TextPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: self.temperature.map(|temperature| GenerationConfig {
                temperature,
            }),
        }
    }
}

#[async_trait]
impl GenerationProvider for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = self.client.model_url(&self.model, "generateContent");
        let response: GenerateResponse = self
            .client
            .post_json(&url, &self.build_request(prompt))
            .await
            .context("Failed to generate answer")?;

        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            tracing::warn!("Prompt blocked by Gemini: {}", reason);
        }

        Ok(response.text())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateResponse {
    /// 첫 번째 후보의 텍스트 파트를 이어붙임
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubResponse, StubServer};

    #[test]
    fn test_request_serialization() {
        let generator =
            GeminiGenerator::new("fake_key".to_string(), "gemini-1.5-flash", 60).unwrap();
        let json = serde_json::to_value(generator.build_request("Question?")).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Question?");
        assert!(json.get("generationConfig").is_none());

        let generator = generator.with_temperature(0.2);
        let json = serde_json::to_value(generator.build_request("Q")).unwrap();
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let body = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "Thirty days "}, {"text": "grace period."}], "role": "model"},
                "finishReason": "STOP"
            }]
        }"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.text(), "Thirty days grace period.");
    }

    #[test]
    fn test_blocked_response_is_empty() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.text(), "");
        assert_eq!(
            response.prompt_feedback.and_then(|f| f.block_reason),
            Some("SAFETY".to_string())
        );

        // 안전 필터로 content 없이 종료된 후보
        let body = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.text(), "");
    }

    #[test]
    fn test_model_name() {
        let generator =
            GeminiGenerator::new("fake_key".to_string(), "gemini-1.5-flash", 60).unwrap();
        assert_eq!(generator.name(), "models/gemini-1.5-flash");
    }

    #[tokio::test]
    async fn test_generate_against_stub_server() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            r#"{"candidates": [{"content": {"parts": [{"text": "Thirty "}, {"text": "days."}]}}]}"#,
        )])
        .await;
        let generator = GeminiGenerator::new("test-key".to_string(), "gemini-1.5-flash", 6000)
            .unwrap()
            .with_base_url(server.url("/v1beta"));

        let answer = generator.generate("What is the grace period?").await.unwrap();
        assert_eq!(answer, "Thirty days.");

        let requests = server.requests();
        assert_eq!(requests[0].path, "/v1beta/models/gemini-1.5-flash:generateContent");
        assert_eq!(requests[0].api_key.as_deref(), Some("test-key"));
        assert!(requests[0].body.contains("What is the grace period?"));
    }

    #[tokio::test]
    async fn test_generate_propagates_api_error() {
        let server = StubServer::start(vec![StubResponse::json(
            403,
            r#"{"error": {"message": "Permission denied", "status": "PERMISSION_DENIED"}}"#,
        )])
        .await;
        let generator = GeminiGenerator::new("test-key".to_string(), "gemini-1.5-flash", 6000)
            .unwrap()
            .with_base_url(server.url("/v1beta"));

        let err = generator.generate("Q").await.unwrap_err();
        assert!(format!("{:#}", err).contains("PERMISSION_DENIED"));
        assert_eq!(server.requests().len(), 1);
    }
}
