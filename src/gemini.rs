//! Gemini API 공통 HTTP 클라이언트
//!
//! 임베딩/생성 프로바이더가 공유하는 요청 로직입니다.
//! - API 키는 URL이 아닌 `x-goog-api-key` 헤더로 전송
//! - 분당 요청 수 제한 + 최소 호출 간격
//! - 429/5xx/전송 오류 시 지수 백오프 재시도
//!
//! ref: https://ai.google.dev/gemini-api/docs

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Gemini API 기본 URL
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 재시도 최대 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;
/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// Rate Limiter
// ============================================================================

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            // 버스트 방지: 윈도우를 요청 수로 균등 분할
            min_delay: window / max_requests,
            last_request: None,
        }
    }

    /// 요청 가능할 때까지 대기
    async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// Error Response
// ============================================================================

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct GeminiError {
    pub error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorDetail {
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// 에러 응답 본문을 사람이 읽을 수 있는 메시지로
pub(crate) fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<GeminiError>(body) {
        Ok(error) if !error.error.status.is_empty() => {
            format!("Gemini API error ({}): {}", error.error.status, error.error.message)
        }
        Ok(error) => format!("Gemini API error ({}): {}", status, error.error.message),
        Err(_) => format!("Gemini API error ({}): {}", status, body.trim()),
    }
}

/// 재시도 대상 상태 코드
fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

// ============================================================================
// GeminiClient
// ============================================================================

/// Gemini REST 클라이언트 (엔드포인트 그룹당 하나)
#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    rate_limiter: Mutex<RateLimiter>,
    initial_backoff: Duration,
}

impl GeminiClient {
    /// 새 클라이언트 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `requests_per_minute` - 분당 요청 수 상한
    pub fn new(api_key: String, requests_per_minute: u32) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("Gemini API key is empty");
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            client,
            rate_limiter: Mutex::new(RateLimiter::new(requests_per_minute, RATE_LIMIT_WINDOW)),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// 기본 URL 변경 (프록시/호환 엔드포인트)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// 재시도 초기 백오프 변경 (시도마다 두 배)
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// 모델 메서드 URL (`{base}/models/{model}:{method}`)
    pub fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, model_resource(model), method)
    }

    /// JSON POST 요청 (재시도 포함)
    pub async fn post_json<Req, Resp>(&self, url: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            let backoff = self.initial_backoff * 2u32.pow(attempt);

            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            let response = match self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send Gemini request: {}", e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                return serde_json::from_str(&body).context("Failed to parse Gemini response");
            }

            if !is_retryable(status) {
                anyhow::bail!(describe_error(status, &body));
            }

            last_error = Some(anyhow::anyhow!(describe_error(status, &body)));
            if attempt < MAX_RETRIES {
                tracing::warn!(
                    "Gemini returned {}, backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Gemini request failed after {} retries", MAX_RETRIES)))
    }
}

/// 모델 이름을 리소스 이름으로 (`text-embedding-004` → `models/text-embedding-004`)
pub fn model_resource(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubResponse, StubServer};

    #[test]
    fn test_model_resource() {
        assert_eq!(model_resource("gemini-1.5-flash"), "models/gemini-1.5-flash");
        assert_eq!(
            model_resource("models/text-embedding-004"),
            "models/text-embedding-004"
        );
    }

    #[test]
    fn test_model_url() {
        let client = GeminiClient::new("fake_key".to_string(), 60)
            .unwrap()
            .with_base_url("http://localhost:9999/v1beta/");
        assert_eq!(
            client.model_url("text-embedding-004", "batchEmbedContents"),
            "http://localhost:9999/v1beta/models/text-embedding-004:batchEmbedContents"
        );
    }

    #[test]
    fn test_empty_api_key_rejected() {
        assert!(GeminiClient::new("  ".to_string(), 60).is_err());
    }

    #[test]
    fn test_describe_error() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(
            describe_error(reqwest::StatusCode::BAD_REQUEST, body),
            "Gemini API error (INVALID_ARGUMENT): API key not valid"
        );

        let message = describe_error(reqwest::StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert!(message.contains("502"));
        assert!(message.contains("oops"));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_retryable(reqwest::StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_rate_limiter_min_delay() {
        let limiter = RateLimiter::new(120, Duration::from_secs(60));
        assert_eq!(limiter.min_delay, Duration::from_millis(500));

        // 0 은 1로 보정
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert_eq!(limiter.max_requests, 1);
    }

    #[derive(Debug, Serialize)]
    struct Ping {
        text: &'static str,
    }

    #[derive(Debug, Deserialize)]
    struct Pong {
        reply: String,
    }

    fn stub_client(server: &StubServer) -> GeminiClient {
        GeminiClient::new("test-key".to_string(), 6000)
            .unwrap()
            .with_base_url(server.url("/v1beta"))
            .with_initial_backoff(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_post_json_retries_server_errors() {
        let server = StubServer::start(vec![
            StubResponse::json(503, r#"{"error": {"message": "overloaded", "status": "UNAVAILABLE"}}"#),
            StubResponse::json(429, "slow down"),
            StubResponse::json(200, r#"{"reply": "pong"}"#),
        ])
        .await;
        let client = stub_client(&server);

        let url = client.model_url("gemini-1.5-flash", "generateContent");
        let pong: Pong = client.post_json(&url, &Ping { text: "ping" }).await.unwrap();
        assert_eq!(pong.reply, "pong");

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.path == "/v1beta/models/gemini-1.5-flash:generateContent"));
        assert!(requests.iter().all(|r| r.api_key.as_deref() == Some("test-key")));
        assert_eq!(requests[0].body, r#"{"text":"ping"}"#);
    }

    #[tokio::test]
    async fn test_post_json_fails_fast_on_client_error() {
        let server = StubServer::start(vec![StubResponse::json(
            400,
            r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#,
        )])
        .await;
        let client = stub_client(&server);

        let url = client.model_url("text-embedding-004", "embedContent");
        let err = client
            .post_json::<_, Pong>(&url, &Ping { text: "ping" })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Gemini API error (INVALID_ARGUMENT): API key not valid");
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_post_json_gives_up_after_max_retries() {
        let server = StubServer::start(vec![StubResponse::json(500, "internal")]).await;
        let client = stub_client(&server);

        let url = client.model_url("gemini-1.5-flash", "generateContent");
        let err = client
            .post_json::<_, Pong>(&url, &Ping { text: "ping" })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal"));
        assert_eq!(server.requests().len(), MAX_RETRIES as usize + 1);
    }

    #[tokio::test]
    async fn test_post_json_reports_unparseable_success_body() {
        let server = StubServer::start(vec![StubResponse::json(200, "not json")]).await;
        let client = stub_client(&server);

        let url = client.model_url("gemini-1.5-flash", "generateContent");
        let err = client
            .post_json::<_, Pong>(&url, &Ping { text: "ping" })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse Gemini response"));
    }

    #[tokio::test]
    async fn test_rate_limiter_records_requests() {
        let mut limiter = RateLimiter::new(6000, Duration::from_secs(60));
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.requests.len(), 2);
        assert!(limiter.last_request.is_some());
    }
}
