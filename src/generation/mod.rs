//! 생성 모듈 - Gemini generateContent를 통한 텍스트 생성
//!
//! 프롬프트 체인은 `GenerationProvider` 트레이트에만 의존하므로
//! 테스트에서는 스크립트된 구현체로 교체할 수 있습니다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::gemini::{get_api_key, post_json_with_retry, RateLimiter, GEMINI_API_BASE};

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// 생성 프로바이더 트레이트 (prompt -> text)
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 프롬프트 하나로 응답 텍스트 생성
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 프로바이더(모델) 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Generation Config
// ============================================================================

/// 생성 파라미터 (프로세스 시작 시 고정)
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.2,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 8192,
        }
    }
}

// ============================================================================
// Google Gemini Generation
// ============================================================================

const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const MIN_DELAY_MS: u64 = 0;

/// Gemini generateContent 구현체
#[derive(Debug)]
pub struct GeminiGeneration {
    api_key: String,
    client: reqwest::Client,
    config: GenerationConfig,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiGeneration {
    pub fn new(api_key: String, config: GenerationConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            anyhow::bail!("Generation model name must not be empty");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            RATE_LIMIT_RPM,
            RATE_LIMIT_WINDOW,
            Duration::from_millis(MIN_DELAY_MS),
        )));

        Ok(Self {
            api_key,
            client,
            config,
            rate_limiter,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(config: GenerationConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key, config)
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            GEMINI_API_BASE, self.config.model
        )
    }

    fn build_request<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: RequestGenerationConfig {
                temperature: self.config.temperature,
                top_k: self.config.top_k,
                top_p: self.config.top_p,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "text/plain",
            },
        }
    }
}

#[async_trait]
impl GenerationProvider for GeminiGeneration {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = self.build_request(prompt);

        let body = post_json_with_retry(
            &self.client,
            &self.rate_limiter,
            &self.endpoint(),
            &self.api_key,
            &request,
        )
        .await
        .context("Generation request failed")?;

        let response: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse generation response")?;

        let text = extract_text(response)?;
        tracing::debug!(
            model = %self.config.model,
            prompt_chars = prompt.len(),
            answer_chars = text.len(),
            "Generation completed"
        );
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// 첫 번째 후보의 텍스트 파트를 이어 붙임
fn extract_text(response: GenerateResponse) -> Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Generation returned no candidates"))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        tracing::warn!(
            finish_reason = ?candidate.finish_reason,
            "Generation returned an empty candidate"
        );
    }

    Ok(text)
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: RequestGenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestGenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    text: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_reference_parameters() {
        let config = GenerationConfig::default();
        assert_eq!(config.model, "gemini-1.5-flash");
        assert_eq!(config.top_k, 40);
        assert_eq!(config.max_output_tokens, 8192);
    }

    #[test]
    fn test_empty_model_rejected() {
        let config = GenerationConfig {
            model: " ".to_string(),
            ..Default::default()
        };
        assert!(GeminiGeneration::new("fake_key".to_string(), config).is_err());
    }

    #[test]
    fn test_request_serialization() {
        let generator =
            GeminiGeneration::new("fake_key".to_string(), GenerationConfig::default()).unwrap();
        let json = serde_json::to_value(generator.build_request("hello")).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
        assert!(generator.endpoint().ends_with("gemini-1.5-flash:generateContent"));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello, "},{"text":"world"}]},"finishReason":"STOP"}]}"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hello, world");
    }

    #[test]
    fn test_extract_text_without_candidates_fails() {
        let response: GenerateResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(extract_text(response).is_err());
    }
}
