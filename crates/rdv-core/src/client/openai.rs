//! Chat-completions client for OpenAI-compatible endpoints.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{VlmClient, VlmRequest};
use crate::domain::{EvalError, RequestError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        OpenAiConfig {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            max_tokens: 2000,
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    /// Read `OPENAI_BASE_URL` / `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

pub struct OpenAiClient {
    config: OpenAiConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                EvalError::Config(
                    "API key not provided; pass --api-key or set OPENAI_API_KEY".into(),
                )
            })?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("rdv-core/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EvalError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            api_key,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env())
    }

    fn request_body(&self, request: &VlmRequest) -> Value {
        let mut content = vec![json!({"type": "text", "text": request.prompt})];
        content.extend(request.images.iter().map(|img| {
            json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/jpeg;base64,{}", img.data_base64)}
            })
        }));

        json!({
            "model": request.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": self.config.max_tokens,
        })
    }
}

#[async_trait]
impl VlmClient for OpenAiClient {
    async fn complete(&self, request: &VlmRequest) -> std::result::Result<String, RequestError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(
            url = %url,
            traj_id = request.trajectory,
            pair = request.pair_index,
            images = request.images.len(),
            "sending completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| RequestError::transport(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RequestError::transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(map_http_error(status.as_u16(), &body));
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| RequestError::http(status.as_u16(), format!("invalid JSON body: {e}")))?;
        extract_message_content(&json)
            .map(str::to_string)
            .ok_or_else(|| RequestError::http(status.as_u16(), "response has no message content"))
    }
}

/// `choices[0].message.content` of a chat-completions body.
pub fn extract_message_content(body: &Value) -> Option<&str> {
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

fn retry_hint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)try again in (\d+(?:\.\d+)?)s").expect("retry hint pattern is valid")
    })
}

/// Parse the "try again in N.Ns" hint some endpoints put in 429 bodies.
pub fn parse_retry_hint(body: &str) -> Option<Duration> {
    let caps = retry_hint_pattern().captures(body)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn map_http_error(status: u16, body: &str) -> RequestError {
    let err = RequestError::http(status, format!("HTTP {status}: {body}"));
    match (status, parse_retry_hint(body)) {
        (429, Some(wait)) => err.with_retry_after(wait),
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EncodedImage;

    #[test]
    fn test_retry_hint_parsing() {
        let body = r#"{"error": {"message": "Rate limit reached. Please try again in 1.5s."}}"#;
        assert_eq!(parse_retry_hint(body), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_hint("Please try again in 20s"), Some(Duration::from_secs(20)));
        assert_eq!(parse_retry_hint("slow down"), None);
    }

    #[test]
    fn test_429_carries_retry_after() {
        let err = map_http_error(429, "Please try again in 2s");
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));

        let err = map_http_error(500, "Please try again in 2s");
        assert_eq!(err.retry_after, None);
    }

    #[test]
    fn test_extract_message_content() {
        let body = json!({"choices": [{"message": {"content": "{\"Answer\": {}}"}}]});
        assert_eq!(extract_message_content(&body), Some("{\"Answer\": {}}"));
        assert_eq!(extract_message_content(&json!({"choices": []})), None);
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = OpenAiConfig {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            max_tokens: 10,
            timeout_secs: 1,
        };
        assert!(OpenAiClient::new(config).err().is_some_and(|e| e.is_fatal()));
    }

    #[test]
    fn test_request_body_embeds_images_as_data_urls() {
        let config = OpenAiConfig::from_env().with_api_key("sk-test");
        let client = OpenAiClient::new(config).unwrap();
        let body = client.request_body(&VlmRequest {
            trajectory: 0,
            pair_index: 1,
            model: "gpt-4o-mini".into(),
            prompt: "go".into(),
            images: vec![EncodedImage {
                label: "alice/front".into(),
                data_base64: "AAAA".into(),
            }],
        });
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "go");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
        assert_eq!(body["max_tokens"], 2000);
    }
}
