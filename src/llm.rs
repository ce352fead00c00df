use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;

/// One-shot text completion: a prompt goes in, the reply text comes out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Messages API client. Constructed once per run and shared by reference.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    base_url: Url,
    api_key: String,
    version: String,
    model: String,
    max_tokens: u32,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        // `join` replaces the last path segment unless the base ends with '/'.
        let raw = if cfg.llm.base_url.ends_with('/') {
            cfg.llm.base_url.clone()
        } else {
            format!("{}/", cfg.llm.base_url)
        };
        let base_url = Url::parse(&raw).context("invalid llm.base_url")?;
        Self::with_base_url(
            cfg.resolved_api_key(),
            cfg.llm.version.clone(),
            cfg.llm.model.clone(),
            cfg.llm.max_tokens,
            base_url,
        )
    }

    pub fn with_base_url(
        api_key: String,
        version: String,
        model: String,
        max_tokens: u32,
        base_url: Url,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("bookmark-vault/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            version,
            model,
            max_tokens,
        })
    }

    pub fn build_request(&self, prompt: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("v1/messages")
            .context("invalid llm base URL")?;
        self.http
            .post(endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
            .header("Content-Type", "application/json")
            .json(&build_message_body(&self.model, self.max_tokens, prompt))
            .build()
            .context("failed to build completion request")
    }

    async fn execute(&self, prompt: &str) -> Result<String> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("no API key configured for the categorization model"));
        }
        let request = self.build_request(prompt)?;
        info!(url = %request.url(), model = %self.model, prompt_chars = prompt.len(), "requesting categories");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach completion endpoint")?;
        let status = res.status();
        debug!(%status, "completion response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by completion endpoint: {}", body);
            return Err(anyhow!("received 429 from completion endpoint: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!("completion error - Status: {}, Body: {}", status, body);
            return Err(anyhow!("completion error {}: {}", status, body));
        }

        let payload: MessageResponse = res
            .json()
            .await
            .context("invalid completion response JSON")?;
        extract_text(&payload)
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.execute(prompt).await
    }
}

pub fn build_message_body(model: &str, max_tokens: u32, prompt: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [
            { "role": "user", "content": prompt }
        ],
    })
}

fn extract_text(payload: &MessageResponse) -> Result<String> {
    let text: String = payload
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();
    if text.trim().is_empty() {
        return Err(anyhow!("completion response carried no text"));
    }
    Ok(text)
}

#[derive(Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LlmClient {
        LlmClient::with_base_url(
            "sk-test".into(),
            "2023-06-01".into(),
            "test-model".into(),
            256,
            Url::parse("https://api.anthropic.com/").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn build_message_body_wraps_prompt() {
        let body = build_message_body("m", 64, "hello");
        assert_eq!(body["model"], "m");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn build_request_sets_headers() {
        let request = client().build_request("prompt").unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/messages");
        let headers = request.headers();
        assert_eq!(
            headers.get("x-api-key").and_then(|h| h.to_str().ok()).unwrap(),
            "sk-test"
        );
        assert_eq!(
            headers
                .get("anthropic-version")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "2023-06-01"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn extract_text_joins_text_blocks() {
        let payload: MessageResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "{\"1\": " },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "\"Rust\"}" }
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(&payload).unwrap(), "{\"1\": \"Rust\"}");
    }

    #[test]
    fn extract_text_rejects_empty_reply() {
        let payload: MessageResponse = serde_json::from_value(json!({ "content": [] })).unwrap();
        assert!(extract_text(&payload).is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let rendered = format!("{:?}", client());
        assert!(!rendered.contains("sk-test"));
    }
}
