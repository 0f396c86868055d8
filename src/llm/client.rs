//! HTTP client for OpenAI-compatible chat-completions APIs. A single scenario-agnostic
//! `invoke` call, since the engine's prompts carry their own JSON contracts instead of
//! one struct per scenario.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::gateway::{ChatMessage, GatewayError, LlmGateway, Role};

pub struct HttpLlmGateway {
    http_client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpLlmGateway {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .build()
            .expect("failed to construct reqwest client");
        Self { http_client, api_base: api_base.into(), api_key: api_key.into(), model: model.into() }
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn invoke(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String, GatewayError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| ChatMessageWire {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                    },
                    content: m.content.clone(),
                })
                .collect(),
            temperature: 0.0,
            response_format: ResponseFormat { r#type: "json_object".to_string() },
        };

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        tracing::debug!("calling LLM gateway at {} with model {}", url, self.model);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(timeout)
                } else {
                    GatewayError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(GatewayError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(GatewayError::Api(format!("API error {status}: {body}")));
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| GatewayError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GatewayError::Parse("empty response from LLM".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessageWire>,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessageWire {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
