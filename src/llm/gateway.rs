use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM response parsing error: {0}")]
    Parse(String),

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),
}

/// The engine's only dependency on a concrete LLM provider. Every machine-parsed prompt
/// in `engine::prompts` invokes this with `temperature = 0` (spec §3, Prompt Library).
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn invoke(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String, GatewayError>;
}
