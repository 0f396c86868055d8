//! SessionContext and the VectorMemory/message-log collaborator traits (spec §6,
//! §9's "implicit session singletons -> pass SessionContext explicitly" REDESIGN FLAG).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub query_result: Option<Json>,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("vector memory unavailable: {0}")]
    Unavailable(String),
}

/// Failures here are swallowed to empty results by the caller (§6: "non-blocking
/// failures"); the trait itself still returns `Result` so a real implementation can log
/// the underlying cause before the caller discards it.
#[async_trait]
pub trait VectorMemory: Send + Sync {
    async fn upsert(&self, session_id: &str, text: &str, metadata: Json) -> Result<(), MemoryError>;
    async fn search(&self, session_id: &str, text: &str, k: usize) -> Result<Vec<String>, MemoryError>;
}

/// A VectorMemory that always reports empty results, used when the memory feature flag
/// is disabled (`EngineConfig::memory_enabled = false`) or when no real implementation
/// is wired yet.
pub struct NullVectorMemory;

#[async_trait]
impl VectorMemory for NullVectorMemory {
    async fn upsert(&self, _session_id: &str, _text: &str, _metadata: Json) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn search(&self, _session_id: &str, _text: &str, _k: usize) -> Result<Vec<String>, MemoryError> {
        Ok(Vec::new())
    }
}

/// Read-only access to a session's prior messages; the core needs nothing else from the
/// message log (§6: "the core requires only the ability to read the last N messages").
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn recent_messages(&self, session_id: &str, n: usize) -> Vec<StoredMessage>;
}

pub struct NullMessageLog;

#[async_trait]
impl MessageLog for NullMessageLog {
    async fn recent_messages(&self, _session_id: &str, _n: usize) -> Vec<StoredMessage> {
        Vec::new()
    }
}

/// Threaded explicitly through `Engine::process_question` rather than looked up from a
/// process-wide map, per the REDESIGN FLAG against implicit session singletons.
pub struct SessionContext {
    pub session_id: String,
    pub memory_enabled: bool,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, memory_enabled: bool) -> Self {
        Self { session_id: session_id.into(), memory_enabled }
    }

    /// Renders the memory excerpt consumed by the `analytical_questions` prompt. Returns
    /// an empty string when memory is disabled or the search comes back empty, never an
    /// error — this is the boundary where VectorMemory's non-blocking-failure contract
    /// reaches the decomposer.
    pub async fn memory_excerpt(&self, memory: &dyn VectorMemory, question: &str, k: usize) -> String {
        if !self.memory_enabled {
            return String::new();
        }

        match memory.search(&self.session_id, question, k).await {
            Ok(hits) if !hits.is_empty() => hits.join("\n"),
            Ok(_) => String::new(),
            Err(e) => {
                tracing::debug!("vector memory search failed, proceeding without context: {e}");
                String::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_excerpt_empty_when_disabled() {
        let ctx = SessionContext::new("s1", false);
        let excerpt = ctx.memory_excerpt(&NullVectorMemory, "question", 5).await;
        assert_eq!(excerpt, "");
    }

    #[tokio::test]
    async fn memory_excerpt_empty_on_search_error() {
        struct Failing;
        #[async_trait]
        impl VectorMemory for Failing {
            async fn upsert(&self, _: &str, _: &str, _: Json) -> Result<(), MemoryError> {
                Ok(())
            }
            async fn search(&self, _: &str, _: &str, _: usize) -> Result<Vec<String>, MemoryError> {
                Err(MemoryError::Unavailable("down".to_string()))
            }
        }

        let ctx = SessionContext::new("s1", true);
        let excerpt = ctx.memory_excerpt(&Failing, "question", 5).await;
        assert_eq!(excerpt, "");
    }
}
