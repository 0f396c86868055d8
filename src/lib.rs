//! Analytical Query Engine
//!
//! A library that translates natural-language business questions into SQL, executes
//! them against a tenant database, and synthesizes a narrative answer. The engine is
//! storage- and LLM-agnostic: it is driven entirely through the `SqlExecutor` and
//! `LlmGateway` traits in `db` and `llm`, so it can be embedded with any implementation
//! of either, or tested against in-memory fakes.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod llm;
pub mod utils;
pub mod workspace;

pub use config::Config;
pub use engine::{Engine, EngineError};
pub use workspace::{Workspace, WorkspaceLimits};

use std::sync::Arc;

use crate::llm::{HttpLlmGateway, LlmGateway};
use crate::engine::session::{MessageLog, NullMessageLog, NullVectorMemory, VectorMemory};

/// Application shared state handed to every Axum handler in `api`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Builds the default production wiring: an `HttpLlmGateway` over the configured
    /// LLM provider and no vector memory/message log until a real implementation is
    /// plugged in (both default to their null implementations, which is safe because
    /// every call site treats their failures as non-blocking, per spec §6).
    pub fn new(config: Config) -> Self {
        let gateway: Arc<dyn LlmGateway> =
            Arc::new(HttpLlmGateway::new(config.llm.api_base.clone(), config.llm.api_key.clone(), config.llm.model.clone()));
        let memory: Arc<dyn VectorMemory> = Arc::new(NullVectorMemory);
        let message_log: Arc<dyn MessageLog> = Arc::new(NullMessageLog);

        let engine = Arc::new(Engine::new(gateway, memory, message_log, config.engine.workspace_limits()));

        Self { engine, config: Arc::new(config) }
    }
}
