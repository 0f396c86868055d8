//! LLM gateway abstraction: a single `invoke(messages) -> text` contract, since the
//! engine's prompts (§4.3) each define their own JSON contract and parse it themselves
//! via `engine::json_parse`.

mod client;
mod gateway;

pub use client::HttpLlmGateway;
pub use gateway::{ChatMessage, GatewayError, LlmGateway, Role};
