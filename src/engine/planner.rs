//! C5: Query Planner (spec §4.5). Thin LLM call with a documented default on parse
//! failure or gateway error; advisory only, so a downstream stage may still diverge
//! from its recommendation.

use std::time::Duration;

use serde::Deserialize;

use crate::llm::LlmGateway;

use super::json_parse::parse_strict_json;
use super::prompts;
use super::types::QueryPlan;

const STAGE: &str = "planning";

#[derive(Debug, Deserialize)]
struct PlanResponse {
    needs_multiple_queries: bool,
    reasoning: String,
    suggested_explorations: Vec<String>,
}

pub struct QueryPlanner<'a> {
    gateway: &'a dyn LlmGateway,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    /// The plan is advisory only: the SQL Generator (C6) may still emit multiple
    /// candidates even when `needs_multiple == false` (§4.5).
    pub async fn plan(&self, sub_question: &str, schema_text: &str, llm_timeout: Duration) -> QueryPlan {
        let messages = prompts::query_planning(sub_question, schema_text);
        let raw = match self.gateway.invoke(&messages, llm_timeout).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("planning LLM call failed: {e}");
                return default_plan();
            },
        };

        match parse_strict_json::<PlanResponse>(&raw, STAGE) {
            Ok(parsed) => QueryPlan {
                needs_multiple: parsed.needs_multiple_queries,
                reasoning: parsed.reasoning,
                suggested_explorations: parsed.suggested_explorations,
            },
            Err(e) => {
                tracing::warn!("planning response unparseable: {e}");
                default_plan()
            },
        }
    }
}

fn default_plan() -> QueryPlan {
    QueryPlan { needs_multiple: false, reasoning: "parse failure".to_string(), suggested_explorations: Vec::new() }
}
