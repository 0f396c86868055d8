//! C3: Prompt Library — versioned, parameterized templates, one function per prompt
//! (spec §4.3). Each builder returns the `(system, human)` message pair the gateway
//! expects; the matching response type lives next to its consumer module.

use crate::llm::ChatMessage;

use super::types::SchemaContext;

/// Appended to every machine-parsed system prompt. Matches §4.3's forbidden-behavior list.
const CONTRACT_FOOTER: &str = "\
Rules you must always follow:\n\
- Never quote schema-qualified table names in your natural-language output.\n\
- Never use LIKE against a column whose exact values were given to you in an exploration section; use equality.\n\
- Never expand abbreviations found in the question or in column values.\n\
- Never invent a column that is not present in the schema you were given.\n\
- Respond with a single JSON document only: no prose, no markdown code fences.";

/// v1 — analytical_questions (§4.3, §4.4).
pub fn analytical_questions(schema_text: &str, user_question: &str, memory_excerpt: &str) -> Vec<ChatMessage> {
    let system = format!(
        "You decompose a business question about a relational database into 2 to 3 \
         analytical sub-questions that explore distinct dimensions (supplier, geographic, \
         temporal, role, overall). Prefer supplier first unless the user excludes suppliers. \
         Only propose dimensions the schema can answer. Respond as JSON: \
         {{\"questions\": [{{\"question\": string, \"priority\": \"high\"|\"medium\"|\"low\"}}]}}.\n\n{CONTRACT_FOOTER}"
    );
    let human = format!(
        "SCHEMA:\n{schema_text}\n\nPRIOR CONTEXT:\n{memory_excerpt}\n\nUSER QUESTION:\n{user_question}"
    );
    vec![ChatMessage::system(system), ChatMessage::user(human)]
}

/// v1 — query_planning (§4.3, §4.5).
pub fn query_planning(sub_question: &str, schema_text: &str) -> Vec<ChatMessage> {
    let system = format!(
        "You decide whether answering a sub-question needs multiple distinct queries and \
         which schema columns are worth exploring before SQL is written. Respond as JSON: \
         {{\"needs_multiple_queries\": bool, \"reasoning\": string, \"suggested_explorations\": [string]}}.\n\n{CONTRACT_FOOTER}"
    );
    let human = format!("SCHEMA:\n{schema_text}\n\nSUB-QUESTION:\n{sub_question}");
    vec![ChatMessage::system(system), ChatMessage::user(human)]
}

/// v1 — contextual_sql (§4.3, §4.6). `exploration_text` is empty on the first pass and
/// the rendered "COLUMN EXPLORATION RESULTS" block on the retry pass (§4.8 step 3).
pub fn contextual_sql(sub_question: &str, schema_text: &str, exploration_text: &str) -> Vec<ChatMessage> {
    let system = format!(
        "You write 1 to 5 SQL candidates for MySQL that together address a sub-question \
         through distinct dimensions. Rate-style questions (per-unit pricing, rates, costs) \
         must use percentile aggregations (25th/50th/75th) instead of plain mean/min/max \
         unless the user explicitly asked for min or max, and must include one whole-market \
         candidate with no GROUP BY. When exploration results give you exact values for a \
         column, filter on those values with equality, never LIKE. For multi-entity \
         comparisons, write one query per entity; never combine entities with an IN list. \
         Each candidate groups by at most one dimension unless the sub-question explicitly \
         asks for cross-tabulation. Respond as JSON: {{\"queries\": [{{\"sql\": string, \
         \"description\": string, \"type\": \"aggregate\"|\"grouped\"|\"overall_range\"|\"other\"}}]}}.\n\n{CONTRACT_FOOTER}"
    );
    let mut human = format!("SCHEMA:\n{schema_text}\n\nSUB-QUESTION:\n{sub_question}");
    if !exploration_text.is_empty() {
        human.push_str("\n\nCOLUMN EXPLORATION RESULTS:\n");
        human.push_str(exploration_text);
    }
    vec![ChatMessage::system(system), ChatMessage::user(human)]
}

/// v1 — scoring (§4.3, §4.9). `result_summaries` must be in the same order the scores
/// are expected back in.
pub fn scoring(user_question: &str, result_summaries: &[String]) -> Vec<ChatMessage> {
    let system = format!(
        "You score each executed query result for how well it helps answer the original \
         question, 0 to 100. Return scores in the same order the results were given, one \
         entry per result. Respond as JSON: {{\"scores\": [{{\"score\": int, \"reasoning\": \
         string, \"key_insights\": [string]}}]}}.\n\n{CONTRACT_FOOTER}"
    );
    let mut human = format!("ORIGINAL QUESTION:\n{user_question}\n\nRESULTS:\n");
    for (i, summary) in result_summaries.iter().enumerate() {
        human.push_str(&format!("\n[{i}]\n{summary}\n"));
    }
    vec![ChatMessage::system(system), ChatMessage::user(human)]
}

/// v1 — synthesis (§4.3, §4.10). Free-text output; no JSON contract, so it is not routed
/// through `parse_strict_json`.
pub fn synthesis(user_question: &str, aggregated_results_text: &str, schema_text: &str) -> Vec<ChatMessage> {
    let system = "You write the final narrative answer to a business question from a set \
         of scored, weighted query results. Structure: (1) a direct-answer paragraph that, \
         for rate-style data, states a range (low-high) and never a single bare number; (2) \
         zero or more markdown tables, one per dimension that has three or more rows, each \
         capped at five rows mixing high- and low-end examples; (3) a section per dimension \
         actually present, named after that dimension, not 'Dimension 1'; (4) percentage \
         comparisons wherever two numeric ranges are placed side by side. If no results were \
         retained, write a short apology naming the likely cause (no matching rows, or the \
         schema lacks the needed dimension) and suggest a rephrasing instead. Never quote \
         schema-qualified table names, never expand abbreviations.";
    let human = format!(
        "USER QUESTION:\n{user_question}\n\nSCHEMA SUMMARY:\n{schema_text}\n\nSCORED RESULTS:\n{aggregated_results_text}"
    );
    vec![ChatMessage::system(system.to_string()), ChatMessage::user(human)]
}

/// Renders the compact schema text prompts consume, preferring the caller-provided
/// rendering (which may already carry an exploration block) over re-rendering from scratch.
pub fn schema_text(ctx: &SchemaContext) -> String {
    ctx.render()
}
