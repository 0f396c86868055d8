//! C4: Question Decomposer (spec §4.4). Splits a question into sub-questions covering
//! distinct dimensions, with regex-based multi-entity comparison detection and a
//! numbered-list fallback extractor for when the LLM response doesn't parse as JSON.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::llm::LlmGateway;

use super::errors::EngineError;
use super::json_parse::parse_strict_json;
use super::prompts;
use super::types::{Dimension, Priority, SchemaContext, SubQuestion};

const STAGE: &str = "decompose";

#[derive(Debug, Deserialize)]
struct QuestionsResponse {
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    question: String,
    priority: String,
}

pub struct QuestionDecomposer<'a> {
    gateway: &'a dyn LlmGateway,
}

impl<'a> QuestionDecomposer<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    /// Produces 2-3 dimension-diverse SubQuestions (§4.4). Never fails the request: a
    /// malformed LLM response falls back to a numbered-list scan, then to a single
    /// default sub-question.
    pub async fn decompose(
        &self,
        user_question: &str,
        schema: &SchemaContext,
        memory_excerpt: &str,
        llm_timeout: Duration,
    ) -> Vec<SubQuestion> {
        let entities = detect_comparison_entities(user_question, schema);
        let schema_text = prompts::schema_text(schema);

        let messages = prompts::analytical_questions(&schema_text, user_question, memory_excerpt);
        let raw = match self.gateway.invoke(&messages, llm_timeout).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("decomposition LLM call failed, using fallback: {e}");
                return fallback_decomposition(user_question, &entities);
            },
        };

        let parsed: Result<QuestionsResponse, EngineError> = parse_strict_json(&raw, STAGE);
        let questions = match parsed {
            Ok(r) if !r.questions.is_empty() => r.questions,
            Ok(_) => {
                tracing::warn!("decomposition response had zero questions, using fallback");
                return fallback_decomposition(user_question, &entities);
            },
            Err(e) => {
                tracing::warn!("decomposition response unparseable, using fallback: {e}");
                return fallback_decomposition(user_question, &entities);
            },
        };

        let sub_questions: Vec<SubQuestion> = questions
            .into_iter()
            .take(3)
            .map(|q| SubQuestion {
                dimension: guess_dimension(&q.question),
                priority: parse_priority(&q.priority),
                entity: entities.first().cloned(),
                text: q.question,
            })
            .collect();

        enforce_dimension_diversity(sub_questions, &entities)
    }
}

/// "X and Y", "X vs Y", "between X and Y" over known categorical values (§4.4).
fn detect_comparison_entities(question: &str, schema: &SchemaContext) -> Vec<String> {
    static VS_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\bbetween\s+(.+?)\s+and\s+(.+?)\b|\b(.+?)\s+(?:and|vs\.?)\s+(.+?)\b")
            .expect("static comparison pattern is valid")
    });

    let known_values: Vec<&str> = schema
        .tables
        .iter()
        .flat_map(|t| t.columns.iter())
        .filter(|c| c.is_categorical())
        .flat_map(|c| c.stats.iter().flat_map(|s| s.top_values.iter().map(|v| v.value.as_str())))
        .collect();

    if known_values.is_empty() {
        return Vec::new();
    }

    let mut found = Vec::new();
    if VS_PATTERN.is_match(question) {
        for value in known_values {
            if question.to_ascii_lowercase().contains(&value.to_ascii_lowercase()) {
                found.push(value.to_string());
            }
        }
    }
    found.dedup();
    found
}

fn guess_dimension(question: &str) -> Dimension {
    let q = question.to_ascii_lowercase();
    if q.contains("supplier") || q.contains("vendor") {
        Dimension::Supplier
    } else if q.contains("country") || q.contains("region") || q.contains("location") || q.contains("geographic") {
        Dimension::Geographic
    } else if q.contains("year") || q.contains("month") || q.contains("quarter") || q.contains("trend") || q.contains("time") {
        Dimension::Temporal
    } else if q.contains("role") || q.contains("seniority") || q.contains("title") || q.contains("level") {
        Dimension::Role
    } else if q.contains("overall") || q.contains("total") || q.contains("market") {
        Dimension::Overall
    } else {
        Dimension::Other
    }
}

fn parse_priority(raw: &str) -> Priority {
    match raw.to_ascii_lowercase().as_str() {
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Medium,
    }
}

/// Deduplicates dimension tags unless this is a multi-entity comparison, per invariant 3
/// (spec §8). When a dimension repeats, the later sub-question's tag is relaxed to
/// `Dimension::Other` rather than dropping the sub-question outright.
fn enforce_dimension_diversity(sub_questions: Vec<SubQuestion>, entities: &[String]) -> Vec<SubQuestion> {
    if !entities.is_empty() {
        return sub_questions;
    }

    let mut seen = std::collections::HashSet::new();
    sub_questions
        .into_iter()
        .map(|mut sq| {
            if !seen.insert(sq.dimension) {
                sq.dimension = Dimension::Other;
            }
            sq
        })
        .collect()
}

/// Scans for a numbered list ("1. ...", "2. ..."); if none is found, emits one default
/// sub-question (§4.4, "the decomposer never fails the request").
fn fallback_decomposition(user_question: &str, entities: &[String]) -> Vec<SubQuestion> {
    static NUMBERED_LINE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s*(.+)$").expect("static numbered-line pattern is valid"));

    let numbered: Vec<&str> = NUMBERED_LINE
        .captures_iter(user_question)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .take(3)
        .collect();

    if numbered.is_empty() {
        return vec![SubQuestion {
            text: format!("Provide analysis for: {user_question}"),
            priority: Priority::Medium,
            dimension: Dimension::Overall,
            entity: entities.first().cloned(),
        }];
    }

    numbered
        .into_iter()
        .map(|text| SubQuestion {
            dimension: guess_dimension(text),
            priority: Priority::Medium,
            entity: entities.first().cloned(),
            text: text.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_without_numbered_list_is_single_default() {
        let out = fallback_decomposition("What is the average rate?", &[]);
        assert_eq!(out.len(), 1);
        assert!(out[0].text.starts_with("Provide analysis for:"));
    }

    #[test]
    fn fallback_extracts_numbered_questions() {
        let text = "1. What is the average rate?\n2. How does it vary by country?";
        let out = fallback_decomposition(text, &[]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn diversity_relaxes_duplicate_dimensions_when_not_comparison() {
        let sub_questions = vec![
            SubQuestion { text: "a".into(), priority: Priority::High, dimension: Dimension::Supplier, entity: None },
            SubQuestion { text: "b".into(), priority: Priority::High, dimension: Dimension::Supplier, entity: None },
        ];
        let out = enforce_dimension_diversity(sub_questions, &[]);
        assert_eq!(out[0].dimension, Dimension::Supplier);
        assert_eq!(out[1].dimension, Dimension::Other);
    }

    #[test]
    fn diversity_left_alone_for_multi_entity_comparisons() {
        let sub_questions = vec![
            SubQuestion { text: "a".into(), priority: Priority::High, dimension: Dimension::Supplier, entity: Some("IND".into()) },
            SubQuestion { text: "b".into(), priority: Priority::High, dimension: Dimension::Supplier, entity: Some("USA".into()) },
        ];
        let out = enforce_dimension_diversity(sub_questions, &["IND".to_string(), "USA".to_string()]);
        assert_eq!(out[1].dimension, Dimension::Supplier);
    }
}
