//! C6: Contextual SQL Generator, plus the post-generation linter (spec §4.6). Linter
//! rules 1/3/4/5 are mechanically enforced here; rules 2 and 6/7 stay prompt-only and are
//! noted inline where they would otherwise be checked.

use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::llm::LlmGateway;

use super::json_parse::parse_strict_json;
use super::prompts;
use super::types::{CandidateType, SchemaContext, SqlCandidate, SubQuestion};

const STAGE: &str = "contextual_sql";

#[derive(Debug, Deserialize)]
struct SqlResponse {
    queries: Vec<RawCandidate>,
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    sql: String,
    description: String,
    #[serde(rename = "type")]
    candidate_type: String,
}

pub struct SqlGenerator<'a> {
    gateway: &'a dyn LlmGateway,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    /// Produces 1-5 linted SQL candidates for one sub-question (§4.6). On total linter
    /// rejection, falls back to a single simple aggregate derived from the sub-question
    /// text verbatim, per `EngineError::GenerationLintFailure`'s documented recovery.
    pub async fn generate(
        &self,
        sub_question: &SubQuestion,
        schema: &SchemaContext,
        exploration_text: &str,
        exact_value_columns: &HashSet<String>,
        llm_timeout: Duration,
        enhanced: bool,
    ) -> Vec<SqlCandidate> {
        let schema_text = prompts::schema_text(schema);
        let messages = prompts::contextual_sql(&sub_question.text, &schema_text, exploration_text);

        let raw = match self.gateway.invoke(&messages, llm_timeout).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("SQL generation LLM call failed: {e}");
                return vec![fallback_candidate(sub_question)];
            },
        };

        let candidates = match parse_strict_json::<SqlResponse>(&raw, STAGE) {
            Ok(r) => r.queries,
            Err(e) => {
                tracing::warn!("SQL generation response unparseable: {e}");
                return vec![fallback_candidate(sub_question)];
            },
        };

        let linted: Vec<SqlCandidate> = candidates
            .into_iter()
            .take(5)
            .filter_map(|c| {
                let candidate = SqlCandidate {
                    sql: c.sql,
                    description: c.description,
                    candidate_type: parse_candidate_type(&c.candidate_type),
                    enhanced_with_exploration: enhanced,
                };
                if lint(&candidate, schema, exact_value_columns) { Some(candidate) } else { None }
            })
            .collect();

        if linted.is_empty() {
            tracing::warn!("all SQL candidates for sub-question rejected by linter, falling back");
            return vec![fallback_candidate(sub_question)];
        }

        linted
    }
}

/// Enforces linter rules 1, 3, 4, 5 from §4.6. Rules 2, 6, 7 are prompt-only guidance
/// (percentile style, mandatory whole-market candidate, compound filters) that cannot be
/// mechanically verified against a bare SQL string without a full parser.
fn lint(candidate: &SqlCandidate, schema: &SchemaContext, exact_value_columns: &HashSet<String>) -> bool {
    rule1_known_columns_only(candidate, schema)
        && rule3_no_like_on_explored_columns(candidate, exact_value_columns)
        && rule4_no_in_list_for_comparison(candidate)
        && rule5_single_dimension_group_by(candidate)
}

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static identifier pattern is valid"));
static SQL_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "SELECT", "FROM", "WHERE", "GROUP", "BY", "ORDER", "HAVING", "AND", "OR", "NOT", "NULL",
        "AS", "ON", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "LIMIT", "OFFSET", "IN", "IS",
        "LIKE", "BETWEEN", "DESC", "ASC", "DISTINCT", "COUNT", "SUM", "AVG", "MIN", "MAX",
        "CASE", "WHEN", "THEN", "ELSE", "END", "CAST", "PERCENTILE_CONT", "OVER", "PARTITION",
    ]
    .into_iter()
    .collect()
});

static ALIAS_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bAS\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static alias-definition pattern is valid"));

fn rule1_known_columns_only(candidate: &SqlCandidate, schema: &SchemaContext) -> bool {
    let known: HashSet<&str> = schema.all_column_names().collect();
    let without_literals = blank_out_string_literals(&candidate.sql);
    // `AS alias` introduces a name with no schema counterpart; collect those so later
    // references to the alias (e.g. in ORDER BY) aren't mistaken for an unknown column.
    let aliases: HashSet<String> = ALIAS_DEF
        .captures_iter(&without_literals)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_ascii_uppercase()))
        .collect();

    IDENTIFIER
        .find_iter(&without_literals)
        .filter(|m| {
            let token = m.as_str();
            !SQL_KEYWORDS.contains(token.to_ascii_uppercase().as_str()) && !token.chars().all(|c| c.is_ascii_digit())
        })
        .all(|m| {
            let token = m.as_str();
            known.iter().any(|k| k.eq_ignore_ascii_case(token))
                || looks_like_table_or_alias(token, schema)
                || aliases.contains(&token.to_ascii_uppercase())
        })
}

/// Replaces the contents of single-quoted string literals with spaces so rule 1's
/// identifier scan never mistakes a filter value ("BI Developer") for an unknown column.
fn blank_out_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_string = false;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if in_string {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push(' ');
                    out.push(' ');
                    chars.next();
                    continue;
                }
                in_string = false;
                out.push(c);
            } else {
                out.push(' ');
            }
        } else if c == '\'' {
            in_string = true;
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

fn looks_like_table_or_alias(token: &str, schema: &SchemaContext) -> bool {
    schema.tables.iter().any(|t| {
        t.unqualified_name.eq_ignore_ascii_case(token) || t.qualified_name.eq_ignore_ascii_case(token)
    }) || token.len() <= 2
}

fn rule3_no_like_on_explored_columns(candidate: &SqlCandidate, exact_value_columns: &HashSet<String>) -> bool {
    if exact_value_columns.is_empty() {
        return true;
    }
    let sql_upper = candidate.sql.to_ascii_uppercase();
    if !sql_upper.contains("LIKE") {
        return true;
    }
    !exact_value_columns.iter().any(|col| {
        let pattern = format!(r"(?i)\b{}\b\s*(NOT\s+)?LIKE", regex::escape(col));
        Regex::new(&pattern).map(|re| re.is_match(&candidate.sql)).unwrap_or(false)
    })
}

fn rule4_no_in_list_for_comparison(candidate: &SqlCandidate) -> bool {
    // A candidate produced for a multi-entity comparison must filter on a single entity;
    // an IN-list combining several literal values is the anti-pattern rule 4 forbids.
    static IN_LIST: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\bIN\s*\(\s*'[^']*'\s*,\s*'[^']*'").expect("static IN-list pattern is valid")
    });
    !IN_LIST.is_match(&candidate.sql)
}

fn rule5_single_dimension_group_by(candidate: &SqlCandidate) -> bool {
    static GROUP_BY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?is)GROUP\s+BY\s+(.+?)(?:HAVING|ORDER\s+BY|LIMIT|$)").expect("static GROUP BY pattern is valid"));
    match GROUP_BY.captures(&candidate.sql) {
        Some(caps) => {
            let clause = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            clause.split(',').filter(|s| !s.trim().is_empty()).count() <= 1
        },
        None => true,
    }
}

fn parse_candidate_type(raw: &str) -> CandidateType {
    match raw.to_ascii_lowercase().as_str() {
        "aggregate" => CandidateType::Aggregate,
        "grouped" => CandidateType::Grouped,
        "overall_range" => CandidateType::OverallRange,
        _ => CandidateType::Other,
    }
}

/// The simple-aggregate fallback used both when the LLM call itself fails and when the
/// linter rejects every candidate (§4.6).
fn fallback_candidate(sub_question: &SubQuestion) -> SqlCandidate {
    SqlCandidate {
        sql: "SELECT COUNT(*) AS row_count".to_string(),
        description: format!("Fallback aggregate for: {}", sub_question.text),
        candidate_type: CandidateType::Aggregate,
        enhanced_with_exploration: false,
    }
}
