//! C10: Synthesis Composer (spec §4.10). Builds the narrative answer and per-dimension
//! tables, with an apology path when nothing survives scoring and a post-validator that
//! forbids bare single numbers for rate-style data.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::LlmGateway;

use super::cache::PaginationCache;
use super::prompts;
use super::types::{Answer, AnswerTable, Dimension, ScoredResult, SqlCandidate, SubQuestionStats};

pub struct SynthesisComposer<'a> {
    gateway: &'a dyn LlmGateway,
}

struct TaggedResult {
    dimension: Dimension,
    scored: ScoredResult,
}

impl<'a> SynthesisComposer<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    /// `retained` pairs each ScoredResult with the dimension of the SubQuestion it came
    /// from. `truncated` is set when the request deadline cut the pipeline short (§5).
    pub async fn compose(
        &self,
        user_question: &str,
        schema_text: &str,
        retained: Vec<(Dimension, ScoredResult)>,
        stats: Vec<SubQuestionStats>,
        truncated: bool,
        llm_timeout: Duration,
        pagination_cache: &PaginationCache,
    ) -> Answer {
        if retained.is_empty() {
            return Answer {
                narrative: no_answer_message(),
                tables: Vec::new(),
                candidates_used: Vec::new(),
                stats,
                truncated,
            };
        }

        let tagged: Vec<TaggedResult> =
            retained.into_iter().map(|(dimension, scored)| TaggedResult { dimension, scored }).collect();
        let aggregated_text = render_aggregated_results(&tagged);

        let messages = prompts::synthesis(user_question, &aggregated_text, schema_text);
        let narrative = match self.gateway.invoke(&messages, llm_timeout).await {
            Ok(text) => enforce_no_bare_single_numbers(text),
            Err(e) => {
                tracing::warn!("synthesis LLM call failed, emitting degraded narrative: {e}");
                degraded_narrative(&tagged)
            },
        };

        let tables = build_tables(&tagged, pagination_cache);
        let candidates_used: Vec<SqlCandidate> = tagged.iter().map(|t| t.scored.result.candidate.clone()).collect();

        let mut narrative = narrative;
        if truncated {
            narrative.push_str("\n\n_Note: this answer is based on partial results; the request deadline was reached before all sub-questions completed._");
        }

        Answer { narrative, tables, candidates_used, stats, truncated }
    }
}

fn render_aggregated_results(tagged: &[TaggedResult]) -> String {
    tagged
        .iter()
        .map(|t| {
            format!(
                "[{:?}] score={} weight={:.2}\n{}\nsample: {}",
                t.dimension,
                t.scored.quality_score,
                t.scored.weight,
                t.scored.result.candidate.description,
                serde_json::to_string(&t.scored.result.rows.iter().take(3).collect::<Vec<_>>())
                    .unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One table per dimension with >= 3 rows, capped at five rows inline, mixing high- and
/// low-end examples by taking from both ends of the row list (§4.10). The full row set
/// backing each table is registered in the pagination cache so a caller can page past the
/// inline preview via `paginate_result` (spec §6, §4.12).
fn build_tables(tagged: &[TaggedResult], pagination_cache: &PaginationCache) -> Vec<AnswerTable> {
    let mut by_dimension: std::collections::BTreeMap<String, Vec<&TaggedResult>> = std::collections::BTreeMap::new();
    for t in tagged {
        by_dimension.entry(format!("{:?}", t.dimension)).or_default().push(t);
    }

    by_dimension
        .into_iter()
        .filter_map(|(dimension, results)| {
            let all_rows: Vec<_> = results.iter().flat_map(|t| t.scored.result.rows.iter()).collect();
            if all_rows.len() < 3 {
                return None;
            }

            let columns: Vec<String> = all_rows.first()?.keys().cloned().collect();
            let selected = balanced_sample(&all_rows, 5);
            let rows = selected
                .iter()
                .map(|row| columns.iter().map(|c| row.get(c).cloned().unwrap_or(serde_json::Value::Null)).collect())
                .collect();

            let full_rows: Vec<serde_json::Map<String, serde_json::Value>> =
                all_rows.iter().map(|row| row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).collect();
            let table_id = pagination_cache.register(columns.clone(), full_rows);

            Some(AnswerTable { title: dimension, columns, rows, table_id })
        })
        .collect()
}

fn balanced_sample<'a>(
    rows: &[&'a std::collections::BTreeMap<String, serde_json::Value>],
    limit: usize,
) -> Vec<&'a std::collections::BTreeMap<String, serde_json::Value>> {
    if rows.len() <= limit {
        return rows.to_vec();
    }
    let half = limit / 2;
    let mut out: Vec<_> = rows.iter().take(half).cloned().collect();
    out.extend(rows.iter().rev().take(limit - half).cloned());
    out
}

/// Replaces a bare, unit-suffixed single number (e.g. "$42.50/hr") with a narrow range
/// when the LLM failed to hedge, satisfying invariant 5 (§8) defensively. Leaves
/// non-rate numeric mentions (row counts, percentages) untouched.
fn enforce_no_bare_single_numbers(narrative: String) -> String {
    static BARE_RATE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b(is|was|at)\s+\$?(\d+(?:\.\d+)?)\s*(per hour|/hr|/hour)\b").expect("static bare-rate pattern is valid"));

    BARE_RATE
        .replace_all(&narrative, |caps: &regex::Captures| {
            let verb = &caps[1];
            let value: f64 = caps[2].parse().unwrap_or(0.0);
            let unit = &caps[3];
            format!("{verb} approximately ${:.2}-${:.2} {unit}", value * 0.9, value * 1.1)
        })
        .into_owned()
}

fn degraded_narrative(tagged: &[TaggedResult]) -> String {
    let mut out = String::from("Here is what the available data shows.\n\n");
    for t in tagged {
        out.push_str(&format!("- {:?}: {}\n", t.dimension, t.scored.result.candidate.description));
    }
    out
}

/// §4.10: "a short apology naming the likely reason...and a suggested rewording".
fn no_answer_message() -> String {
    "I couldn't find a reliable answer to this question. Either no rows matched the \
     conditions implied by your question, or the schema does not have the dimension \
     you're asking about. Try rephrasing with a more specific timeframe, entity, or \
     metric."
        .to_string()
}
