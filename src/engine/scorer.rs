//! C9: Result Scorer & Filter (spec §4.9). Threshold cascade (60 -> 30 -> top three)
//! with a deterministic default-score formula used whenever the scoring prompt fails.

use std::time::Duration;

use serde::Deserialize;

use crate::llm::LlmGateway;

use super::json_parse::parse_strict_json;
use super::prompts;
use super::types::{ExecutionResult, ScoredResult};

const STAGE: &str = "scoring";

#[derive(Debug, Deserialize)]
struct ScoringResponse {
    scores: Vec<RawScore>,
}

#[derive(Debug, Deserialize)]
struct RawScore {
    score: i64,
    reasoning: String,
    key_insights: Vec<String>,
}

pub struct ResultScorer<'a> {
    gateway: &'a dyn LlmGateway,
}

impl<'a> ResultScorer<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    /// Scores and filters the executed results for one sub-question. Failed results are
    /// always dropped before scoring; only successes are sent to the LLM (§4.9).
    pub async fn score_and_filter(
        &self,
        user_question: &str,
        results: Vec<ExecutionResult>,
        llm_timeout: Duration,
    ) -> Vec<ScoredResult> {
        let (successes, _failures): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.success);
        if successes.is_empty() {
            return Vec::new();
        }

        let summaries: Vec<String> = successes.iter().map(summarize).collect();
        let messages = prompts::scoring(user_question, &summaries);

        let scores = match self.gateway.invoke(&messages, llm_timeout).await {
            Ok(text) => match parse_strict_json::<ScoringResponse>(&text, STAGE) {
                Ok(r) if r.scores.len() == successes.len() => Some(r.scores),
                Ok(_) => {
                    tracing::warn!("scoring response length mismatch, using default scores");
                    None
                },
                Err(e) => {
                    tracing::warn!("scoring response unparseable, using default scores: {e}");
                    None
                },
            },
            Err(e) => {
                tracing::warn!("scoring LLM call failed, using default scores: {e}");
                None
            },
        };

        let scored: Vec<ScoredResult> = match scores {
            Some(scores) => successes
                .into_iter()
                .zip(scores)
                .map(|(result, s)| ScoredResult {
                    result,
                    quality_score: s.score.clamp(0, 100) as u8,
                    reasoning: s.reasoning,
                    key_insights: s.key_insights,
                    weight: 0.0,
                })
                .collect(),
            None => successes
                .into_iter()
                .map(|result| {
                    let score = default_score(&result);
                    ScoredResult {
                        result,
                        quality_score: score,
                        reasoning: "default score: scoring prompt unavailable".to_string(),
                        key_insights: Vec::new(),
                        weight: 0.0,
                    }
                })
                .collect(),
        };

        filter_and_weight(scored)
    }
}

/// `min(50 + row_count, 100)` per successful result on scoring-prompt parse failure (§4.9).
fn default_score(result: &ExecutionResult) -> u8 {
    (50 + result.row_count).min(100) as u8
}

fn summarize(result: &ExecutionResult) -> String {
    let sample: Vec<_> = result.rows.iter().take(3).collect();
    format!(
        "query: {}\nrow_count: {}\nsample_rows: {}",
        result.candidate.description,
        result.row_count,
        serde_json::to_string(&sample).unwrap_or_default()
    )
}

/// Drops failures (already excluded by the caller), keeps score >= 60; if none pass,
/// lowers the threshold to 30; if still none, keeps the top three. Weight within the
/// retained set is `score / sum(scores)` (§4.9).
fn filter_and_weight(scored: Vec<ScoredResult>) -> Vec<ScoredResult> {
    let mut retained: Vec<ScoredResult> = scored.iter().filter(|s| s.quality_score >= 60).cloned().collect();

    if retained.is_empty() {
        retained = scored.iter().filter(|s| s.quality_score >= 30).cloned().collect();
    }

    if retained.is_empty() {
        let mut sorted = scored;
        sorted.sort_by(|a, b| b.quality_score.cmp(&a.quality_score));
        retained = sorted.into_iter().take(3).collect();
    }

    let total: u32 = retained.iter().map(|s| s.quality_score as u32).sum();
    if total > 0 {
        for s in &mut retained {
            s.weight = s.quality_score as f64 / total as f64;
        }
    }

    retained
}
