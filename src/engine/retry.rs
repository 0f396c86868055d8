//! C8: Retry-with-Exploration Loop (spec §4.8). One-shot only: extracts candidate
//! columns from the failing SQL by whole-token matching, explores them, and regenerates.
//! Composes `value_explorer` and `sql_generator` directly, which is why it sits above
//! both in the module graph.

use std::collections::HashSet;
use std::time::Duration;

use crate::db::SqlExecutor;
use crate::llm::LlmGateway;

use super::sql_generator::SqlGenerator;
use super::types::{ColumnExploration, ExecutionResult, SchemaContext, SubQuestion};
use super::value_explorer::ValueExplorer;

pub struct RetryOutcome {
    pub results: Vec<ExecutionResult>,
    pub retried: bool,
}

/// Runs the one-shot repair path for a sub-question whose candidates all need a retry
/// (§4.8). `failing_sql` is used only to extract candidate columns (step 1); the
/// sub-question text and schema drive regeneration.
pub async fn retry_with_exploration(
    sub_question: &SubQuestion,
    failing_sql: &[String],
    schema: &SchemaContext,
    executor: &dyn SqlExecutor,
    gateway: &dyn LlmGateway,
    llm_timeout: Duration,
    query_timeout: Duration,
) -> RetryOutcome {
    let candidate_columns = extract_candidate_columns(failing_sql, schema);
    if candidate_columns.is_empty() {
        return RetryOutcome { results: Vec::new(), retried: false };
    }

    let explorer = ValueExplorer::new(executor);
    let mut explorations = Vec::new();
    let mut exact_value_columns = HashSet::new();

    for (table, column) in &candidate_columns {
        match explorer.explore(&table.qualified_name, column, 20, Some(&sub_question.text)).await {
            Ok(exploration) if exploration.total_distinct > 0 => {
                exact_value_columns.insert(column.name.clone());
                explorations.push(exploration);
            },
            Ok(_) => {},
            Err(e) => tracing::warn!("exploration failed during retry for {}: {}", column.name, e),
        }
    }

    if explorations.is_empty() {
        return RetryOutcome { results: Vec::new(), retried: false };
    }

    let exploration_text = render_exploration_block(&explorations);
    let generator = SqlGenerator::new(gateway);
    let enhanced_candidates = generator
        .generate(sub_question, schema, &exploration_text, &exact_value_columns, llm_timeout, true)
        .await;

    let mut results = Vec::new();
    for candidate in enhanced_candidates {
        let outcome = executor.execute(&candidate.sql, query_timeout).await;
        let result = super::pipeline::execution_result_from(candidate, outcome);
        if result.success && result.row_count > 0 && !result.has_all_null_aggregations() {
            results.push(result);
        }
    }

    RetryOutcome { results, retried: true }
}

/// Matches column names from SchemaContext as whole tokens inside the failing SQL
/// (§4.8 step 1), excluding numeric columns (step 2).
fn extract_candidate_columns<'a>(
    failing_sql: &[String],
    schema: &'a SchemaContext,
) -> Vec<(&'a super::types::Table, &'a super::types::Column)> {
    let combined = failing_sql.join(" \n ");
    let mut found = Vec::new();

    for table in &schema.tables {
        for column in &table.columns {
            if column.is_numeric() {
                continue;
            }
            if is_whole_token_present(&combined, &column.name) {
                found.push((table, column));
            }
        }
    }

    found
}

fn is_whole_token_present(haystack: &str, needle: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric() && c != '_').any(|tok| tok.eq_ignore_ascii_case(needle))
}

fn render_exploration_block(explorations: &[ColumnExploration]) -> String {
    explorations.iter().map(|e| e.render()).collect::<Vec<_>>().join("\n")
}
