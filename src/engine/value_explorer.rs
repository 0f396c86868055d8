//! C2: Value Explorer (spec §4.2). Finds the distinct values of a column worth showing
//! the SQL generator, keyword-partitioned so a hint like "California" surfaces "CA"
//! ahead of unrelated high-frequency values.

use std::time::Duration;

use thiserror::Error;

use crate::db::SqlExecutor;

use super::types::{Column, ColumnExploration, ValueFrequency};

const EXPLORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
#[error("value exploration failed for column {column}: {message}")]
pub struct ExplorationError {
    pub column: String,
    pub message: String,
}

pub struct ValueExplorer<'a> {
    executor: &'a dyn SqlExecutor,
}

impl<'a> ValueExplorer<'a> {
    pub fn new(executor: &'a dyn SqlExecutor) -> Self {
        Self { executor }
    }

    /// `explore(column, k, keyword_hint) -> ColumnExploration` (§4.2). Numeric columns
    /// are skipped entirely; an unknown column yields an empty result rather than an
    /// error, matching the "missing column yields empty" contract.
    pub async fn explore(
        &self,
        table_qualified_name: &str,
        column: &Column,
        k: u32,
        keyword_hint: Option<&str>,
    ) -> Result<ColumnExploration, ExplorationError> {
        if column.is_numeric() {
            return Ok(ColumnExploration::empty(&column.name));
        }

        let col = quote_ident(&column.name);
        let table = quote_qualified(table_qualified_name);

        let distinct_sql = format!("SELECT COUNT(DISTINCT {col}) AS d FROM {table}");
        let distinct_result =
            self.executor.execute(&distinct_sql, EXPLORE_TIMEOUT).await.map_err(|e| ExplorationError {
                column: column.name.clone(),
                message: e.to_string(),
            })?;
        let total_distinct =
            distinct_result.rows.first().and_then(|r| r.get("d")).and_then(|v| v.as_u64()).unwrap_or(0);

        if total_distinct == 0 {
            return Ok(ColumnExploration::empty(&column.name));
        }

        // Over-fetch so a keyword partition still has enough candidates on both sides.
        let fetch_limit = (k as u64 * 4).max(100);
        let values_sql = format!(
            "SELECT {col} AS v, COUNT(*) AS c FROM {table} WHERE {col} IS NOT NULL \
             GROUP BY {col} ORDER BY c DESC LIMIT {fetch_limit}"
        );
        let values_result =
            self.executor.execute(&values_sql, EXPLORE_TIMEOUT).await.map_err(|e| ExplorationError {
                column: column.name.clone(),
                message: e.to_string(),
            })?;

        let all_values: Vec<ValueFrequency> = values_result
            .rows
            .iter()
            .filter_map(|r| {
                let value = match r.get("v")? {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let count = r.get("c")?.as_u64()?;
                Some(ValueFrequency { value, count })
            })
            .collect();

        let values = match keyword_hint {
            Some(hint) if !hint.trim().is_empty() => partition_by_keyword(all_values, hint, k as usize),
            _ => all_values.into_iter().take(k as usize).collect(),
        };

        Ok(ColumnExploration { column: column.name.clone(), total_distinct, values })
    }
}

/// Splits into case-insensitive substring matches (either direction) first, then the
/// rest, truncated to `k` total (§4.2).
fn partition_by_keyword(values: Vec<ValueFrequency>, hint: &str, k: usize) -> Vec<ValueFrequency> {
    let hint_lower = hint.to_ascii_lowercase();
    let (matching, other): (Vec<_>, Vec<_>) = values.into_iter().partition(|v| {
        let value_lower = v.value.to_ascii_lowercase();
        value_lower.contains(&hint_lower) || hint_lower.contains(&value_lower)
    });

    matching.into_iter().chain(other).take(k).collect()
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn quote_qualified(qualified_name: &str) -> String {
    qualified_name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}
