//! C1: Schema Context Builder (spec §4.1). Queries `information_schema` for tables,
//! columns, and foreign keys, then per-column statistics (min/max/mean/median/null%/top
//! values, with top values gated by the `distinct_count < 1000` categorical threshold);
//! a failure building one table's statistics is logged and skipped rather than failing
//! the whole build.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value as Json;

use crate::db::SqlExecutor;

use super::errors::EngineError;
use super::types::{Column, ColumnStats, Relationship, SchemaContext, Table, ValueFrequency};

const STATS_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SchemaBuilder<'a> {
    executor: &'a dyn SqlExecutor,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(executor: &'a dyn SqlExecutor) -> Self {
        Self { executor }
    }

    /// Builds the full schema context for the connected database. Fails only if table
    /// enumeration itself fails (`UnrecoverableSchemaError`); any individual statistic
    /// that cannot be computed is recorded as missing and the build continues (§4.1).
    pub async fn build(&self) -> Result<SchemaContext, EngineError> {
        let table_names = self.list_tables().await?;
        let mut tables = Vec::with_capacity(table_names.len());

        for (schema_name, table_name) in &table_names {
            match self.build_table(schema_name, table_name).await {
                Ok(table) => tables.push(table),
                Err(e) => tracing::warn!(
                    "skipping statistics for table {}.{}: {}",
                    schema_name,
                    table_name,
                    e
                ),
            }
        }

        let tables = dedup_tables(tables);
        let relationships = self.list_relationships().await.unwrap_or_else(|e| {
            tracing::warn!("failed to load foreign key relationships: {}", e);
            Vec::new()
        });

        Ok(SchemaContext { tables, relationships, built_at: chrono::Utc::now() })
    }

    /// Rebuilds statistics for one table only, leaving the rest of a previously built
    /// context untouched (§4.1's partial-refresh allowance).
    pub async fn refresh_table(&self, ctx: &mut SchemaContext, qualified_name: &str) -> Result<(), EngineError> {
        let (schema_name, table_name) = qualified_name
            .split_once('.')
            .ok_or_else(|| EngineError::UnrecoverableSchemaError(format!("not a qualified name: {qualified_name}")))?;

        let refreshed = self.build_table(schema_name, table_name).await?;
        if let Some(slot) = ctx.tables.iter_mut().find(|t| t.qualified_name == qualified_name) {
            *slot = refreshed;
        } else {
            ctx.tables.push(refreshed);
        }
        ctx.built_at = chrono::Utc::now();
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<(String, String)>, EngineError> {
        let sql = "SELECT table_schema, table_name FROM information_schema.tables \
                   WHERE table_schema NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')";
        let result = self
            .executor
            .execute(sql, STATS_TIMEOUT)
            .await
            .map_err(|e| EngineError::UnrecoverableSchemaError(e.to_string()))?;

        Ok(result
            .rows
            .iter()
            .filter_map(|r| {
                let schema = json_str(r.get("table_schema")?)?;
                let table = json_str(r.get("table_name")?)?;
                Some((schema, table))
            })
            .collect())
    }

    async fn build_table(&self, schema_name: &str, table_name: &str) -> Result<Table, EngineError> {
        let qualified_name = format!("{schema_name}.{table_name}");
        let columns = self.list_columns(schema_name, table_name).await?;
        let row_count = self.row_count(&qualified_name).await.unwrap_or(None);
        let sample_rows = self.sample_rows(&qualified_name, 5).await.unwrap_or_default();

        let mut columns_with_stats = Vec::with_capacity(columns.len());
        for mut column in columns {
            column.stats = self.column_stats(&qualified_name, &column).await;
            columns_with_stats.push(column);
        }

        Ok(Table {
            qualified_name,
            unqualified_name: table_name.to_string(),
            row_count,
            columns: columns_with_stats,
            sample_rows,
        })
    }

    async fn list_columns(&self, schema_name: &str, table_name: &str) -> Result<Vec<Column>, EngineError> {
        let sql = format!(
            "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
             WHERE table_schema = '{schema_name}' AND table_name = '{table_name}' ORDER BY ordinal_position"
        );
        let result = self
            .executor
            .execute(&sql, STATS_TIMEOUT)
            .await
            .map_err(|e| EngineError::UnrecoverableSchemaError(e.to_string()))?;

        Ok(result
            .rows
            .iter()
            .filter_map(|r| {
                let name = json_str(r.get("column_name")?)?;
                let declared_type = json_str(r.get("data_type")?)?;
                let nullable = json_str(r.get("is_nullable")?)?.eq_ignore_ascii_case("yes");
                Some(Column { name, declared_type, nullable, stats: None })
            })
            .collect())
    }

    async fn row_count(&self, qualified_name: &str) -> Result<Option<u64>, EngineError> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quote_qualified(qualified_name));
        let result = self.executor.execute(&sql, STATS_TIMEOUT).await.map_err(|e| {
            EngineError::UnrecoverableSchemaError(e.to_string())
        })?;
        Ok(result.rows.first().and_then(|r| r.get("n")).and_then(json_u64))
    }

    async fn sample_rows(
        &self,
        qualified_name: &str,
        limit: u32,
    ) -> Result<Vec<BTreeMap<String, Json>>, EngineError> {
        let sql = format!("SELECT * FROM {} LIMIT {limit}", quote_qualified(qualified_name));
        let result = self.executor.execute(&sql, STATS_TIMEOUT).await.map_err(|e| {
            EngineError::UnrecoverableSchemaError(e.to_string())
        })?;
        Ok(result.rows)
    }

    /// Best-effort per-column statistics. Any failure collapses to `None` rather than
    /// failing the table build (§4.1).
    async fn column_stats(&self, qualified_name: &str, column: &Column) -> Option<ColumnStats> {
        let table = quote_qualified(qualified_name);
        let col = quote_ident(&column.name);
        let mut stats = ColumnStats::default();

        if column.is_numeric() {
            let sql = format!(
                "SELECT MIN({col}) AS mn, MAX({col}) AS mx, AVG({col}) AS avgv FROM {table}"
            );
            if let Ok(result) = self.executor.execute(&sql, STATS_TIMEOUT).await {
                if let Some(row) = result.rows.first() {
                    stats.min = row.get("mn").cloned();
                    stats.max = row.get("mx").cloned();
                    stats.mean = row.get("avgv").and_then(json_f64);
                }
            }
            // Approximate median via a sorted offset read; MySQL has no portable
            // PERCENTILE_CONT prior to 8.0 window functions, so this keeps it simple.
            let median_sql = format!(
                "SELECT {col} AS v FROM {table} WHERE {col} IS NOT NULL ORDER BY {col} \
                 LIMIT 1 OFFSET GREATEST((SELECT COUNT(*) FROM {table} WHERE {col} IS NOT NULL) / 2 - 1, 0)"
            );
            if let Ok(result) = self.executor.execute(&median_sql, STATS_TIMEOUT).await {
                stats.median = result.rows.first().and_then(|r| r.get("v")).and_then(json_f64);
            }
        }

        let null_sql = format!(
            "SELECT 100.0 * SUM(CASE WHEN {col} IS NULL THEN 1 ELSE 0 END) / GREATEST(COUNT(*), 1) AS pct FROM {table}"
        );
        if let Ok(result) = self.executor.execute(&null_sql, STATS_TIMEOUT).await {
            stats.null_percentage = result.rows.first().and_then(|r| r.get("pct")).and_then(json_f64);
        }

        if !column.is_numeric() {
            let distinct_sql = format!("SELECT COUNT(DISTINCT {col}) AS d FROM {table}");
            if let Ok(result) = self.executor.execute(&distinct_sql, STATS_TIMEOUT).await {
                stats.distinct_count = result.rows.first().and_then(|r| r.get("d")).and_then(json_u64);
            }

            if stats.distinct_count.is_some_and(|d| d > 0 && d < 1000) {
                let top_sql = format!(
                    "SELECT {col} AS v, COUNT(*) AS c FROM {table} WHERE {col} IS NOT NULL \
                     GROUP BY {col} ORDER BY c DESC LIMIT 5"
                );
                if let Ok(result) = self.executor.execute(&top_sql, STATS_TIMEOUT).await {
                    stats.top_values = result
                        .rows
                        .iter()
                        .filter_map(|r| {
                            let value = json_display(r.get("v")?)?;
                            let count = json_u64(r.get("c")?)?;
                            Some(ValueFrequency { value, count })
                        })
                        .collect();
                }
            }
        }

        Some(stats)
    }

    async fn list_relationships(&self) -> Result<Vec<Relationship>, EngineError> {
        let sql = "SELECT table_schema, table_name, column_name, referenced_table_schema, \
                   referenced_table_name, referenced_column_name \
                   FROM information_schema.key_column_usage \
                   WHERE referenced_table_name IS NOT NULL";
        let result = self
            .executor
            .execute(sql, STATS_TIMEOUT)
            .await
            .map_err(|e| EngineError::UnrecoverableSchemaError(e.to_string()))?;

        let mut grouped: BTreeMap<(String, String), Relationship> = BTreeMap::new();
        for row in &result.rows {
            let (Some(src_schema), Some(src_table), Some(src_col), Some(dst_schema), Some(dst_table), Some(dst_col)) = (
                row.get("table_schema").and_then(json_str),
                row.get("table_name").and_then(json_str),
                row.get("column_name").and_then(json_str),
                row.get("referenced_table_schema").and_then(json_str),
                row.get("referenced_table_name").and_then(json_str),
                row.get("referenced_column_name").and_then(json_str),
            ) else {
                continue;
            };

            let source_table = format!("{src_schema}.{src_table}");
            let target_table = format!("{dst_schema}.{dst_table}");
            let key = (source_table.clone(), target_table.clone());
            let entry = grouped.entry(key).or_insert_with(|| Relationship {
                source_table: source_table.clone(),
                source_columns: Vec::new(),
                target_table: target_table.clone(),
                target_columns: Vec::new(),
            });
            entry.source_columns.push(src_col);
            entry.target_columns.push(dst_col);
        }

        Ok(grouped.into_values().collect())
    }
}

/// Deduplicates tables by qualified name, which `list_tables` always produces uniquely
/// (one row per `(table_schema, table_name)` pair) — so this only ever collapses a table
/// that was somehow enumerated twice under the identical qualified name, never two
/// distinct tables that merely share an unqualified name across schemas (§4.1: every
/// such table must still appear in `SchemaContext` with its own columns).
fn dedup_tables(tables: Vec<Table>) -> Vec<Table> {
    let mut seen_qualified = std::collections::HashSet::new();
    let mut result = Vec::with_capacity(tables.len());
    for t in tables {
        if seen_qualified.insert(t.qualified_name.clone()) {
            result.push(t);
        }
    }
    result
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn quote_qualified(qualified_name: &str) -> String {
    qualified_name
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

fn json_str(v: &Json) -> Option<String> {
    match v {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_display(v: &Json) -> Option<String> {
    match v {
        Json::String(s) => Some(s.clone()),
        Json::Null => None,
        other => Some(other.to_string()),
    }
}

fn json_u64(v: &Json) -> Option<u64> {
    v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)).or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn json_f64(v: &Json) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_collapses_only_identical_qualified_names() {
        let t1 = Table {
            qualified_name: "public.orders".into(),
            unqualified_name: "orders".into(),
            row_count: None,
            columns: vec![],
            sample_rows: vec![],
        };
        let t2 = Table {
            qualified_name: "public.orders".into(),
            unqualified_name: "orders".into(),
            row_count: None,
            columns: vec![],
            sample_rows: vec![],
        };
        let deduped = dedup_tables(vec![t1, t2]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].qualified_name, "public.orders");
    }

    #[test]
    fn dedup_keeps_distinct_tables_sharing_an_unqualified_name() {
        let t1 = Table {
            qualified_name: "public.orders".into(),
            unqualified_name: "orders".into(),
            row_count: None,
            columns: vec![],
            sample_rows: vec![],
        };
        let t2 = Table {
            qualified_name: "archive.orders".into(),
            unqualified_name: "orders".into(),
            row_count: None,
            columns: vec![],
            sample_rows: vec![],
        };
        let deduped = dedup_tables(vec![t1, t2]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn quote_qualified_escapes_backticks() {
        assert_eq!(quote_qualified("db.my`table"), "`db`.`my``table`");
    }
}
