//! Core data model: SchemaContext, ColumnExploration, SubQuestion, QueryPlan,
//! SQLCandidate, ExecutionResult, ScoredResult, Answer.
//!
//! SchemaContext is shared per workspace and immutable after `build()`. Every other
//! type here is owned exclusively by one top-level request and dropped at its end.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// One column's observed statistics, gathered best-effort during schema analysis.
/// Any field that could not be computed is left `None` rather than failing the build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStats {
    pub min: Option<Json>,
    pub max: Option<Json>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub distinct_count: Option<u64>,
    pub null_percentage: Option<f64>,
    pub top_values: Vec<ValueFrequency>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueFrequency {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    pub stats: Option<ColumnStats>,
}

impl Column {
    /// Categorical-like: low enough cardinality that value exploration is useful.
    /// Mirrors the `distinct_count < 1000` threshold used when building statistics (§4.1).
    pub fn is_categorical(&self) -> bool {
        !self.is_numeric()
            && self
                .stats
                .as_ref()
                .and_then(|s| s.distinct_count)
                .is_some_and(|d| d < 1000)
    }

    pub fn is_numeric(&self) -> bool {
        let t = self.declared_type.to_ascii_lowercase();
        [
            "int", "integer", "bigint", "smallint", "tinyint", "decimal", "numeric", "float",
            "double", "real",
        ]
        .iter()
        .any(|n| t.contains(n))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Qualified name, e.g. `public.orders`. Preferred identity when a table is reachable
    /// under both a qualified and an unqualified name (§4.1 dedup rule).
    pub qualified_name: String,
    pub unqualified_name: String,
    pub row_count: Option<u64>,
    pub columns: Vec<Column>,
    pub sample_rows: Vec<BTreeMap<String, Json>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
}

/// The engine's immutable view of the target database, built once per workspace
/// activation and cached until an explicit refresh (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContext {
    pub tables: Vec<Table>,
    pub relationships: Vec<Relationship>,
    pub built_at: DateTime<Utc>,
}

impl SchemaContext {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.qualified_name == name || t.unqualified_name == name)
    }

    /// Every column name known anywhere in the schema, used by the SQL linter (rule 1)
    /// and by the retry loop's column-token extraction (§4.8 step 1).
    pub fn all_column_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().flat_map(|t| t.columns.iter().map(|c| c.name.as_str()))
    }

    pub fn find_column(&self, column_name: &str) -> Option<(&Table, &Column)> {
        self.tables.iter().find_map(|t| {
            t.columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(column_name))
                .map(|c| (t, c))
        })
    }

    /// Renders the two-section textual description consumed by prompts (§4.1): a
    /// compact summary followed by a detailed per-column section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("SCHEMA SUMMARY:\n");
        for t in &self.tables {
            out.push_str(&format!(
                "- {} ({} columns{})\n",
                t.qualified_name,
                t.columns.len(),
                t.row_count.map(|r| format!(", ~{r} rows")).unwrap_or_default()
            ));
        }

        out.push_str("\nDETAILED SCHEMA:\n");
        for t in &self.tables {
            out.push_str(&format!("\nTable {}:\n", t.qualified_name));
            for c in &t.columns {
                out.push_str(&format!(
                    "  {} {} {}",
                    c.name,
                    c.declared_type,
                    if c.nullable { "NULL" } else { "NOT NULL" }
                ));
                if let Some(s) = &c.stats {
                    let mut parts = Vec::new();
                    if let Some(p) = s.null_percentage {
                        parts.push(format!("null%={p:.1}"));
                    }
                    if let (Some(min), Some(max)) = (&s.min, &s.max) {
                        parts.push(format!("range=[{min}, {max}]"));
                    }
                    if let Some(mean) = s.mean {
                        parts.push(format!("mean={mean:.2}"));
                    }
                    if !s.top_values.is_empty() {
                        let top = s
                            .top_values
                            .iter()
                            .map(|v| format!("{}({})", v.value, v.count))
                            .collect::<Vec<_>>()
                            .join(", ");
                        parts.push(format!("top=[{top}]"));
                    }
                    if !parts.is_empty() {
                        out.push_str(&format!(" [{}]", parts.join(", ")));
                    }
                }
                out.push('\n');
            }
            if !t.sample_rows.is_empty() {
                out.push_str("  sample rows:\n");
                for row in t.sample_rows.iter().take(3) {
                    out.push_str(&format!("    {}\n", Json::Object(row.clone().into_iter().collect())));
                }
            }
        }

        if !self.relationships.is_empty() {
            out.push_str("\nRELATIONSHIPS:\n");
            for r in &self.relationships {
                out.push_str(&format!(
                    "  {}({}) -> {}({})\n",
                    r.source_table,
                    r.source_columns.join(", "),
                    r.target_table,
                    r.target_columns.join(", ")
                ));
            }
        }

        out
    }
}

/// Result of value-probing a single column, scoped to one question (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnExploration {
    pub column: String,
    pub total_distinct: u64,
    pub values: Vec<ValueFrequency>,
}

impl ColumnExploration {
    pub fn empty(column: &str) -> Self {
        Self { column: column.to_string(), total_distinct: 0, values: Vec::new() }
    }

    /// Renders the "COLUMN EXPLORATION RESULTS" block appended to the schema text
    /// when the retry loop re-generates SQL (§4.8 step 3).
    pub fn render(&self) -> String {
        let values = self
            .values
            .iter()
            .map(|v| format!("{} ({})", v.value, v.count))
            .collect::<Vec<_>>()
            .join(", ");
        format!("- {}: distinct={}, values=[{values}]", self.column, self.total_distinct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Supplier,
    Geographic,
    Temporal,
    Role,
    Overall,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuestion {
    pub text: String,
    pub priority: Priority,
    pub dimension: Dimension,
    /// Set when this sub-question is scoped to one entity out of a multi-entity
    /// comparison (§4.4); used by the composer to build one table row per entity.
    pub entity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub needs_multiple: bool,
    pub reasoning: String,
    pub suggested_explorations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateType {
    Aggregate,
    Grouped,
    OverallRange,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlCandidate {
    pub sql: String,
    pub description: String,
    pub candidate_type: CandidateType,
    pub enhanced_with_exploration: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Syntax,
    UnknownColumn,
    Permission,
    Timeout,
    Connection,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub candidate: SqlCandidate,
    pub success: bool,
    pub rows: Vec<BTreeMap<String, Json>>,
    pub row_count: usize,
    pub execution_time_ms: u128,
    pub error: Option<ExecutionFailure>,
}

impl ExecutionResult {
    /// Every aggregation-named column (name contains avg/sum/count/min/max/total/mean)
    /// is null in every row — one of the retry-with-exploration trigger conditions (§4.8).
    pub fn has_all_null_aggregations(&self) -> bool {
        const MARKERS: [&str; 7] = ["avg", "sum", "count", "min", "max", "total", "mean"];
        let agg_columns: Vec<&String> = self
            .rows
            .first()
            .map(|r| r.keys())
            .into_iter()
            .flatten()
            .filter(|k| {
                let lower = k.to_ascii_lowercase();
                MARKERS.iter().any(|m| lower.contains(m))
            })
            .collect();

        if agg_columns.is_empty() || self.rows.is_empty() {
            return false;
        }

        self.rows.iter().all(|row| {
            agg_columns
                .iter()
                .all(|col| matches!(row.get(*col), None | Some(Json::Null)))
        })
    }

    pub fn needs_retry(&self) -> bool {
        if !self.success {
            return matches!(
                self.error.as_ref().map(|e| e.kind),
                Some(ExecutionErrorKind::Syntax) | Some(ExecutionErrorKind::UnknownColumn)
            );
        }
        self.row_count == 0 || self.has_all_null_aggregations()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
    pub result: ExecutionResult,
    pub quality_score: u8,
    pub reasoning: String,
    pub key_insights: Vec<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerTable {
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Json>>,
    /// Handle into the workspace's pagination cache for this dimension's full row set
    /// (spec §6's `paginate_result`); `rows` above is only the inline preview sample.
    pub table_id: uuid::Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuestionStats {
    pub dimension: Dimension,
    pub candidates_generated: usize,
    pub candidates_retained: usize,
    pub retried: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub narrative: String,
    pub tables: Vec<AnswerTable>,
    pub candidates_used: Vec<SqlCandidate>,
    pub stats: Vec<SubQuestionStats>,
    pub truncated: bool,
}
