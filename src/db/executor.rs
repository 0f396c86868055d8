//! SQL execution against a pooled tenant-database connection, with row normalization
//! and failure-mode classification (spec §4.7). Generalized behind the `SqlExecutor`
//! trait so the engine can be driven by a scripted fake in tests.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use mysql_async::{Pool, prelude::Queryable};
use serde_json::Value as Json;

use crate::engine::types::ExecutionErrorKind;

#[derive(Debug, Clone)]
pub struct RawQueryResult {
    pub rows: Vec<BTreeMap<String, Json>>,
    pub execution_time_ms: u128,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

/// The engine's only dependency on a concrete tenant database. `execute_tx` exists for
/// the out-of-scope edit flow (spec §6) and is never called by the read-only core.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<RawQueryResult, ExecutionError>;

    async fn execute_tx(
        &self,
        statements: &[String],
        timeout: Duration,
    ) -> Result<Vec<RawQueryResult>, ExecutionError>;
}

pub struct MySqlExecutor {
    pool: Pool,
}

impl MySqlExecutor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn is_write_statement(sql: &str) -> bool {
        const WRITE_VERBS: [&str; 8] =
            ["INSERT", "UPDATE", "DELETE", "ALTER", "DROP", "CREATE", "TRUNCATE", "REPLACE"];
        let first_word = sql.trim_start().split_whitespace().next().unwrap_or("").to_ascii_uppercase();
        WRITE_VERBS.contains(&first_word.as_str())
    }
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<RawQueryResult, ExecutionError> {
        let start = std::time::Instant::now();
        let pool = self.pool.clone();
        let sql_owned = sql.to_string();
        let is_write = Self::is_write_statement(sql);

        let fut = async move {
            let mut conn = pool.get_conn().await.map_err(classify_mysql_error)?;
            let rows: Vec<mysql_async::Row> =
                conn.query(&sql_owned).await.map_err(classify_mysql_error)?;
            if is_write {
                // Read-only queries never commit; a write verb commits after the statement.
                // mysql_async autocommits outside an explicit transaction, so nothing further
                // is needed here beyond letting `conn` drop.
            }
            drop(conn);
            Ok(normalize_rows(rows))
        };

        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(rows)) => {
                Ok(RawQueryResult { rows, execution_time_ms: start.elapsed().as_millis() })
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ExecutionError {
                kind: ExecutionErrorKind::Timeout,
                message: format!("query exceeded {timeout:?}"),
            }),
        }
    }

    async fn execute_tx(
        &self,
        statements: &[String],
        timeout: Duration,
    ) -> Result<Vec<RawQueryResult>, ExecutionError> {
        let pool = self.pool.clone();
        let statements = statements.to_vec();

        let fut = async move {
            let mut conn = pool.get_conn().await.map_err(classify_mysql_error)?;
            let mut tx = conn
                .start_transaction(mysql_async::TxOpts::default())
                .await
                .map_err(classify_mysql_error)?;

            let mut results = Vec::with_capacity(statements.len());
            for sql in &statements {
                let start = std::time::Instant::now();
                let rows: Vec<mysql_async::Row> = tx.query(sql).await.map_err(classify_mysql_error)?;
                results.push(RawQueryResult {
                    rows: normalize_rows(rows),
                    execution_time_ms: start.elapsed().as_millis(),
                });
            }
            tx.commit().await.map_err(classify_mysql_error)?;
            Ok(results)
        };

        match tokio::time::timeout(timeout, fut).await {
            Ok(inner) => inner,
            Err(_) => Err(ExecutionError {
                kind: ExecutionErrorKind::Timeout,
                message: format!("transaction exceeded {timeout:?}"),
            }),
        }
    }
}

fn classify_mysql_error(err: mysql_async::Error) -> ExecutionError {
    use mysql_async::Error as E;

    let kind = match &err {
        E::Server(server_err) => match server_err.code {
            1064 | 1149 => ExecutionErrorKind::Syntax,
            1054 | 1052 => ExecutionErrorKind::UnknownColumn,
            1044 | 1045 | 1142 | 1143 => ExecutionErrorKind::Permission,
            _ => ExecutionErrorKind::Other,
        },
        E::Io(_) | E::Driver(_) => ExecutionErrorKind::Connection,
        _ => ExecutionErrorKind::Other,
    };

    ExecutionError { kind, message: err.to_string() }
}

/// Converts raw MySQL rows into JSON-safe mappings: arbitrary-precision decimals
/// (returned as byte strings by the driver) become numbers where parseable, dates
/// become ISO-8601 strings, and intervals become a structured form preserving total
/// seconds and components (spec §4.7, Executor invariant).
fn normalize_rows(rows: Vec<mysql_async::Row>) -> Vec<BTreeMap<String, Json>> {
    rows.iter()
        .map(|row| {
            let mut map = BTreeMap::new();
            for (idx, col) in row.columns_ref().iter().enumerate() {
                let value = row.as_ref(idx).cloned().unwrap_or(mysql_async::Value::NULL);
                map.insert(col.name_str().to_string(), value_to_json(value));
            }
            map
        })
        .collect()
}

fn value_to_json(value: mysql_async::Value) -> Json {
    use mysql_async::Value;

    match value {
        Value::NULL => Json::Null,
        Value::Int(i) => Json::Number(i.into()),
        Value::UInt(u) => Json::Number(u.into()),
        Value::Float(f) => serde_json::Number::from_f64(f as f64).map(Json::Number).unwrap_or(Json::Null),
        Value::Double(d) => serde_json::Number::from_f64(d).map(Json::Number).unwrap_or(Json::Null),
        Value::Bytes(bytes) => {
            let s = String::from_utf8_lossy(&bytes).into_owned();
            // DECIMAL columns arrive as byte strings; fold them into numbers so the
            // row stays JSON-safe per the "decimals -> float" invariant.
            if let Ok(i) = s.parse::<i64>() {
                Json::Number(i.into())
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::Number::from_f64(f).map(Json::Number).unwrap_or(Json::String(s))
            } else {
                Json::String(s)
            }
        },
        Value::Date(year, month, day, hour, minute, second, micro) => Json::String(format!(
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}Z"
        )),
        Value::Time(neg, days, hours, minutes, seconds, micro) => {
            let total_seconds = (days as i64 * 86_400
                + hours as i64 * 3_600
                + minutes as i64 * 60
                + seconds as i64)
                * if neg { -1 } else { 1 };
            serde_json::json!({
                "total_seconds": total_seconds,
                "days": days,
                "hours": hours,
                "minutes": minutes,
                "seconds": seconds,
                "microseconds": micro,
                "negative": neg,
            })
        },
    }
}
