//! End-to-end scenarios driving `Engine::process_question` against scripted fakes for
//! `LlmGateway` and `SqlExecutor` — no network or database access (spec §8, SPEC_FULL.md's
//! test tooling note). Each fake dispatches on the distinctive wording of the system prompt
//! for the gateway, and on a SQL substring for the executor, so a test reads as "when the
//! LLM says X and the database returns Y, the pipeline produces Z."

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;

use analytical_query_engine::db::{ExecutionError, RawQueryResult, SqlExecutor};
use analytical_query_engine::engine::session::{MessageLog, NullMessageLog, NullVectorMemory, SessionContext, VectorMemory};
use analytical_query_engine::engine::types::{Column, ColumnStats, ExecutionErrorKind, SchemaContext, Table, ValueFrequency};
use analytical_query_engine::llm::{ChatMessage, GatewayError, LlmGateway};
use analytical_query_engine::{Engine, WorkspaceLimits};

/// One stage's canned responses, consumed in order and then repeated from the last entry
/// so a test doesn't have to guess exactly how many times a sub-question fan-out will call
/// back into the same stage.
struct StageScript {
    queue: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl StageScript {
    fn new(responses: &[&str]) -> Self {
        Self { queue: Mutex::new(responses.iter().map(|s| s.to_string()).collect()), calls: AtomicUsize::new(0) }
    }

    fn empty() -> Self {
        Self::new(&["{}"])
    }

    fn next(&self) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut q = self.queue.lock().expect("script mutex poisoned");
        if q.len() > 1 { q.pop_front().unwrap() } else { q.front().cloned().unwrap_or_default() }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Routes each `invoke` call to the stage whose system prompt wording matches, per the
/// distinctive phrasing each prompt builder in `engine::prompts` uses.
struct ScriptedGateway {
    decompose: StageScript,
    planning: StageScript,
    sql: StageScript,
    scoring: StageScript,
    synthesis: StageScript,
    fail_scoring: bool,
}

impl ScriptedGateway {
    fn untouched() -> Self {
        Self {
            decompose: StageScript::empty(),
            planning: StageScript::empty(),
            sql: StageScript::empty(),
            scoring: StageScript::empty(),
            synthesis: StageScript::empty(),
            fail_scoring: false,
        }
    }

    fn total_calls(&self) -> usize {
        self.decompose.call_count()
            + self.planning.call_count()
            + self.sql.call_count()
            + self.scoring.call_count()
            + self.synthesis.call_count()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn invoke(&self, messages: &[ChatMessage], _timeout: Duration) -> Result<String, GatewayError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        if system.contains("decompose a business question") {
            Ok(self.decompose.next())
        } else if system.contains("needs multiple distinct queries") {
            Ok(self.planning.next())
        } else if system.contains("SQL candidates for MySQL") {
            Ok(self.sql.next())
        } else if system.contains("score each executed query result") {
            if self.fail_scoring {
                self.scoring.calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Api("scoring endpoint unavailable".to_string()))
            } else {
                Ok(self.scoring.next())
            }
        } else if system.contains("final narrative answer") {
            Ok(self.synthesis.next())
        } else {
            Err(GatewayError::Api("test fake received an unrecognized prompt".to_string()))
        }
    }
}

type Responder = Box<dyn Fn(&str) -> Option<Result<RawQueryResult, ExecutionError>> + Send + Sync>;

/// Matches the executed SQL against substrings registered via `on_contains`/`on_fail`, in
/// registration order; unmatched SQL gets an empty success result.
struct ScriptedExecutor {
    responders: Mutex<Vec<Responder>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    fn new() -> Self {
        Self { responders: Mutex::new(Vec::new()), calls: AtomicUsize::new(0) }
    }

    fn on_contains(self, needle: &'static str, rows: Vec<BTreeMap<String, Json>>) -> Self {
        self.responders.lock().unwrap().push(Box::new(move |sql: &str| {
            sql.contains(needle).then(|| Ok(RawQueryResult { rows: rows.clone(), execution_time_ms: 1 }))
        }));
        self
    }

    fn on_fail(self, needle: &'static str, kind: ExecutionErrorKind, message: &'static str) -> Self {
        self.responders.lock().unwrap().push(Box::new(move |sql: &str| {
            sql.contains(needle).then(|| Err(ExecutionError { kind, message: message.to_string() }))
        }));
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str, _timeout: Duration) -> Result<RawQueryResult, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for responder in self.responders.lock().unwrap().iter() {
            if let Some(result) = responder(sql) {
                return result;
            }
        }
        Ok(RawQueryResult { rows: Vec::new(), execution_time_ms: 1 })
    }

    async fn execute_tx(&self, _statements: &[String], _timeout: Duration) -> Result<Vec<RawQueryResult>, ExecutionError> {
        unimplemented!("the read-only pipeline under test never calls execute_tx")
    }
}

fn row(pairs: &[(&str, Json)]) -> BTreeMap<String, Json> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// A single `public.contracts` table with a numeric rate column and a low-cardinality
/// categorical role column, enough to exercise linting, value exploration, and scoring.
fn test_schema() -> SchemaContext {
    SchemaContext {
        tables: vec![Table {
            qualified_name: "public.contracts".into(),
            unqualified_name: "contracts".into(),
            row_count: Some(500),
            columns: vec![
                Column { name: "hourly_rate_in_usd".into(), declared_type: "decimal".into(), nullable: true, stats: None },
                Column {
                    name: "normalized_role_title".into(),
                    declared_type: "varchar".into(),
                    nullable: true,
                    stats: Some(ColumnStats {
                        distinct_count: Some(2),
                        top_values: vec![
                            ValueFrequency { value: "BI Developer".into(), count: 10 },
                            ValueFrequency { value: "Backend Engineer".into(), count: 5 },
                        ],
                        ..Default::default()
                    }),
                },
                Column { name: "country_of_work".into(), declared_type: "varchar".into(), nullable: true, stats: None },
            ],
            sample_rows: vec![],
        }],
        relationships: vec![],
        built_at: chrono::Utc::now(),
    }
}

async fn build_engine(gateway: Arc<dyn LlmGateway>, executor: Arc<dyn SqlExecutor>) -> Arc<Engine> {
    let memory: Arc<dyn VectorMemory> = Arc::new(NullVectorMemory);
    let message_log: Arc<dyn MessageLog> = Arc::new(NullMessageLog);
    let engine = Arc::new(Engine::new(gateway, memory, message_log, WorkspaceLimits::default()));
    let workspace = engine.register_workspace_with_executor("ws1", executor);
    *workspace.schema.write().await = Some(test_schema());
    engine
}

#[tokio::test]
async fn happy_path_produces_narrative_and_paginated_table() {
    let gateway = Arc::new(ScriptedGateway {
        decompose: StageScript::new(&[
            r#"{"questions": [{"question": "What is the average hourly rate by role?", "priority": "high"}]}"#,
        ]),
        planning: StageScript::new(&[
            r#"{"needs_multiple_queries": false, "reasoning": "one grouped query suffices", "suggested_explorations": []}"#,
        ]),
        sql: StageScript::new(&[
            r#"{"queries": [{"sql": "SELECT normalized_role_title, AVG(hourly_rate_in_usd) AS avg_rate FROM contracts GROUP BY normalized_role_title", "description": "Average rate by role", "type": "grouped"}]}"#,
        ]),
        scoring: StageScript::new(&[
            r#"{"scores": [{"score": 80, "reasoning": "clear breakdown by role", "key_insights": ["BI roles command a premium"]}]}"#,
        ]),
        synthesis: StageScript::new(&["The average hourly rate ranges from about $38 to $55 depending on role."]),
        fail_scoring: false,
    });
    let executor = Arc::new(ScriptedExecutor::new().on_contains(
        "AVG(hourly_rate_in_usd)",
        vec![
            row(&[("normalized_role_title", Json::String("BI Developer".into())), ("avg_rate", serde_json::json!(42.5))]),
            row(&[("normalized_role_title", Json::String("Backend Engineer".into())), ("avg_rate", serde_json::json!(55.0))]),
            row(&[("normalized_role_title", Json::String("Data Analyst".into())), ("avg_rate", serde_json::json!(38.0))]),
        ],
    ));

    let engine = build_engine(gateway, executor).await;
    let session = SessionContext::new("session-1", false);
    let answer = engine
        .process_question("ws1", &session, "What's the going hourly rate by role?", Duration::from_secs(5))
        .await
        .unwrap();

    assert!(answer.narrative.contains("ranges from about $38 to $55"));
    assert!(!answer.truncated);
    assert_eq!(answer.stats.len(), 1);
    assert_eq!(answer.stats[0].candidates_retained, 1);
    assert_eq!(answer.tables.len(), 1);
    assert_eq!(answer.tables[0].rows.len(), 3);

    // The inline table is backed by a pagination handle serving the same full row set.
    let handle = answer.tables[0].table_id;
    let page = engine.paginate_result("ws1", handle, 0, 10).expect("table handle should be registered");
    assert_eq!(page.total_rows, 3);
    assert_eq!(page.rows.len(), 3);
}

#[tokio::test]
async fn zero_deadline_yields_no_llm_calls_answer() {
    let gateway = Arc::new(ScriptedGateway::untouched());
    let executor = Arc::new(ScriptedExecutor::new());
    let engine = build_engine(gateway.clone(), executor.clone()).await;

    let session = SessionContext::new("session-1", false);
    let answer = engine.process_question("ws1", &session, "anything at all", Duration::ZERO).await.unwrap();

    assert!(answer.narrative.to_ascii_lowercase().contains("deadline was zero"));
    assert!(answer.truncated);
    assert!(answer.tables.is_empty());
    assert_eq!(gateway.total_calls(), 0);
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn repeated_question_is_served_from_the_query_cache() {
    let gateway = Arc::new(ScriptedGateway {
        decompose: StageScript::new(&[r#"{"questions": [{"question": "What is the average hourly rate?", "priority": "high"}]}"#]),
        planning: StageScript::new(&[
            r#"{"needs_multiple_queries": false, "reasoning": "simple aggregate", "suggested_explorations": []}"#,
        ]),
        sql: StageScript::new(&[
            r#"{"queries": [{"sql": "SELECT AVG(hourly_rate_in_usd) AS avg_rate FROM contracts", "description": "Overall average rate", "type": "aggregate"}]}"#,
        ]),
        scoring: StageScript::new(&[r#"{"scores": [{"score": 90, "reasoning": "single clean aggregate", "key_insights": []}]}"#]),
        synthesis: StageScript::new(&["The overall average hourly rate sits around $45."]),
        fail_scoring: false,
    });
    let executor = Arc::new(ScriptedExecutor::new().on_contains(
        "AVG(hourly_rate_in_usd)",
        vec![
            row(&[("avg_rate", serde_json::json!(45.0))]),
            row(&[("avg_rate", serde_json::json!(46.0))]),
            row(&[("avg_rate", serde_json::json!(44.0))]),
        ],
    ));

    let engine = build_engine(gateway, executor.clone()).await;
    let session = SessionContext::new("session-1", false);
    let question = "What's the overall average hourly rate?";

    let first = engine.process_question("ws1", &session, question, Duration::from_secs(5)).await.unwrap();
    let calls_after_first = executor.call_count();
    assert!(calls_after_first > 0);

    let second = engine.process_question("ws1", &session, question, Duration::from_secs(5)).await.unwrap();
    assert_eq!(second.narrative, first.narrative);
    assert_eq!(executor.call_count(), calls_after_first, "a cache hit must not re-run any query");
}

#[tokio::test]
async fn retry_with_exploration_recovers_from_an_empty_first_pass() {
    let gateway = Arc::new(ScriptedGateway {
        decompose: StageScript::new(&[
            r#"{"questions": [{"question": "How does the average rate compare across roles?", "priority": "high"}]}"#,
        ]),
        planning: StageScript::new(&[
            r#"{"needs_multiple_queries": false, "reasoning": "single filtered aggregate", "suggested_explorations": []}"#,
        ]),
        sql: StageScript::new(&[
            r#"{"queries": [{"sql": "SELECT AVG(hourly_rate_in_usd) AS avg_rate FROM contracts WHERE normalized_role_title = 'Archived Role'", "description": "Average rate for archived role", "type": "aggregate"}]}"#,
            r#"{"queries": [{"sql": "SELECT AVG(hourly_rate_in_usd) AS avg_rate FROM contracts WHERE normalized_role_title = 'BI Developer'", "description": "Average rate for BI Developer", "type": "aggregate"}]}"#,
        ]),
        scoring: StageScript::new(&[
            r#"{"scores": [{"score": 10, "reasoning": "no rows matched", "key_insights": []}, {"score": 85, "reasoning": "clean single-entity result", "key_insights": ["BI Developer rate is above the archived-role baseline"]}]}"#,
        ]),
        synthesis: StageScript::new(&["BI Developer contracts command a higher hourly rate than the archived baseline."]),
        fail_scoring: false,
    });
    let executor = Arc::new(
        ScriptedExecutor::new()
            .on_contains("normalized_role_title = 'Archived Role'", vec![])
            .on_contains("COUNT(DISTINCT `normalized_role_title`)", vec![row(&[("d", serde_json::json!(2))])])
            .on_contains(
                "AS v, COUNT(*) AS c",
                vec![
                    row(&[("v", Json::String("BI Developer".into())), ("c", serde_json::json!(10))]),
                    row(&[("v", Json::String("Backend Engineer".into())), ("c", serde_json::json!(5))]),
                ],
            )
            .on_contains("normalized_role_title = 'BI Developer'", vec![row(&[("avg_rate", serde_json::json!(52.0))])]),
    );

    let engine = build_engine(gateway, executor).await;
    let session = SessionContext::new("session-1", false);
    let answer = engine
        .process_question("ws1", &session, "How does the rate for BI roles compare to archived roles?", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(answer.stats.len(), 1);
    assert!(answer.stats[0].retried, "a zero-row first pass must trigger the retry-with-exploration loop");
    assert_eq!(answer.stats[0].candidates_retained, 1);
    assert!(!answer.narrative.is_empty());
}

#[tokio::test]
async fn scoring_outage_falls_back_to_the_default_score_formula() {
    let gateway = Arc::new(ScriptedGateway {
        decompose: StageScript::new(&[r#"{"questions": [{"question": "What is the average hourly rate by role?", "priority": "high"}]}"#]),
        planning: StageScript::new(&[
            r#"{"needs_multiple_queries": false, "reasoning": "one grouped query suffices", "suggested_explorations": []}"#,
        ]),
        sql: StageScript::new(&[
            r#"{"queries": [{"sql": "SELECT normalized_role_title, AVG(hourly_rate_in_usd) AS avg_rate FROM contracts GROUP BY normalized_role_title", "description": "Average rate by role", "type": "grouped"}]}"#,
        ]),
        scoring: StageScript::empty(),
        synthesis: StageScript::new(&["Rates vary by role, roughly $38 to $55 across the three roles covered here."]),
        fail_scoring: true,
    });
    let executor = Arc::new(ScriptedExecutor::new().on_contains(
        "AVG(hourly_rate_in_usd)",
        vec![
            row(&[("normalized_role_title", Json::String("BI Developer".into())), ("avg_rate", serde_json::json!(42.5))]),
            row(&[("normalized_role_title", Json::String("Backend Engineer".into())), ("avg_rate", serde_json::json!(55.0))]),
            row(&[("normalized_role_title", Json::String("Data Analyst".into())), ("avg_rate", serde_json::json!(38.0))]),
        ],
    ));

    let engine = build_engine(gateway, executor).await;
    let session = SessionContext::new("session-1", false);
    let answer = engine
        .process_question("ws1", &session, "What's the average hourly rate by role?", Duration::from_secs(5))
        .await
        .unwrap();

    // default_score = min(50 + row_count, 100) = 53 for a 3-row result: below the 60
    // threshold but above the 30 fallback, so the result is still retained and answered.
    assert_eq!(answer.stats[0].candidates_retained, 1);
    assert_eq!(answer.tables.len(), 1);
    assert!(!answer.narrative.is_empty());
}

/// Routes on the human message (which always carries the sub-question text, per
/// `engine::prompts`) rather than a shared queue, so two sub-questions running
/// concurrently in the same `JoinSet` each get their own canned SQL deterministically
/// regardless of which one's task happens to reach the gateway first.
struct MultiEntityGateway {
    sql_calls: AtomicUsize,
}

#[async_trait]
impl LlmGateway for MultiEntityGateway {
    async fn invoke(&self, messages: &[ChatMessage], _timeout: Duration) -> Result<String, GatewayError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        let human = messages.get(1).map(|m| m.content.as_str()).unwrap_or_default();

        if system.contains("decompose a business question") {
            Ok(r#"{"questions": [
                {"question": "What is the average hourly rate for India contracts?", "priority": "high"},
                {"question": "What is the average hourly rate for USA contracts?", "priority": "high"}
            ]}"#
                .to_string())
        } else if system.contains("needs multiple distinct queries") {
            Ok(r#"{"needs_multiple_queries": false, "reasoning": "single per-entity aggregate", "suggested_explorations": []}"#
                .to_string())
        } else if system.contains("SQL candidates for MySQL") {
            self.sql_calls.fetch_add(1, Ordering::SeqCst);
            if human.contains("India") {
                Ok(r#"{"queries": [{"sql": "SELECT AVG(hourly_rate_in_usd) AS avg_rate FROM contracts WHERE country_of_work = 'India'", "description": "Average rate in India", "type": "aggregate"}]}"#.to_string())
            } else {
                Ok(r#"{"queries": [{"sql": "SELECT AVG(hourly_rate_in_usd) AS avg_rate FROM contracts WHERE country_of_work = 'USA'", "description": "Average rate in USA", "type": "aggregate"}]}"#.to_string())
            }
        } else if system.contains("score each executed query result") {
            Ok(r#"{"scores": [{"score": 85, "reasoning": "single clean per-entity result", "key_insights": []}]}"#
                .to_string())
        } else if system.contains("final narrative answer") {
            Ok("India averages about $40/hr and USA averages about $50/hr.".to_string())
        } else {
            Err(GatewayError::Api("test fake received an unrecognized prompt".to_string()))
        }
    }
}

#[tokio::test]
async fn multi_entity_comparison_issues_one_query_per_entity_without_an_in_list() {
    let gateway = Arc::new(MultiEntityGateway { sql_calls: AtomicUsize::new(0) });
    let executor = Arc::new(
        ScriptedExecutor::new()
            .on_contains("country_of_work = 'India'", vec![row(&[("avg_rate", serde_json::json!(40.0))])])
            .on_contains("country_of_work = 'USA'", vec![row(&[("avg_rate", serde_json::json!(50.0))])]),
    );

    let engine = build_engine(gateway.clone(), executor).await;
    let session = SessionContext::new("session-1", false);
    let answer = engine
        .process_question("ws1", &session, "Compare the average hourly rate between India and USA contracts", Duration::from_secs(5))
        .await
        .unwrap();

    // Two sub-questions, each answered by its own per-entity query -- never a single
    // query combining both entities with an IN list (§4.4, §4.6).
    assert_eq!(gateway.sql_calls.load(Ordering::SeqCst), 2);
    assert_eq!(answer.stats.len(), 2);
    assert_eq!(answer.stats.iter().map(|s| s.candidates_retained).sum::<usize>(), 2);
    assert!(!answer.truncated);
    assert!(!answer.narrative.is_empty());
}

/// A gateway whose planning call for one entity sleeps past the deadline; the other
/// entity answers immediately. Used to drive S5: the deadline firing mid-flight must
/// still preserve the sub-question that already finished rather than discarding it.
struct DelayedEntityGateway {
    slow_marker: &'static str,
    delay: Duration,
    slow_sql_calls: AtomicUsize,
}

#[async_trait]
impl LlmGateway for DelayedEntityGateway {
    async fn invoke(&self, messages: &[ChatMessage], _timeout: Duration) -> Result<String, GatewayError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        let human = messages.get(1).map(|m| m.content.as_str()).unwrap_or_default();
        let is_slow = human.contains(self.slow_marker);

        if system.contains("decompose a business question") {
            Ok(format!(
                r#"{{"questions": [
                    {{"question": "What is the average hourly rate for fast contracts?", "priority": "high"}},
                    {{"question": "What is the average hourly rate for {} contracts?", "priority": "high"}}
                ]}}"#,
                self.slow_marker
            ))
        } else if system.contains("needs multiple distinct queries") {
            if is_slow {
                tokio::time::sleep(self.delay).await;
            }
            Ok(r#"{"needs_multiple_queries": false, "reasoning": "single aggregate", "suggested_explorations": []}"#
                .to_string())
        } else if system.contains("SQL candidates for MySQL") {
            if is_slow {
                self.slow_sql_calls.fetch_add(1, Ordering::SeqCst);
                Ok(r#"{"queries": [{"sql": "SELECT AVG(hourly_rate_in_usd) AS avg_rate FROM contracts WHERE country_of_work = 'Slow'", "description": "slow", "type": "aggregate"}]}"#.to_string())
            } else {
                Ok(r#"{"queries": [{"sql": "SELECT AVG(hourly_rate_in_usd) AS avg_rate FROM contracts WHERE country_of_work = 'Fast'", "description": "fast", "type": "aggregate"}]}"#.to_string())
            }
        } else if system.contains("score each executed query result") {
            Ok(r#"{"scores": [{"score": 90, "reasoning": "clean aggregate", "key_insights": []}]}"#.to_string())
        } else if system.contains("final narrative answer") {
            Ok("Fast contracts average about $45 per hour.".to_string())
        } else {
            Err(GatewayError::Api("test fake received an unrecognized prompt".to_string()))
        }
    }
}

#[tokio::test]
async fn deadline_expiring_mid_flight_keeps_already_completed_sub_questions() {
    let gateway = Arc::new(DelayedEntityGateway {
        slow_marker: "Backlogged",
        delay: Duration::from_millis(200),
        slow_sql_calls: AtomicUsize::new(0),
    });
    let executor = Arc::new(
        ScriptedExecutor::new()
            .on_contains("country_of_work = 'Fast'", vec![row(&[("avg_rate", serde_json::json!(45.0))])])
            .on_contains("country_of_work = 'Slow'", vec![row(&[("avg_rate", serde_json::json!(60.0))])]),
    );

    let engine = build_engine(gateway.clone(), executor).await;
    let session = SessionContext::new("session-1", false);
    let answer = engine
        .process_question("ws1", &session, "Compare fast and backlogged contract rates", Duration::from_millis(30))
        .await
        .unwrap();

    assert!(answer.truncated, "a deadline firing mid-flight must mark the answer truncated");
    assert!(answer.narrative.to_ascii_lowercase().contains("partial results"));
    assert_eq!(answer.stats.len(), 1, "only the sub-question that finished before the deadline should survive");
    assert_eq!(answer.stats[0].candidates_retained, 1);
    // The slow sub-question's planning call never returns before the deadline fires, so
    // it must never reach SQL generation -- proving the cancellation actually happened
    // rather than the slow branch quietly finishing anyway.
    assert_eq!(gateway.slow_sql_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unanswerable_question_yields_the_apology_narrative() {
    let gateway = Arc::new(ScriptedGateway {
        decompose: StageScript::new(&[r#"{"questions": [{"question": "What is the average rate for a role that doesn't exist?", "priority": "high"}]}"#]),
        planning: StageScript::new(&[
            r#"{"needs_multiple_queries": false, "reasoning": "simple aggregate", "suggested_explorations": []}"#,
        ]),
        sql: StageScript::new(&[
            r#"{"queries": [{"sql": "SELECT AVG(hourly_rate_in_usd) AS avg_rate FROM contracts WHERE country_of_work = 'Atlantis'", "description": "Average rate in Atlantis", "type": "aggregate"}]}"#,
        ]),
        scoring: StageScript::empty(),
        synthesis: StageScript::empty(),
        fail_scoring: false,
    });
    let executor = Arc::new(ScriptedExecutor::new().on_fail(
        "country_of_work = 'Atlantis'",
        ExecutionErrorKind::Permission,
        "access denied for this column",
    ));

    let engine = build_engine(gateway.clone(), executor).await;
    let session = SessionContext::new("session-1", false);
    let answer = engine
        .process_question("ws1", &session, "What's the average rate in a country we don't operate in?", Duration::from_secs(5))
        .await
        .unwrap();

    assert!(answer.tables.is_empty());
    assert!(answer.candidates_used.is_empty());
    assert!(answer.narrative.to_ascii_lowercase().contains("couldn't find"));
    // A permission failure isn't retryable and yields no successes, so scoring and
    // synthesis are never invoked for this sub-question.
    assert_eq!(gateway.scoring.call_count(), 0);
    assert_eq!(gateway.synthesis.call_count(), 0);
}
