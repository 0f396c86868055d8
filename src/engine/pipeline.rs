//! Top-level orchestration: `Engine::process_question`, `refresh_schema`,
//! `paginate_result` (spec §6), wired together per the concurrency model in §5.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::db::{ExecutionError, RawQueryResult, SqlExecutor};
use crate::llm::LlmGateway;

use super::cache::{normalize_question_hash, ResultPage};
use super::decompose::QuestionDecomposer;
use super::errors::EngineError;
use super::planner::QueryPlanner;
use super::prompts;
use super::retry::retry_with_exploration;
use super::scorer::ResultScorer;
use super::session::{MessageLog, SessionContext, VectorMemory};
use super::sql_generator::SqlGenerator;
use super::synthesis::SynthesisComposer;
use super::types::{
    Answer, Dimension, ExecutionFailure, ExecutionResult, ScoredResult, SqlCandidate, SubQuestion,
    SubQuestionStats,
};
use super::value_explorer::ValueExplorer;
use crate::workspace::{Workspace, WorkspaceLimits};

/// Converts a raw execute() outcome into the engine's `ExecutionResult` (spec §3's
/// "ExecutionResult" attributes). Shared by the main pipeline and the retry loop.
pub(super) fn execution_result_from(
    candidate: SqlCandidate,
    outcome: Result<RawQueryResult, ExecutionError>,
) -> ExecutionResult {
    match outcome {
        Ok(raw) => {
            let row_count = raw.rows.len();
            ExecutionResult {
                candidate,
                success: true,
                rows: raw.rows,
                row_count,
                execution_time_ms: raw.execution_time_ms,
                error: None,
            }
        },
        Err(e) => ExecutionResult {
            candidate,
            success: false,
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 0,
            error: Some(ExecutionFailure { kind: e.kind, message: e.message }),
        },
    }
}

/// One sub-question's outcome, carried out of its task back to the top level.
struct SubQuestionOutcome {
    dimension: Dimension,
    scored: Vec<ScoredResult>,
    stats: SubQuestionStats,
}

pub struct Engine {
    workspaces: DashMap<String, Arc<Workspace>>,
    gateway: Arc<dyn LlmGateway>,
    memory: Arc<dyn VectorMemory>,
    message_log: Arc<dyn MessageLog>,
    default_limits: WorkspaceLimits,
}

impl Engine {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        memory: Arc<dyn VectorMemory>,
        message_log: Arc<dyn MessageLog>,
        default_limits: WorkspaceLimits,
    ) -> Self {
        Self { workspaces: DashMap::new(), gateway, memory, message_log, default_limits }
    }

    /// Registers (or replaces) the workspace backing a given id with a freshly built
    /// connection pool. Called by the thin binary's config-loading step before serving
    /// requests for that workspace.
    pub fn register_workspace(&self, workspace_id: &str, pool: mysql_async::Pool) {
        let workspace = Arc::new(Workspace::new(workspace_id, pool, self.default_limits.clone()));
        self.workspaces.insert(workspace_id.to_string(), workspace);
    }

    /// Registers a workspace backed by an arbitrary `SqlExecutor` rather than a live
    /// MySQL pool — used by integration tests to drive the pipeline against a fake.
    /// Returns the registered workspace so a test can pre-seed its schema context,
    /// skipping the `information_schema` round trips `SchemaBuilder` would otherwise run.
    pub fn register_workspace_with_executor(&self, workspace_id: &str, executor: Arc<dyn SqlExecutor>) -> Arc<Workspace> {
        let workspace = Arc::new(Workspace::with_executor(workspace_id, executor, self.default_limits.clone()));
        self.workspaces.insert(workspace_id.to_string(), workspace.clone());
        workspace
    }

    fn workspace(&self, workspace_id: &str) -> Result<Arc<Workspace>, EngineError> {
        self.workspaces
            .get(workspace_id)
            .map(|w| w.clone())
            .ok_or_else(|| EngineError::DependencyUnavailable {
                dependency: "workspace",
                reason: format!("workspace {workspace_id} is not registered"),
            })
    }

    pub async fn refresh_schema(&self, workspace_id: &str) -> Result<(), EngineError> {
        self.workspace(workspace_id)?.refresh_schema().await
    }

    pub fn paginate_result(&self, workspace_id: &str, handle: Uuid, page: usize, page_size: usize) -> Option<ResultPage> {
        let workspace = self.workspaces.get(workspace_id)?;
        workspace.pagination_cache.page(handle, page, page_size)
    }

    /// `process_question(workspace_id, session_id, question, deadline) -> Answer` (§6).
    /// Returns `Err` only for `UnrecoverableSchemaError`/`DependencyUnavailable` (§7);
    /// every other internal failure is recovered into a (possibly degraded) `Answer`.
    pub async fn process_question(
        &self,
        workspace_id: &str,
        session: &SessionContext,
        question: &str,
        deadline: Duration,
    ) -> Result<Answer, EngineError> {
        let workspace = self.workspace(workspace_id)?;
        let schema = workspace.ensure_schema().await?;

        let question_hash = normalize_question_hash(workspace_id, question);
        if let Some(cached) = workspace.query_cache.get(&question_hash) {
            return Ok(cached);
        }

        if deadline.is_zero() {
            return Ok(no_llm_calls_answer());
        }

        let mut memory_excerpt = session.memory_excerpt(self.memory.as_ref(), question, 5).await;
        if session.memory_enabled {
            let recent = self.message_log.recent_messages(&session.session_id, 5).await;
            if !recent.is_empty() {
                let recent_text =
                    recent.iter().map(|m| format!("{}: {}", m.role, m.content)).collect::<Vec<_>>().join("\n");
                if memory_excerpt.is_empty() {
                    memory_excerpt = recent_text;
                } else {
                    memory_excerpt = format!("{memory_excerpt}\n{recent_text}");
                }
            }
        }
        let schema_text = prompts::schema_text(&schema);

        let decomposer = QuestionDecomposer::new(self.gateway.as_ref());
        let sub_questions = decomposer
            .decompose(question, &schema, &memory_excerpt, workspace.limits.llm_timeout)
            .await;

        let (outcomes, truncated) =
            self.run_sub_questions(&workspace, &sub_questions, &schema_text, &schema, deadline).await;

        let mut retained = Vec::new();
        let mut stats = Vec::new();
        for outcome in outcomes {
            stats.push(outcome.stats);
            for scored in outcome.scored {
                retained.push((outcome.dimension, scored));
            }
        }

        let composer = SynthesisComposer::new(self.gateway.as_ref());
        let answer = composer
            .compose(
                question,
                &schema_text,
                retained,
                stats,
                truncated,
                workspace.limits.llm_timeout,
                &workspace.pagination_cache,
            )
            .await;

        workspace.query_cache.put(question_hash, answer.clone());
        Ok(answer)
    }

    /// Fans out across sub-questions with a `JoinSet`, racing it against the request
    /// deadline. When the deadline wins, every unfinished task is dropped (releasing its
    /// semaphore permits, §5: "holders release their slot on cancellation") but outcomes
    /// already joined survive — so a deadline firing mid-flight still yields a partial,
    /// truncated answer instead of an empty one (§8 S5).
    async fn run_sub_questions(
        &self,
        workspace: &Arc<Workspace>,
        sub_questions: &[SubQuestion],
        schema_text: &str,
        schema: &super::types::SchemaContext,
        deadline: Duration,
    ) -> (Vec<SubQuestionOutcome>, bool) {
        let mut set: JoinSet<SubQuestionOutcome> = JoinSet::new();

        for sub_question in sub_questions.iter().cloned() {
            let workspace = workspace.clone();
            let gateway = self.gateway.clone();
            let schema = schema.clone();
            let schema_text = schema_text.to_string();

            set.spawn(async move {
                process_sub_question(&workspace, gateway.as_ref(), &sub_question, &schema_text, &schema).await
            });
        }

        let mut outcomes = Vec::with_capacity(sub_questions.len());
        let sleep = tokio::time::sleep(deadline);
        tokio::pin!(sleep);
        let mut truncated = false;

        loop {
            tokio::select! {
                joined = set.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => outcomes.push(outcome),
                        Some(Err(e)) => tracing::warn!("sub-question task panicked or was cancelled: {e}"),
                        None => break,
                    }
                }
                _ = &mut sleep => {
                    truncated = true;
                    break;
                }
            }
        }

        (outcomes, truncated)
    }
}

async fn process_sub_question(
    workspace: &Arc<Workspace>,
    gateway: &dyn LlmGateway,
    sub_question: &SubQuestion,
    schema_text: &str,
    schema: &super::types::SchemaContext,
) -> SubQuestionOutcome {
    let planner = QueryPlanner::new(gateway);
    let plan = {
        let _permit = workspace.llm_permits.acquire().await.expect("semaphore never closed");
        planner.plan(&sub_question.text, schema_text, workspace.limits.llm_timeout).await
    };

    let exploration_text = explore_suggested_columns(workspace, schema, &plan.suggested_explorations, sub_question).await;

    let generator = SqlGenerator::new(gateway);
    let exact_value_columns: std::collections::HashSet<String> =
        plan.suggested_explorations.iter().cloned().collect();
    let candidates = {
        let _permit = workspace.llm_permits.acquire().await.expect("semaphore never closed");
        generator
            .generate(sub_question, schema, &exploration_text, &exact_value_columns, workspace.limits.llm_timeout, false)
            .await
    };

    // Fans candidates for this sub-question out under `db_permits` too (§5: "I/O
    // concurrently across SubQuestions and across SQLCandidates within a SubQuestion"),
    // mirroring the JoinSet pattern `run_sub_questions` uses one level up.
    let mut candidate_set: JoinSet<ExecutionResult> = JoinSet::new();
    for candidate in candidates.iter().cloned() {
        let workspace = workspace.clone();
        candidate_set.spawn(async move {
            let _permit = workspace.db_permits.acquire().await.expect("semaphore never closed");
            let outcome = workspace.executor.execute(&candidate.sql, workspace.limits.query_timeout).await;
            execution_result_from(candidate, outcome)
        });
    }

    let mut results = Vec::with_capacity(candidates.len());
    while let Some(joined) = candidate_set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::warn!("candidate execution task panicked or was cancelled: {e}"),
        }
    }

    let needs_retry = results.iter().any(|r| r.needs_retry());
    let mut retried = false;
    if needs_retry {
        let failing_sql: Vec<String> = results.iter().map(|r| r.candidate.sql.clone()).collect();
        let outcome = retry_with_exploration(
            sub_question,
            &failing_sql,
            schema,
            workspace.executor.as_ref(),
            gateway,
            workspace.limits.llm_timeout,
            workspace.limits.query_timeout,
        )
        .await;
        retried = outcome.retried;
        results.extend(outcome.results);
    }

    let candidates_generated = candidates.len();
    let scorer = ResultScorer::new(gateway);
    let scored = scorer.score_and_filter(&sub_question.text, results, workspace.limits.llm_timeout).await;

    SubQuestionOutcome {
        dimension: sub_question.dimension,
        stats: SubQuestionStats {
            dimension: sub_question.dimension,
            candidates_generated,
            candidates_retained: scored.len(),
            retried,
        },
        scored,
    }
}

/// Runs Value Explorer (C2) on each column the planner suggested, excluding numeric
/// columns, and renders the combined exploration block consumed by C6 on the first pass.
async fn explore_suggested_columns(
    workspace: &Workspace,
    schema: &super::types::SchemaContext,
    suggested: &[String],
    sub_question: &SubQuestion,
) -> String {
    if suggested.is_empty() {
        return String::new();
    }

    let explorer = ValueExplorer::new(workspace.executor.as_ref());
    let mut blocks = Vec::new();

    for column_name in suggested {
        let Some((table, column)) = schema.find_column(column_name) else { continue };
        if column.is_numeric() {
            continue;
        }
        let _permit = workspace.db_permits.acquire().await.expect("semaphore never closed");
        match explorer.explore(&table.qualified_name, column, 20, Some(&sub_question.text)).await {
            Ok(exploration) => blocks.push(exploration.render()),
            Err(e) => tracing::warn!("exploration failed for {}: {}", column_name, e),
        }
    }

    blocks.join("\n")
}

/// §8 boundary behavior: "Deadline set to zero yields the 'no answer' message and
/// performs no LLM calls."
fn no_llm_calls_answer() -> Answer {
    Answer {
        narrative: "No time was available to process this question (the request deadline \
             was zero). Please retry with a non-zero deadline."
            .to_string(),
        tables: Vec::new(),
        candidates_used: Vec::new(),
        stats: Vec::new(),
        truncated: true,
    }
}
