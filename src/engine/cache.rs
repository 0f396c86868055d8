//! §4.11 Query Cache and §4.12 Result Pagination Cache — both workspace-scoped, neither
//! a process-wide global, per the REDESIGN FLAG against "global mutable caches" (spec §9).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use super::types::Answer;

/// Normalizes a question for cache-key purposes: lowercase, collapsed whitespace. Two
/// questions differing only in case or spacing share a cache entry.
pub fn normalize_question_hash(workspace_id: &str, question: &str) -> String {
    let normalized: String = question.to_ascii_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = DefaultHasher::new();
    workspace_id.hash(&mut hasher);
    normalized.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Keyed by `(workspace_id, normalized_question_hash)` collapsed into one string key,
/// since the cache itself is already constructed one-per-workspace (§4.11).
#[derive(Default)]
pub struct QueryCache {
    entries: DashMap<String, Answer>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, question_hash: &str) -> Option<Answer> {
        self.entries.get(question_hash).map(|e| e.clone())
    }

    /// Last-writer-wins (§4.11); no compare-and-swap is needed since a stale overwrite
    /// only costs one recomputation, never correctness.
    pub fn put(&self, question_hash: String, answer: Answer) {
        self.entries.insert(question_hash, answer);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }
}

struct PaginationEntry {
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
    columns: Vec<String>,
    created_at: Instant,
}

/// A page of a cached table result, returned by `paginate_result` (spec §6).
#[derive(Debug, Clone)]
pub struct ResultPage {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub page: usize,
    pub page_size: usize,
    pub total_rows: usize,
}

/// Bounded, TTL'd table handle -> row set map (§4.12). Entries are swept lazily on
/// access rather than with a background task, avoiding the "background-task leak on
/// cancellation" pitfall the REDESIGN FLAGS call out for fan-out work generally.
pub struct PaginationCache {
    entries: DashMap<Uuid, PaginationEntry>,
    ttl: Duration,
}

impl PaginationCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn register(&self, columns: Vec<String>, rows: Vec<serde_json::Map<String, serde_json::Value>>) -> Uuid {
        let handle = Uuid::new_v4();
        self.entries.insert(handle, PaginationEntry { rows, columns, created_at: Instant::now() });
        handle
    }

    pub fn page(&self, handle: Uuid, page: usize, page_size: usize) -> Option<ResultPage> {
        let entry = self.entries.get(&handle)?;
        if entry.created_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&handle);
            return None;
        }

        let start = page.saturating_mul(page_size);
        let rows = entry.rows.iter().skip(start).take(page_size).cloned().collect();

        Some(ResultPage { columns: entry.columns.clone(), rows, page, page_size, total_rows: entry.rows.len() })
    }

    /// Drops every entry whose TTL has elapsed; called opportunistically by the session
    /// owning this cache when it expires (§4.12, "entries expire with the owning session").
    pub fn sweep_expired(&self) {
        self.entries.retain(|_, entry| entry.created_at.elapsed() <= self.ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_case_and_whitespace_insensitive() {
        let a = normalize_question_hash("ws1", "What is  the AVERAGE rate?");
        let b = normalize_question_hash("ws1", "what is the average rate?");
        assert_eq!(a, b);
    }

    #[test]
    fn different_workspaces_do_not_collide() {
        let a = normalize_question_hash("ws1", "same question");
        let b = normalize_question_hash("ws2", "same question");
        assert_ne!(a, b);
    }

    #[test]
    fn pagination_returns_correct_slice() {
        let cache = PaginationCache::new(Duration::from_secs(60));
        let rows: Vec<_> = (0..12)
            .map(|i| {
                let mut m = serde_json::Map::new();
                m.insert("n".to_string(), serde_json::json!(i));
                m
            })
            .collect();
        let handle = cache.register(vec!["n".to_string()], rows);
        let page = cache.page(handle, 1, 5).unwrap();
        assert_eq!(page.rows.len(), 5);
        assert_eq!(page.rows[0]["n"], serde_json::json!(5));
        assert_eq!(page.total_rows, 12);
    }

    #[test]
    fn expired_entries_return_none() {
        let cache = PaginationCache::new(Duration::from_millis(1));
        let handle = cache.register(vec![], vec![]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.page(handle, 0, 10).is_none());
    }
}
