use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::schemas::grading::GradedResult;

/// Finished grading outcomes keyed by submission id. Readers get clones;
/// only the grading board writes, see `JobBoard::finish`.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    inner: Arc<RwLock<HashMap<String, GradedResult>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, submission_id: &str) -> Option<GradedResult> {
        self.inner.read().await.get(submission_id).cloned()
    }

    pub async fn contains(&self, submission_id: &str) -> bool {
        self.inner.read().await.contains_key(submission_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// All results, ordered by submission id.
    pub async fn snapshot(&self) -> Vec<GradedResult> {
        let mut results: Vec<_> = self.inner.read().await.values().cloned().collect();
        results.sort_by(|left, right| left.submission_id.cmp(&right.submission_id));
        results
    }

    /// Last write wins. Returns the result that was replaced.
    pub(crate) async fn upsert(&self, result: GradedResult) -> Option<GradedResult> {
        self.inner.write().await.insert(result.submission_id.clone(), result)
    }

    pub(crate) async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn result(id: &str, received: f64) -> GradedResult {
        GradedResult {
            submission_id: id.to_string(),
            points_received: received,
            points_possible: 10.0,
            rubric_breakdown: String::new(),
            explanation: String::new(),
            graded_at: datetime!(2024-01-01 0:00 UTC),
            student_name: None,
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_and_returns_previous() {
        let cache = ResultCache::new();
        assert!(cache.upsert(result("s-1", 4.0)).await.is_none());

        let previous = cache.upsert(result("s-1", 9.0)).await.expect("previous result");
        assert_eq!(previous.points_received, 4.0);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("s-1").await.unwrap().points_received, 9.0);
    }

    #[tokio::test]
    async fn snapshot_is_sorted_and_clear_empties() {
        let cache = ResultCache::new();
        cache.upsert(result("b", 1.0)).await;
        cache.upsert(result("a", 2.0)).await;

        let ids: Vec<_> = cache.snapshot().await.into_iter().map(|r| r.submission_id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        cache.clear().await;
        assert!(cache.is_empty().await);
        assert!(!cache.contains("a").await);
    }
}
