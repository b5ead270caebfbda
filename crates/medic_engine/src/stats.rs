//! Per-playbook statistics store.
//!
//! The only state shared across concurrent plan executions. Updates run
//! under a single writer lock so two plans finishing the same playbook at
//! once cannot lose an increment. History is bounded per playbook; the
//! aggregates themselves are never evicted.

use anyhow::{Context, Result};
use medic_common::{PlaybookExecution, PlaybookStats, StatsTuning};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Default)]
struct StoreInner {
    stats: HashMap<String, PlaybookStats>,
    /// Most recent execution first
    history: HashMap<String, VecDeque<PlaybookExecution>>,
}

/// Aggregate view across every tracked playbook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSummary {
    pub playbooks_tracked: usize,
    pub total_executions: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rolled_back: u64,
    pub overall_success_rate: f64,
}

/// On-disk snapshot shape
#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    stats: Vec<PlaybookStats>,
    history: HashMap<String, Vec<PlaybookExecution>>,
}

pub struct PlaybookStatsStore {
    tuning: StatsTuning,
    inner: RwLock<StoreInner>,
}

impl PlaybookStatsStore {
    pub fn new(tuning: StatsTuning) -> Self {
        Self {
            tuning,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Existing aggregate for a playbook, or a fresh zeroed one.
    ///
    /// Idempotent: repeated calls for an unseen id return the same zeroed
    /// stats without double-creating.
    pub async fn get_or_create_stats(
        &self,
        playbook_id: &str,
        playbook_name: &str,
    ) -> PlaybookStats {
        let mut inner = self.inner.write().await;
        inner
            .stats
            .entry(playbook_id.to_string())
            .or_insert_with(|| PlaybookStats::new(playbook_id, playbook_name))
            .clone()
    }

    /// Fold one completed execution into its playbook's aggregate.
    ///
    /// Counter updates, rate/confidence/adjustment recomputation, and the
    /// history append happen atomically under the write lock.
    pub async fn record_execution(&self, execution: PlaybookExecution) -> PlaybookStats {
        let mut inner = self.inner.write().await;

        let stats = inner
            .stats
            .entry(execution.playbook_id.clone())
            .or_insert_with(|| {
                PlaybookStats::new(&execution.playbook_id, &execution.playbook_name)
            });
        if stats.playbook_name.is_empty() && !execution.playbook_name.is_empty() {
            stats.playbook_name = execution.playbook_name.clone();
        }
        stats.apply(&execution, &self.tuning);
        let updated = stats.clone();

        debug!(
            playbook_id = %execution.playbook_id,
            success = execution.success,
            success_rate = updated.success_rate,
            confidence = updated.confidence_score,
            "Recorded playbook execution"
        );

        let history = inner
            .history
            .entry(execution.playbook_id.clone())
            .or_default();
        history.push_front(execution);
        history.truncate(self.tuning.history_cap);

        updated
    }

    /// Aggregate for a playbook, if it has been seen
    pub async fn get_stats(&self, playbook_id: &str) -> Option<PlaybookStats> {
        self.inner.read().await.stats.get(playbook_id).cloned()
    }

    /// Every tracked aggregate
    pub async fn get_all_stats(&self) -> Vec<PlaybookStats> {
        self.inner.read().await.stats.values().cloned().collect()
    }

    /// Recent executions of a playbook, most recent first
    pub async fn get_executions_for_playbook(
        &self,
        playbook_id: &str,
        limit: usize,
    ) -> Vec<PlaybookExecution> {
        self.inner
            .read()
            .await
            .history
            .get(playbook_id)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Cross-playbook totals for observability
    pub async fn get_summary(&self) -> StoreSummary {
        let inner = self.inner.read().await;
        let mut summary = StoreSummary {
            playbooks_tracked: inner.stats.len(),
            ..Default::default()
        };
        for stats in inner.stats.values() {
            summary.total_executions += stats.total_executions;
            summary.total_successes += stats.success_count;
            summary.total_failures += stats.failure_count;
            summary.total_rolled_back += stats.rolled_back_count;
        }
        summary.overall_success_rate = if summary.total_executions == 0 {
            0.0
        } else {
            summary.total_successes as f64 / summary.total_executions as f64
        };
        summary
    }

    /// Write a JSON snapshot of aggregates and history
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = {
            let inner = self.inner.read().await;
            StoreSnapshot {
                stats: inner.stats.values().cloned().collect(),
                history: inner
                    .history
                    .iter()
                    .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                    .collect(),
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create stats directory")?;
        }
        let json =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize stats store")?;
        tokio::fs::write(path, json)
            .await
            .context("Failed to write stats snapshot")?;
        debug!("Saved stats snapshot to {:?}", path);
        Ok(())
    }

    /// Load a snapshot written by `save_to`; a missing file yields an
    /// empty store
    pub async fn load_from(path: impl AsRef<Path>, tuning: StatsTuning) -> Result<Self> {
        let path = path.as_ref();
        let store = Self::new(tuning);

        if !path.exists() {
            info!("No stats snapshot at {:?}, starting empty", path);
            return Ok(store);
        }

        let contents = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read stats snapshot")?;
        let snapshot: StoreSnapshot =
            serde_json::from_str(&contents).context("Failed to parse stats snapshot")?;

        {
            let mut inner = store.inner.write().await;
            for stats in snapshot.stats {
                inner.stats.insert(stats.playbook_id.clone(), stats);
            }
            for (playbook_id, executions) in snapshot.history {
                inner
                    .history
                    .insert(playbook_id, executions.into_iter().collect());
            }
        }

        info!("Loaded stats snapshot from {:?}", path);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn execution(playbook_id: &str, success: bool) -> PlaybookExecution {
        PlaybookExecution {
            id: uuid::Uuid::new_v4().to_string(),
            anomaly_id: "anom-1".to_string(),
            playbook_id: playbook_id.to_string(),
            playbook_name: "Restart pods".to_string(),
            plan_id: uuid::Uuid::new_v4().to_string(),
            success,
            duration_seconds: 1.0,
            steps_succeeded: u32::from(success),
            steps_failed: u32::from(!success),
            steps_skipped: 0,
            first_error: None,
            first_error_step: None,
            rolled_back: false,
            risk_score: 0.4,
            target: Some("web-1".to_string()),
            namespace: None,
            metadata: HashMap::new(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = PlaybookStatsStore::new(StatsTuning::default());

        let first = store.get_or_create_stats("pb-1", "Restart pods").await;
        let second = store.get_or_create_stats("pb-1", "different name").await;

        assert_eq!(first.total_executions, 0);
        assert_eq!(second.total_executions, 0);
        assert_eq!(second.playbook_name, "Restart pods");
        assert_eq!(store.get_all_stats().await.len(), 1);
    }

    #[tokio::test]
    async fn test_record_updates_counters() {
        let store = PlaybookStatsStore::new(StatsTuning::default());

        store.record_execution(execution("pb-1", true)).await;
        store.record_execution(execution("pb-1", true)).await;
        let stats = store.record_execution(execution("pb-1", false)).await;

        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        approx::assert_relative_eq!(stats.success_rate, 2.0 / 3.0);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_newest_first() {
        let tuning = StatsTuning {
            history_cap: 5,
            ..Default::default()
        };
        let store = PlaybookStatsStore::new(tuning);

        let mut last_id = String::new();
        for _ in 0..8 {
            let e = execution("pb-1", true);
            last_id = e.id.clone();
            store.record_execution(e).await;
        }

        let history = store.get_executions_for_playbook("pb-1", 100).await;
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].id, last_id);

        let limited = store.get_executions_for_playbook("pb-1", 2).await;
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_summary_aggregates_across_playbooks() {
        let store = PlaybookStatsStore::new(StatsTuning::default());

        store.record_execution(execution("pb-1", true)).await;
        store.record_execution(execution("pb-1", false)).await;
        store.record_execution(execution("pb-2", true)).await;

        let summary = store.get_summary().await;
        assert_eq!(summary.playbooks_tracked, 2);
        assert_eq!(summary.total_executions, 3);
        assert_eq!(summary.total_successes, 2);
        assert_eq!(summary.total_failures, 1);
        approx::assert_relative_eq!(summary.overall_success_rate, 2.0 / 3.0);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let store = PlaybookStatsStore::new(StatsTuning::default());
        store.record_execution(execution("pb-1", true)).await;
        store.record_execution(execution("pb-1", false)).await;
        store.save_to(&path).await.unwrap();

        let loaded = PlaybookStatsStore::load_from(&path, StatsTuning::default())
            .await
            .unwrap();
        let stats = loaded.get_stats("pb-1").await.unwrap();
        assert_eq!(stats.total_executions, 2);
        assert_eq!(loaded.get_executions_for_playbook("pb-1", 10).await.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() {
        let store =
            PlaybookStatsStore::load_from("/nonexistent/stats.json", StatsTuning::default())
                .await
                .unwrap();
        assert!(store.get_all_stats().await.is_empty());
    }
}
