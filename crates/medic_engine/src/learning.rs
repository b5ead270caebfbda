//! Outcome-driven learning.
//!
//! Consumes one execution record per completed plan, updates the playbook
//! statistics store, caches a clamped risk adjustment per playbook, and
//! answers the queries the next remediation decision asks before building
//! a plan: how much to adjust the risk score, and whether the playbook has
//! earned auto-approval.

use crate::config::LearningConfig;
use crate::stats::{PlaybookStatsStore, StoreSummary};
use anyhow::Result;
use medic_common::{ActionPlan, Anomaly, PlaybookExecution, PlaybookStats};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct LearningEngine {
    config: LearningConfig,
    store: Arc<PlaybookStatsStore>,
    /// Cached clamped adjustment per playbook id
    adjustments: RwLock<HashMap<String, f64>>,
}

impl LearningEngine {
    pub fn new(config: LearningConfig, store: Arc<PlaybookStatsStore>) -> Self {
        Self {
            config,
            store,
            adjustments: RwLock::new(HashMap::new()),
        }
    }

    /// Record a completed plan against its playbook.
    ///
    /// Always updates the statistics store (observability is unaffected by
    /// the enabled flag); only refreshes the cached risk adjustment once
    /// learning is enabled and the playbook has enough samples. Lessons
    /// are surfaced through the log; persisting them is the knowledge
    /// base's concern, not ours.
    pub async fn record_execution(
        &self,
        plan: &ActionPlan,
        anomaly: &Anomaly,
        playbook_id: &str,
        playbook_name: &str,
    ) -> Result<PlaybookStats> {
        let execution = PlaybookExecution::from_plan(plan, &anomaly.id, playbook_id, playbook_name)
            .with_metadata("metric_name", serde_json::json!(anomaly.metric_name))
            .with_metadata("severity", serde_json::json!(anomaly.severity.as_str()))
            .with_metadata("category", serde_json::json!(anomaly.category));

        if !execution.success {
            for lesson in Self::extract_lessons(&execution) {
                info!(playbook_id, lesson = %lesson, "Lesson learned");
            }
        }

        let stats = self.store.record_execution(execution).await;

        if self.config.enabled && stats.total_executions >= self.config.min_executions_for_learning
        {
            self.update_risk_adjustment(&stats).await;
        }

        Ok(stats)
    }

    /// Refresh the cached adjustment from freshly recomputed stats
    async fn update_risk_adjustment(&self, stats: &PlaybookStats) {
        let mut adjustments = self.adjustments.write().await;
        let previous = adjustments
            .insert(stats.playbook_id.clone(), stats.suggested_risk_adjustment)
            .unwrap_or(0.0);
        if (previous - stats.suggested_risk_adjustment).abs() > f64::EPSILON {
            debug!(
                playbook_id = %stats.playbook_id,
                previous,
                adjustment = stats.suggested_risk_adjustment,
                "Risk adjustment updated"
            );
        }
    }

    /// Cached risk adjustment for a playbook; 0.0 without data or while
    /// learning is disabled
    pub async fn get_risk_adjustment(&self, playbook_id: &str) -> f64 {
        if !self.config.enabled {
            return 0.0;
        }
        self.adjustments
            .read()
            .await
            .get(playbook_id)
            .copied()
            .unwrap_or(0.0)
    }

    /// Base risk score corrected by the playbook's history, clamped to [0, 1]
    pub async fn get_adjusted_risk_score(&self, playbook_id: &str, base_risk_score: f64) -> f64 {
        let adjustment = self.get_risk_adjustment(playbook_id).await;
        (base_risk_score + adjustment).clamp(0.0, 1.0)
    }

    /// Whether a playbook has earned execution without human approval.
    ///
    /// Requires enough samples, a success rate at or above threshold, high
    /// confidence, and an adjusted risk below the auto-approve ceiling.
    /// Missing stats or disabled learning always answer false.
    pub async fn should_auto_approve(&self, playbook_id: &str, base_risk_score: f64) -> bool {
        if !self.config.enabled {
            return false;
        }
        let stats = match self.store.get_stats(playbook_id).await {
            Some(stats) => stats,
            None => return false,
        };
        if stats.total_executions < self.config.min_executions_for_learning {
            return false;
        }
        if stats.success_rate < self.config.success_rate_threshold {
            return false;
        }
        if stats.confidence_score < self.config.auto_approve_min_confidence {
            return false;
        }
        let adjusted = self.get_adjusted_risk_score(playbook_id, base_risk_score).await;
        adjusted < self.config.auto_approve_risk_threshold
    }

    /// Derive remediation hints from a failed or rolled-back execution.
    ///
    /// Substring matching against well-known failure shapes; deliberately
    /// coarse, these feed an operator-facing log line, not a decision.
    pub fn extract_lessons(execution: &PlaybookExecution) -> Vec<String> {
        let mut lessons = Vec::new();

        if let Some(error) = &execution.first_error {
            let error = error.to_lowercase();
            if error.contains("timeout") {
                lessons.push(
                    "Action timed out; consider raising executor timeouts or checking resource pressure on the target".to_string(),
                );
            }
            if error.contains("permission") || error.contains("forbidden") {
                lessons.push(
                    "Permission denied; verify service account credentials and RBAC for this action kind".to_string(),
                );
            }
            if error.contains("not found") {
                lessons.push(
                    "Target was not found; validate that the resource still exists when building the plan".to_string(),
                );
            }
            if error.contains("already") {
                lessons.push(
                    "Target was already in the desired state; an idempotency pre-check could skip this step".to_string(),
                );
            }
            if error.contains("connection") || error.contains("refused") {
                lessons.push(
                    "Connection failure reaching the target; check network path and endpoint health before retrying".to_string(),
                );
            }
        }

        if execution.steps_failed > 1 {
            lessons.push(
                "Multiple steps failed in one plan; consider retries with backoff or a circuit breaker around this playbook".to_string(),
            );
        }
        if execution.rolled_back {
            lessons.push(
                "Plan was rolled back; validate target state before execution to avoid partial applies".to_string(),
            );
        }

        lessons
    }

    /// Read-through to the store
    pub async fn get_playbook_stats(&self, playbook_id: &str) -> Option<PlaybookStats> {
        self.store.get_stats(playbook_id).await
    }

    /// Read-through to the store
    pub async fn get_all_playbook_stats(&self) -> Vec<PlaybookStats> {
        self.store.get_all_stats().await
    }

    /// Read-through to the store, most recent first
    pub async fn get_recent_executions(
        &self,
        playbook_id: &str,
        limit: usize,
    ) -> Vec<PlaybookExecution> {
        self.store.get_executions_for_playbook(playbook_id, limit).await
    }

    /// Read-through to the store
    pub async fn get_summary(&self) -> StoreSummary {
        self.store.get_summary().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medic_common::{ActionKind, ActionStep, PlanStatus, Severity, StatsTuning};

    fn anomaly() -> Anomaly {
        Anomaly::new("anom-1", "error_rate", Severity::High, "availability")
    }

    fn completed_plan(success: bool, error: Option<&str>) -> ActionPlan {
        let mut plan = ActionPlan::new(0.4)
            .with_step(ActionStep::new(ActionKind::PodRestart, "web-1"));
        plan.started_at = Some(chrono::Utc::now());
        plan.steps[0].begin();
        match error {
            None if success => plan.steps[0].succeed(None),
            None => plan.steps[0].fail("unknown"),
            Some(e) => plan.steps[0].fail(e),
        }
        plan.status = if success {
            PlanStatus::Success
        } else {
            PlanStatus::Failed
        };
        plan.completed_at = Some(chrono::Utc::now());
        plan
    }

    fn engine(config: LearningConfig) -> LearningEngine {
        LearningEngine::new(
            config,
            Arc::new(PlaybookStatsStore::new(StatsTuning::default())),
        )
    }

    #[tokio::test]
    async fn test_record_returns_updated_stats() {
        let engine = engine(LearningConfig::default());
        let stats = engine
            .record_execution(&completed_plan(true, None), &anomaly(), "pb-1", "Restart")
            .await
            .unwrap();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.success_count, 1);
    }

    #[tokio::test]
    async fn test_adjustment_cached_after_min_executions() {
        let engine = engine(LearningConfig::default());
        for _ in 0..2 {
            engine
                .record_execution(&completed_plan(false, Some("boom")), &anomaly(), "pb-1", "")
                .await
                .unwrap();
        }
        // below min_executions_for_learning (3): nothing cached yet
        assert_eq!(engine.get_risk_adjustment("pb-1").await, 0.0);

        for _ in 0..8 {
            engine
                .record_execution(&completed_plan(false, Some("boom")), &anomaly(), "pb-1", "")
                .await
                .unwrap();
        }
        // 10 failures, confidence 0.5: adjustment trends positive (riskier)
        assert!(engine.get_risk_adjustment("pb-1").await > 0.0);
    }

    #[tokio::test]
    async fn test_adjusted_score_round_trip_and_clamp() {
        let engine = engine(LearningConfig::default());
        for _ in 0..20 {
            engine
                .record_execution(&completed_plan(true, None), &anomaly(), "pb-1", "")
                .await
                .unwrap();
        }
        let adjustment = engine.get_risk_adjustment("pb-1").await;
        assert!(adjustment < 0.0);

        for base in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let adjusted = engine.get_adjusted_risk_score("pb-1", base).await;
            assert_eq!(adjusted, (base + adjustment).clamp(0.0, 1.0));
        }
    }

    #[tokio::test]
    async fn test_auto_approve_requires_track_record() {
        let engine = engine(LearningConfig::default());
        assert!(!engine.should_auto_approve("pb-1", 0.2).await);

        // 14 consecutive successes: confidence 0.7, success rate 1.0
        for _ in 0..14 {
            engine
                .record_execution(&completed_plan(true, None), &anomaly(), "pb-1", "")
                .await
                .unwrap();
        }
        assert!(engine.should_auto_approve("pb-1", 0.2).await);
        // high base risk still blocks it
        assert!(!engine.should_auto_approve("pb-1", 0.9).await);
    }

    #[tokio::test]
    async fn test_disabled_engine_records_but_never_adjusts() {
        let config = LearningConfig {
            enabled: false,
            ..Default::default()
        };
        let engine = engine(config);
        for _ in 0..20 {
            engine
                .record_execution(&completed_plan(true, None), &anomaly(), "pb-1", "")
                .await
                .unwrap();
        }
        // stats still flow to the store
        assert_eq!(
            engine.get_playbook_stats("pb-1").await.unwrap().total_executions,
            20
        );
        // but the learning surface stays inert
        assert_eq!(engine.get_risk_adjustment("pb-1").await, 0.0);
        assert_eq!(engine.get_adjusted_risk_score("pb-1", 0.5).await, 0.5);
        assert!(!engine.should_auto_approve("pb-1", 0.1).await);
    }

    #[test]
    fn test_lessons_match_error_shapes() {
        let plan = completed_plan(false, Some("connection refused by 10.0.3.7"));
        let execution = PlaybookExecution::from_plan(&plan, "anom-1", "pb-1", "");

        let lessons = LearningEngine::extract_lessons(&execution);
        assert!(lessons.iter().any(|l| l.contains("Connection failure")));
    }

    #[test]
    fn test_lessons_for_rollback_and_multi_failure() {
        let plan = completed_plan(false, Some("timeout after 30s"));
        let mut execution = PlaybookExecution::from_plan(&plan, "anom-1", "pb-1", "");
        execution.steps_failed = 2;
        execution.rolled_back = true;

        let lessons = LearningEngine::extract_lessons(&execution);
        assert!(lessons.iter().any(|l| l.contains("timed out")));
        assert!(lessons.iter().any(|l| l.contains("circuit breaker")));
        assert!(lessons.iter().any(|l| l.contains("rolled back")));
    }

    #[test]
    fn test_success_yields_no_lessons() {
        let plan = completed_plan(true, None);
        let execution = PlaybookExecution::from_plan(&plan, "anom-1", "pb-1", "");
        assert!(LearningEngine::extract_lessons(&execution).is_empty());
    }
}
