//! Playbook execution history and per-playbook performance aggregates.
//!
//! One `PlaybookExecution` is recorded per completed plan. `PlaybookStats`
//! folds executions into the success-rate, confidence, and risk-adjustment
//! signals that the next remediation decision consults before building a
//! new plan.

use crate::plan::{ActionPlan, PlanStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tunable constants for the statistics model.
///
/// These are operator-facing knobs, not universal constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsTuning {
    /// Executions at which confidence reaches 1.0
    #[serde(default = "default_full_confidence")]
    pub full_confidence_executions: u32,
    /// Below this confidence the suggested adjustment stays 0
    #[serde(default = "default_min_confidence")]
    pub min_confidence_for_adjustment: f64,
    /// Success rate a playbook is expected to hold
    #[serde(default = "default_target_success_rate")]
    pub target_success_rate: f64,
    /// Largest downward (safer) risk correction
    #[serde(default = "default_max_risk_reduction")]
    pub max_risk_reduction: f64,
    /// Largest upward (riskier) risk correction
    #[serde(default = "default_max_risk_increase")]
    pub max_risk_increase: f64,
    /// Per-playbook execution history kept in memory
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

fn default_full_confidence() -> u32 {
    20
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_target_success_rate() -> f64 {
    0.9
}

fn default_max_risk_reduction() -> f64 {
    0.2
}

fn default_max_risk_increase() -> f64 {
    0.3
}

fn default_history_cap() -> usize {
    200
}

impl Default for StatsTuning {
    fn default() -> Self {
        Self {
            full_confidence_executions: default_full_confidence(),
            min_confidence_for_adjustment: default_min_confidence(),
            target_success_rate: default_target_success_rate(),
            max_risk_reduction: default_max_risk_reduction(),
            max_risk_increase: default_max_risk_increase(),
            history_cap: default_history_cap(),
        }
    }
}

/// Immutable summary of one completed plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookExecution {
    pub id: String,
    /// Anomaly that triggered the plan
    pub anomaly_id: String,
    /// Remediation recipe that produced the plan
    pub playbook_id: String,
    pub playbook_name: String,
    pub plan_id: String,
    /// Whether the plan ended in overall success
    pub success: bool,
    pub duration_seconds: f64,
    pub steps_succeeded: u32,
    pub steps_failed: u32,
    /// Steps rejected by a safety gate before dispatch
    pub steps_skipped: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error_step: Option<String>,
    pub rolled_back: bool,
    pub risk_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub completed_at: DateTime<Utc>,
}

impl PlaybookExecution {
    /// Flatten a terminal plan into an execution record.
    ///
    /// Callers must hand in a plan whose status is terminal; the record is
    /// never mutated afterwards.
    pub fn from_plan(
        plan: &ActionPlan,
        anomaly_id: impl Into<String>,
        playbook_id: impl Into<String>,
        playbook_name: impl Into<String>,
    ) -> Self {
        let (first_error, first_error_step) = match plan.first_error() {
            Some((step_id, error)) => (Some(error.to_string()), Some(step_id.to_string())),
            None => (None, None),
        };
        let first_step = plan.steps.first();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            anomaly_id: anomaly_id.into(),
            playbook_id: playbook_id.into(),
            playbook_name: playbook_name.into(),
            plan_id: plan.id.clone(),
            success: plan.status == PlanStatus::Success,
            duration_seconds: plan.duration_seconds().unwrap_or(0.0),
            steps_succeeded: plan.succeeded_steps() as u32,
            steps_failed: plan.failed_steps() as u32,
            steps_skipped: plan.rejected_steps() as u32,
            first_error,
            first_error_step,
            rolled_back: plan.rolled_back_steps() > 0,
            risk_score: plan.risk_score,
            target: first_step.map(|s| s.target.clone()),
            namespace: first_step.and_then(|s| s.namespace.clone()),
            metadata: HashMap::new(),
            completed_at: plan.completed_at.unwrap_or_else(Utc::now),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Mutable aggregate tracking one playbook's historical performance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookStats {
    pub playbook_id: String,
    pub playbook_name: String,
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub rolled_back_count: u64,
    pub cumulative_duration_seconds: f64,
    /// success_count / total_executions; 0 with no executions
    pub success_rate: f64,
    /// How much the success rate should be trusted, 0-1, grows with samples
    pub confidence_score: f64,
    /// Signed correction for future plans' risk scores; negative is safer
    pub suggested_risk_adjustment: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl PlaybookStats {
    /// Zeroed aggregate for a playbook seen for the first time
    pub fn new(playbook_id: impl Into<String>, playbook_name: impl Into<String>) -> Self {
        Self {
            playbook_id: playbook_id.into(),
            playbook_name: playbook_name.into(),
            total_executions: 0,
            success_count: 0,
            failure_count: 0,
            rolled_back_count: 0,
            cumulative_duration_seconds: 0.0,
            success_rate: 0.0,
            confidence_score: 0.0,
            suggested_risk_adjustment: 0.0,
            last_execution_at: None,
        }
    }

    /// Fold one completed execution into the aggregate.
    ///
    /// Executions that neither succeeded nor had a failing step (every
    /// step gate-rejected) only advance the total, keeping the invariant
    /// success_count + failure_count <= total_executions.
    pub fn apply(&mut self, execution: &PlaybookExecution, tuning: &StatsTuning) {
        self.total_executions += 1;
        if execution.success {
            self.success_count += 1;
        } else if execution.steps_failed > 0 {
            self.failure_count += 1;
        }
        if execution.rolled_back {
            self.rolled_back_count += 1;
        }
        self.cumulative_duration_seconds += execution.duration_seconds;
        self.last_execution_at = Some(execution.completed_at);

        self.success_rate = self.success_count as f64 / self.total_executions as f64;
        self.confidence_score =
            (self.total_executions as f64 / tuning.full_confidence_executions as f64).min(1.0);
        self.suggested_risk_adjustment = self.compute_adjustment(tuning);
    }

    fn compute_adjustment(&self, tuning: &StatsTuning) -> f64 {
        if self.confidence_score < tuning.min_confidence_for_adjustment {
            return 0.0;
        }
        let raw = -(self.success_rate - tuning.target_success_rate) * self.confidence_score;
        raw.clamp(-tuning.max_risk_reduction, tuning.max_risk_increase)
    }

    /// Mean execution duration in seconds
    pub fn mean_duration_seconds(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.cumulative_duration_seconds / self.total_executions as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ActionKind, ActionStep};

    fn execution(success: bool, failed: u32, rolled_back: bool) -> PlaybookExecution {
        PlaybookExecution {
            id: "e".to_string(),
            anomaly_id: "a".to_string(),
            playbook_id: "pb".to_string(),
            playbook_name: "Restart pods".to_string(),
            plan_id: "p".to_string(),
            success,
            duration_seconds: 2.0,
            steps_succeeded: if success { 1 } else { 0 },
            steps_failed: failed,
            steps_skipped: 0,
            first_error: None,
            first_error_step: None,
            rolled_back,
            risk_score: 0.4,
            target: None,
            namespace: None,
            metadata: HashMap::new(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_success_rate_exact() {
        let tuning = StatsTuning::default();
        let mut stats = PlaybookStats::new("pb", "Restart pods");
        for i in 0..10 {
            stats.apply(&execution(i < 7, u32::from(i >= 7), false), &tuning);
        }
        assert_eq!(stats.total_executions, 10);
        assert_eq!(stats.success_count, 7);
        assert_eq!(stats.failure_count, 3);
        assert_eq!(stats.success_rate, 0.7);
    }

    #[test]
    fn test_confidence_monotonic_and_capped() {
        let tuning = StatsTuning::default();
        let mut stats = PlaybookStats::new("pb", "");
        let mut last = 0.0;
        for _ in 0..30 {
            stats.apply(&execution(true, 0, false), &tuning);
            assert!(stats.confidence_score >= last);
            last = stats.confidence_score;
        }
        assert_eq!(stats.confidence_score, 1.0);
    }

    #[test]
    fn test_rejected_only_execution_counts_toward_total_alone() {
        let tuning = StatsTuning::default();
        let mut stats = PlaybookStats::new("pb", "");
        stats.apply(&execution(false, 0, false), &tuning);
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.failure_count, 0);
    }

    #[test]
    fn test_adjustment_zero_below_min_confidence() {
        let tuning = StatsTuning::default();
        let mut stats = PlaybookStats::new("pb", "");
        // 5 of 20 executions -> confidence 0.25 < 0.3
        for _ in 0..5 {
            stats.apply(&execution(false, 1, false), &tuning);
        }
        assert_eq!(stats.suggested_risk_adjustment, 0.0);
    }

    #[test]
    fn test_adjustment_negative_when_above_target() {
        let tuning = StatsTuning::default();
        let mut stats = PlaybookStats::new("pb", "");
        for _ in 0..20 {
            stats.apply(&execution(true, 0, false), &tuning);
        }
        // success_rate 1.0, confidence 1.0 -> -(1.0 - 0.9) * 1.0 = -0.1
        assert!((stats.suggested_risk_adjustment - (-0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_adjustment_clamped_on_poor_performance() {
        let tuning = StatsTuning::default();
        let mut stats = PlaybookStats::new("pb", "");
        for _ in 0..20 {
            stats.apply(&execution(false, 1, false), &tuning);
        }
        // raw would be -(0.0 - 0.9) * 1.0 = 0.9, clamped to max_risk_increase
        assert_eq!(stats.suggested_risk_adjustment, tuning.max_risk_increase);
    }

    #[test]
    fn test_from_plan_flattens_counts() {
        let mut plan = ActionPlan::new(0.5)
            .with_step(ActionStep::new(ActionKind::PodRestart, "web-1").with_namespace("prod"))
            .with_step(ActionStep::new(ActionKind::PodRestart, "web-2"))
            .with_step(ActionStep::new(ActionKind::PodRestart, "web-3"));
        plan.started_at = Some(Utc::now());
        plan.steps[0].begin();
        plan.steps[0].succeed(None);
        plan.steps[1].begin();
        plan.steps[1].fail("connection refused by web-2");
        plan.steps[2].reject("cooldown");
        plan.status = PlanStatus::Failed;
        plan.completed_at = Some(Utc::now());

        let exec = PlaybookExecution::from_plan(&plan, "anom-1", "pb-restart", "Restart pods");
        assert!(!exec.success);
        assert_eq!(exec.steps_succeeded, 1);
        assert_eq!(exec.steps_failed, 1);
        assert_eq!(exec.steps_skipped, 1);
        assert_eq!(exec.first_error.as_deref(), Some("connection refused by web-2"));
        assert_eq!(exec.target.as_deref(), Some("web-1"));
        assert_eq!(exec.namespace.as_deref(), Some("prod"));
        assert!(!exec.rolled_back);
    }

    #[test]
    fn test_mean_duration() {
        let tuning = StatsTuning::default();
        let mut stats = PlaybookStats::new("pb", "");
        assert_eq!(stats.mean_duration_seconds(), 0.0);
        stats.apply(&execution(true, 0, false), &tuning);
        stats.apply(&execution(true, 0, false), &tuning);
        assert_eq!(stats.mean_duration_seconds(), 2.0);
    }
}
