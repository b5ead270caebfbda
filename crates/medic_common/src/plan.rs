//! Remediation plan model: ordered action steps with execution state.
//!
//! A plan is built by the upstream decision layer in `Approved` status and
//! mutated only by the orchestrator while it runs. A completed plan is a
//! permanent execution record handed on to the learning engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Kind of infrastructure action a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    PodRestart,
    HpaScale,
    DeploymentRollback,
    NodeCordon,
    NodeDrain,
    ConfigPatch,
    AnsiblePlaybook,
    Webhook,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::PodRestart => "pod_restart",
            ActionKind::HpaScale => "hpa_scale",
            ActionKind::DeploymentRollback => "deployment_rollback",
            ActionKind::NodeCordon => "node_cordon",
            ActionKind::NodeDrain => "node_drain",
            ActionKind::ConfigPatch => "config_patch",
            ActionKind::AnsiblePlaybook => "ansible_playbook",
            ActionKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorical risk level, derived from the numeric risk score upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a 0-1 risk score into a categorical level
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 0.25 => RiskLevel::Low,
            s if s < 0.5 => RiskLevel::Medium,
            s if s < 0.75 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

/// Step state machine.
///
/// `Pending -> Executing -> {Success, Failed, Rejected}`, plus
/// `Success -> RolledBack` driven by the orchestrator's rollback path.
/// `Rejected` is terminal and is reached without ever entering `Executing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Success,
    Failed,
    Rejected,
    RolledBack,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Rejected | StepStatus::RolledBack
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Executing => "executing",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Rejected => "rejected",
            StepStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Plan state machine: `Approved -> Executing -> {Success, Failed} -> [RolledBack]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Approved,
    Executing,
    Success,
    Failed,
    RolledBack,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Success | PlanStatus::Failed | PlanStatus::RolledBack
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Approved => "approved",
            PlanStatus::Executing => "executing",
            PlanStatus::Success => "success",
            PlanStatus::Failed => "failed",
            PlanStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Why a plan was refused before any step ran
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanRejection {
    #[error("remediation is disabled")]
    Disabled,

    #[error("plan is not approved for execution (status: {0})")]
    NotApproved(PlanStatus),

    #[error("plan has no steps")]
    Empty,

    #[error("step {0} has an empty target")]
    MissingTarget(String),

    #[error("step {0} is not pending (status: {1})")]
    StepNotPending(String, StepStatus),

    #[error("max concurrent executions reached ({0})")]
    MaxConcurrent(usize),
}

/// One atomic operation within a remediation plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    /// Unique identifier for this step
    pub id: String,
    /// What kind of action to perform
    pub action: ActionKind,
    /// Opaque identifier of the resource acted on
    pub target: String,
    /// Optional namespace scoping the target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Action parameters; semantics are defined by the action kind
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Execution status
    pub status: StepStatus,
    /// Error text when the step failed or was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Opaque state captured by a successful dispatch, consumed only by
    /// the same action kind's rollback path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActionStep {
    /// Create a pending step
    pub fn new(action: ActionKind, target: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            target: target.into(),
            namespace: None,
            parameters: HashMap::new(),
            status: StepStatus::Pending,
            error_message: None,
            rollback_data: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add an action parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Transition `Pending -> Executing`
    pub fn begin(&mut self) {
        self.status = StepStatus::Executing;
        self.started_at = Some(Utc::now());
    }

    /// Terminal success, capturing any rollback material the executor returned
    pub fn succeed(&mut self, rollback_data: Option<HashMap<String, serde_json::Value>>) {
        self.status = StepStatus::Success;
        self.rollback_data = rollback_data;
        self.completed_at = Some(Utc::now());
    }

    /// Terminal failure with the executor's error text
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Terminal rejection by a safety gate; the step never dispatched
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Rejected;
        self.error_message = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }

    /// Mark a previously successful step as reverted
    pub fn mark_rolled_back(&mut self) {
        self.status = StepStatus::RolledBack;
    }

    /// Wall-clock duration of the step, when both timestamps are set
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// An ordered sequence of action steps plus plan-level metadata.
///
/// Step order is execution order; rollback runs in strict reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub id: String,
    pub steps: Vec<ActionStep>,
    pub status: PlanStatus,
    /// Risk score in [0, 1], set by the plan builder; never mutated here
    pub risk_score: f64,
    /// Categorical risk level derived upstream
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Human-readable outcome line, produced at completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ActionPlan {
    /// Create an approved plan with no steps yet
    pub fn new(risk_score: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            steps: Vec::new(),
            status: PlanStatus::Approved,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            root_cause: None,
            started_at: None,
            completed_at: None,
            summary: None,
            error_message: None,
        }
    }

    /// Append a step
    pub fn with_step(mut self, step: ActionStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the suspected root cause
    pub fn with_root_cause(mut self, root_cause: impl Into<String>) -> Self {
        self.root_cause = Some(root_cause.into());
        self
    }

    /// Validate the plan as execution input.
    ///
    /// A plan must be approved, non-empty, and consist solely of pending
    /// steps with named targets. Re-executing a terminal step is a
    /// programming error this check refuses up front.
    pub fn validate(&self) -> Result<(), PlanRejection> {
        if self.status != PlanStatus::Approved {
            return Err(PlanRejection::NotApproved(self.status));
        }
        if self.steps.is_empty() {
            return Err(PlanRejection::Empty);
        }
        for step in &self.steps {
            if step.target.trim().is_empty() {
                return Err(PlanRejection::MissingTarget(step.id.clone()));
            }
            if step.status != StepStatus::Pending {
                return Err(PlanRejection::StepNotPending(step.id.clone(), step.status));
            }
        }
        Ok(())
    }

    /// Steps that completed successfully, including ones later rolled back
    pub fn succeeded_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Success | StepStatus::RolledBack))
            .count()
    }

    /// Steps that failed
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }

    /// Steps rejected by a safety gate
    pub fn rejected_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Rejected)
            .count()
    }

    /// Steps actually reverted by rollback
    pub fn rolled_back_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::RolledBack)
            .count()
    }

    /// First failed step, as (step id, error text)
    pub fn first_error(&self) -> Option<(&str, &str)> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .map(|s| {
                (
                    s.id.as_str(),
                    s.error_message.as_deref().unwrap_or("unknown error"),
                )
            })
    }

    /// Wall-clock duration of the plan, when both timestamps are set
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
