//! Executor seam: the boundary between the orchestrator and the code that
//! actually touches infrastructure.
//!
//! Concrete executors (Kubernetes, Ansible, webhooks) live outside this
//! crate and register here per action kind. Executors report structured
//! outcomes; retry and timeout policy is theirs, not the orchestrator's.

use async_trait::async_trait;
use medic_common::ActionKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What the orchestrator hands an executor for one step
#[derive(Debug, Clone)]
pub struct DispatchRequest<'a> {
    pub action: ActionKind,
    pub target: &'a str,
    pub namespace: Option<&'a str>,
    pub parameters: &'a HashMap<String, serde_json::Value>,
}

/// Rollback input: the same identity plus the state captured at dispatch
#[derive(Debug, Clone)]
pub struct RollbackRequest<'a> {
    pub action: ActionKind,
    pub target: &'a str,
    pub namespace: Option<&'a str>,
    pub rollback_data: &'a HashMap<String, serde_json::Value>,
}

/// Structured result of one dispatch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// State the same action kind's rollback path needs to undo this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<HashMap<String, serde_json::Value>>,
    /// Observed state after the action, for the audit trail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_after: Option<HashMap<String, serde_json::Value>>,
}

impl ExecutionOutcome {
    /// Successful outcome with no rollback material
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Successful outcome carrying rollback material
    pub fn ok_with_rollback(rollback_data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            success: true,
            rollback_data: Some(rollback_data),
            ..Default::default()
        }
    }

    /// Failed outcome with error text
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Structured result of one rollback attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RollbackOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// An executor for one or more action kinds.
///
/// `dispatch` errors are caught by the orchestrator and converted into a
/// failed step; they never abort the plan loop. Rollback is opt-in: kinds
/// without a real inverse keep the no-op default, and the orchestrator
/// leaves their steps untouched on rollback (best-effort contract).
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Perform the action against the target
    async fn dispatch(&self, request: DispatchRequest<'_>) -> anyhow::Result<ExecutionOutcome>;

    /// Whether this executor can undo a successful dispatch
    fn supports_rollback(&self) -> bool {
        false
    }

    /// Undo a previously successful dispatch
    async fn rollback(&self, _request: RollbackRequest<'_>) -> anyhow::Result<RollbackOutcome> {
        Ok(RollbackOutcome::ok())
    }
}

/// Maps action kinds to their executors.
///
/// Built once at startup, then shared immutably.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionKind, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for an action kind, replacing any previous one
    pub fn register(&mut self, kind: ActionKind, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(kind, executor);
    }

    /// Executor for an action kind, if one is registered
    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Action kinds with a registered executor
    pub fn kinds(&self) -> Vec<ActionKind> {
        self.executors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl ActionExecutor for AlwaysOk {
        async fn dispatch(&self, _request: DispatchRequest<'_>) -> anyhow::Result<ExecutionOutcome> {
            Ok(ExecutionOutcome::ok())
        }
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = ExecutorRegistry::new();
        assert!(registry.is_empty());

        registry.register(ActionKind::PodRestart, Arc::new(AlwaysOk));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(ActionKind::PodRestart).is_some());
        assert!(registry.get(ActionKind::Webhook).is_none());
    }

    #[tokio::test]
    async fn test_default_rollback_is_noop_success() {
        let executor = AlwaysOk;
        assert!(!executor.supports_rollback());

        let data = HashMap::new();
        let outcome = executor
            .rollback(RollbackRequest {
                action: ActionKind::PodRestart,
                target: "web-1",
                namespace: None,
                rollback_data: &data,
            })
            .await
            .unwrap();
        assert!(outcome.success);
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = ExecutionOutcome::ok();
        assert!(ok.success && ok.error.is_none());

        let failed = ExecutionOutcome::failed("timeout waiting for pod");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("timeout waiting for pod"));
    }
}
