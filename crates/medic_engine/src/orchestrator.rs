//! Plan execution: safety gates, sequential dispatch, ordered rollback.
//!
//! One orchestrator instance owns the in-flight set and the cooldown map;
//! there is no ambient global state. Steps run strictly in order because
//! later steps may depend on earlier ones, and rollback correctness
//! depends on a known completion order (LIFO).
//!
//! Nothing below `execute_plan` raises to the caller: every failure mode
//! is represented as step/plan status plus error text.

use crate::config::RemediationConfig;
use crate::executor::{DispatchRequest, ExecutionOutcome, ExecutorRegistry, RollbackRequest};
use crate::learning::LearningEngine;
use chrono::{DateTime, Duration, Utc};
use medic_common::{
    ActionPlan, ActionStep, Anomaly, AuditRecord, AuditSink, AuditStatus, PlanRejection,
    PlanStatus, TracingAuditSink,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Learning context handed in alongside a plan by the upstream decision
/// layer: which anomaly triggered it and which playbook produced it.
#[derive(Debug, Clone)]
pub struct ExecutionTrigger {
    pub anomaly: Anomaly,
    pub playbook_id: String,
    pub playbook_name: String,
}

pub struct RemediationOrchestrator {
    config: RemediationConfig,
    registry: Arc<ExecutorRegistry>,
    audit: Arc<dyn AuditSink>,
    learning: Option<Arc<LearningEngine>>,
    /// Plan ids currently executing; admission-control gate, not a lock
    in_flight: Mutex<HashSet<String>>,
    /// Target -> last successful action time, for the cooldown gate
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RemediationOrchestrator {
    pub fn new(config: RemediationConfig, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            config,
            registry,
            audit: Arc::new(TracingAuditSink),
            learning: None,
            in_flight: Mutex::new(HashSet::new()),
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the default tracing audit sink
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Attach a learning engine; outcomes are recorded when a trigger is
    /// supplied alongside the plan
    pub fn with_learning(mut self, learning: Arc<LearningEngine>) -> Self {
        self.learning = Some(learning);
        self
    }

    /// Number of plans currently executing
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Seed the cooldown map, e.g. when warm-starting from persisted state
    pub async fn note_success_at(&self, target: impl Into<String>, when: DateTime<Utc>) {
        self.cooldowns.lock().await.insert(target.into(), when);
    }

    /// Drive a plan through its steps and return it in a terminal state.
    ///
    /// Precondition violations (not approved, empty, engine disabled,
    /// concurrency cap) return the plan unmutated except for
    /// `error_message`, with no side effects. Otherwise the plan always
    /// comes back with a terminal status, a summary line, and one outcome
    /// record pushed to the learning engine when a trigger was supplied.
    pub async fn execute_plan(
        &self,
        mut plan: ActionPlan,
        trigger: Option<&ExecutionTrigger>,
    ) -> ActionPlan {
        if let Err(rejection) = self.admit(&plan).await {
            warn!(plan_id = %plan.id, "Plan refused: {rejection}");
            plan.error_message = Some(rejection.to_string());
            return plan;
        }

        info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            risk_score = plan.risk_score,
            dry_run = self.config.dry_run,
            "Executing remediation plan"
        );
        plan.status = PlanStatus::Executing;
        plan.started_at = Some(Utc::now());

        // Indices of successfully dispatched steps, in completion order
        let mut rollback_stack: Vec<usize> = Vec::new();
        let mut failed = false;

        for idx in 0..plan.steps.len() {
            if let Some(reason) = self.gate_reason(&plan.steps[idx]).await {
                info!(
                    plan_id = %plan.id,
                    step_id = %plan.steps[idx].id,
                    "Step rejected: {reason}"
                );
                plan.steps[idx].reject(reason);
                self.audit_step(&plan.id, &plan.steps[idx], AuditStatus::Rejected);
                continue;
            }

            if self.config.dry_run {
                debug!(
                    plan_id = %plan.id,
                    step_id = %plan.steps[idx].id,
                    "Dry run: synthesizing success without dispatch"
                );
                plan.steps[idx].begin();
                plan.steps[idx].succeed(None);
                self.audit_step(&plan.id, &plan.steps[idx], AuditStatus::Success);
                continue;
            }

            self.audit_step(&plan.id, &plan.steps[idx], AuditStatus::Started);
            plan.steps[idx].begin();
            let outcome = self.dispatch(&plan.steps[idx]).await;

            if outcome.success {
                self.cooldowns
                    .lock()
                    .await
                    .insert(plan.steps[idx].target.clone(), Utc::now());
                plan.steps[idx].succeed(outcome.rollback_data);
                rollback_stack.push(idx);
                let mut record = self.step_record(&plan.id, &plan.steps[idx], AuditStatus::Success);
                if let Some(state) = outcome.state_after {
                    record = record.with_state_after(state);
                }
                self.emit_audit(record);
            } else {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "executor reported failure without detail".to_string());
                warn!(
                    plan_id = %plan.id,
                    step_id = %plan.steps[idx].id,
                    target = %plan.steps[idx].target,
                    "Step failed: {error}"
                );
                plan.steps[idx].fail(error);
                self.audit_step(&plan.id, &plan.steps[idx], AuditStatus::Failed);
                failed = true;
                break;
            }
        }

        let reverted = if failed {
            self.rollback(&mut plan, &rollback_stack).await
        } else {
            0
        };

        self.finalize(&mut plan, reverted);
        self.in_flight.lock().await.remove(&plan.id);

        if let (Some(learning), Some(trigger)) = (&self.learning, trigger) {
            if !trigger.anomaly.id.is_empty() && !trigger.playbook_id.is_empty() {
                // Best effort: a learning failure never surfaces to the caller
                if let Err(e) = learning
                    .record_execution(
                        &plan,
                        &trigger.anomaly,
                        &trigger.playbook_id,
                        &trigger.playbook_name,
                    )
                    .await
                {
                    warn!(plan_id = %plan.id, "Learning update failed: {e:#}");
                }
            }
        }

        plan
    }

    /// Check preconditions and claim an in-flight slot.
    ///
    /// The capacity check and the insert happen under one lock so two
    /// plans cannot both claim the last slot.
    async fn admit(&self, plan: &ActionPlan) -> Result<(), PlanRejection> {
        if !self.config.enabled {
            return Err(PlanRejection::Disabled);
        }
        plan.validate()?;

        let mut in_flight = self.in_flight.lock().await;
        if in_flight.len() >= self.config.max_concurrent {
            return Err(PlanRejection::MaxConcurrent(self.config.max_concurrent));
        }
        in_flight.insert(plan.id.clone());
        Ok(())
    }

    /// Why a step must not dispatch, if any gate blocks it
    async fn gate_reason(&self, step: &ActionStep) -> Option<String> {
        for entry in &self.config.blacklist {
            if step.namespace.as_deref() == Some(entry.as_str()) {
                return Some(format!("namespace '{entry}' is blacklisted"));
            }
            if step.target.contains(entry.as_str()) {
                return Some(format!("target matches blacklist entry '{entry}'"));
            }
        }

        if self.config.cooldown_minutes > 0 {
            let cooldowns = self.cooldowns.lock().await;
            if let Some(last) = cooldowns.get(&step.target) {
                let elapsed = Utc::now() - *last;
                if elapsed < Duration::minutes(self.config.cooldown_minutes) {
                    return Some(format!(
                        "target '{}' was remediated {}s ago (cooldown {}m)",
                        step.target,
                        elapsed.num_seconds(),
                        self.config.cooldown_minutes
                    ));
                }
            }
        }

        None
    }

    /// Invoke the executor for a step, normalizing every failure shape
    /// into an unsuccessful outcome
    async fn dispatch(&self, step: &ActionStep) -> ExecutionOutcome {
        let executor = match self.registry.get(step.action) {
            Some(executor) => executor,
            None => {
                return ExecutionOutcome::failed(format!(
                    "no executor registered for action kind '{}'",
                    step.action
                ))
            }
        };

        let request = DispatchRequest {
            action: step.action,
            target: &step.target,
            namespace: step.namespace.as_deref(),
            parameters: &step.parameters,
        };
        match executor.dispatch(request).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::failed(format!("{e:#}")),
        }
    }

    /// Roll back successfully completed steps in strict reverse order.
    ///
    /// Each attempt is caught independently; a rollback failure never
    /// stops the rollback of earlier steps. Steps whose kind has no
    /// rollback handler are left as-is. Returns the number of steps
    /// actually reverted.
    async fn rollback(&self, plan: &mut ActionPlan, rollback_stack: &[usize]) -> usize {
        if rollback_stack.is_empty() {
            return 0;
        }
        info!(
            plan_id = %plan.id,
            candidates = rollback_stack.len(),
            "Rolling back completed steps"
        );

        let mut reverted = 0;
        for &idx in rollback_stack.iter().rev() {
            let step = &plan.steps[idx];

            let executor = match self.registry.get(step.action) {
                Some(executor) if executor.supports_rollback() => executor,
                _ => {
                    debug!(
                        plan_id = %plan.id,
                        step_id = %step.id,
                        action = %step.action,
                        "No rollback handler; leaving step as-is"
                    );
                    continue;
                }
            };
            let rollback_data = match &step.rollback_data {
                Some(data) => data,
                None => {
                    debug!(
                        plan_id = %plan.id,
                        step_id = %step.id,
                        "No rollback data captured; leaving step as-is"
                    );
                    continue;
                }
            };

            self.audit_rollback(&plan.id, step, AuditStatus::Started, None);
            let request = RollbackRequest {
                action: step.action,
                target: &step.target,
                namespace: step.namespace.as_deref(),
                rollback_data,
            };
            match executor.rollback(request).await {
                Ok(outcome) if outcome.success => {
                    info!(
                        plan_id = %plan.id,
                        step_id = %step.id,
                        target = %step.target,
                        "Step rolled back"
                    );
                    self.audit_rollback(&plan.id, step, AuditStatus::Success, None);
                    plan.steps[idx].mark_rolled_back();
                    reverted += 1;
                }
                Ok(outcome) => {
                    let error = outcome.error.unwrap_or_else(|| "unknown".to_string());
                    warn!(
                        plan_id = %plan.id,
                        step_id = %step.id,
                        "Rollback failed: {error}"
                    );
                    self.audit_rollback(&plan.id, step, AuditStatus::Failed, Some(&error));
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(
                        plan_id = %plan.id,
                        step_id = %step.id,
                        "Rollback failed: {error}"
                    );
                    self.audit_rollback(&plan.id, step, AuditStatus::Failed, Some(&error));
                }
            }
        }
        reverted
    }

    /// Set the terminal status and the summary line
    fn finalize(&self, plan: &mut ActionPlan, reverted: usize) {
        let total = plan.steps.len();
        let succeeded = plan.succeeded_steps();
        let failed = plan.failed_steps();
        let dispatched = succeeded + failed;

        plan.summary = Some(format!(
            "Executed {succeeded}/{total} steps successfully. Failed: {failed}. Rolled back: {reverted}."
        ));
        plan.status = if failed == 0 && dispatched > 0 {
            PlanStatus::Success
        } else if reverted > 0 {
            PlanStatus::RolledBack
        } else {
            PlanStatus::Failed
        };
        if dispatched == 0 {
            plan.error_message =
                Some("no steps were dispatched (all rejected by safety gates)".to_string());
        }
        plan.completed_at = Some(Utc::now());

        info!(
            plan_id = %plan.id,
            status = %plan.status,
            summary = plan.summary.as_deref().unwrap_or(""),
            "Plan completed"
        );
    }

    /// Build the audit record for a step phase
    fn step_record(&self, plan_id: &str, step: &ActionStep, status: AuditStatus) -> AuditRecord {
        let mut record = AuditRecord::new(
            step.action.as_str(),
            &step.target,
            status,
            plan_id,
            &step.id,
        );
        if let Some(error) = &step.error_message {
            record = record.with_error(error);
        }
        if let Some(duration) = step.duration_seconds() {
            record = record.with_duration(duration);
        }
        record
    }

    /// Fire-and-forget audit write for a step phase
    fn audit_step(&self, plan_id: &str, step: &ActionStep, status: AuditStatus) {
        self.emit_audit(self.step_record(plan_id, step, status));
    }

    /// Hand a record to the sink; failures are logged and discarded
    fn emit_audit(&self, record: AuditRecord) {
        if let Err(e) = self.audit.record(&record) {
            warn!("Audit sink failure (ignored): {e:#}");
        }
    }

    /// Fire-and-forget audit write for a rollback phase
    fn audit_rollback(
        &self,
        plan_id: &str,
        step: &ActionStep,
        status: AuditStatus,
        error: Option<&str>,
    ) {
        let mut record = AuditRecord::new(
            format!("rollback:{}", step.action),
            &step.target,
            status,
            plan_id,
            &step.id,
        );
        if let Some(error) = error {
            record = record.with_error(error);
        }
        self.emit_audit(record);
    }
}
