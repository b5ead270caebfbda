//! Medic Engine - auto-remediation execution with outcome-driven learning
//!
//! The execution subsystem: a state-machine-driven plan executor that
//! dispatches multi-step remediation actions, enforces safety gates
//! (blacklist, cooldown, concurrency cap), rolls back partial failures in
//! reverse order, and feeds every outcome into a statistics store that
//! adjusts future risk scoring and flags auto-approval eligibility.
//!
//! The flow is a closed loop: execute -> record -> learn -> re-score.

pub mod config;
pub mod executor;
pub mod learning;
pub mod logging;
pub mod orchestrator;
pub mod stats;

pub use config::{EngineConfig, LearningConfig, RemediationConfig};
pub use executor::{
    ActionExecutor, DispatchRequest, ExecutionOutcome, ExecutorRegistry, RollbackOutcome,
    RollbackRequest,
};
pub use learning::LearningEngine;
pub use orchestrator::{ExecutionTrigger, RemediationOrchestrator};
pub use stats::{PlaybookStatsStore, StoreSummary};
