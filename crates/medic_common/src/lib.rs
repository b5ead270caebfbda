//! Medic Common - Shared types for the medic auto-remediation engine
//!
//! Data model only: anomaly triggers, remediation plans and their state
//! machines, playbook execution history and aggregates, and the audit
//! trail. Execution logic lives in `medic_engine`.

pub mod anomaly;
pub mod audit;
pub mod plan;
pub mod playbook;

pub use anomaly::*;
pub use audit::*;
pub use plan::*;
pub use playbook::*;
