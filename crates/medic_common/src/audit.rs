//! Audit trail for remediation actions.
//!
//! Every step and rollback attempt is reported to an `AuditSink` before and
//! after it runs. Sinks are fire-and-forget: a sink failure must never
//! change the outcome of a remediation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Maximum audit log size before rotation (10 MB)
pub const MAX_AUDIT_LOG_SIZE: u64 = 10_485_760;

/// Outcome phase being audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Started,
    Success,
    Failed,
    Rejected,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Started => "started",
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
            AuditStatus::Rejected => "rejected",
        }
    }
}

/// One audit record, emitted per step phase and per rollback attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// Action label, e.g. "pod_restart" or "rollback:deployment_rollback"
    pub action: String,
    pub target: String,
    pub status: AuditStatus,
    pub plan_id: String,
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Sanitized error text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_after: Option<HashMap<String, serde_json::Value>>,
}

impl AuditRecord {
    /// Create a new audit record
    pub fn new(
        action: impl Into<String>,
        target: impl Into<String>,
        status: AuditStatus,
        plan_id: impl Into<String>,
        step_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            target: target.into(),
            status,
            plan_id: plan_id.into(),
            step_id: step_id.into(),
            actor: None,
            duration_seconds: None,
            error_message: None,
            state_after: None,
        }
    }

    /// Set the acting identity
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the step duration
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Set the error text; secrets are redacted before storage
    pub fn with_error(mut self, error: &str) -> Self {
        self.error_message = Some(sanitize_error(error));
        self
    }

    /// Attach the post-action state reported by the executor
    pub fn with_state_after(mut self, state: HashMap<String, serde_json::Value>) -> Self {
        self.state_after = Some(state);
        self
    }
}

/// Destination for audit records.
///
/// Implementations must not panic; the orchestrator logs and discards any
/// error they return.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Sink that emits audit records as structured log lines
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        info!(
            action = %record.action,
            target = %record.target,
            status = record.status.as_str(),
            plan_id = %record.plan_id,
            step_id = %record.step_id,
            error = record.error_message.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

/// Sink that drops every record; for tests and embedders with their own trail
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _record: &AuditRecord) -> Result<()> {
        Ok(())
    }
}

/// Append-only JSONL audit file with size-based rotation
pub struct JsonlAuditSink {
    path: PathBuf,
    archive_dir: PathBuf,
}

impl JsonlAuditSink {
    /// Create a sink writing to `<data_dir>/audit.jsonl`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            path: data_dir.join("audit.jsonl"),
            archive_dir: data_dir.join("archive"),
        }
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let metadata = fs::metadata(&self.path)?;
        if metadata.len() < MAX_AUDIT_LOG_SIZE {
            return Ok(());
        }

        fs::create_dir_all(&self.archive_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let archive_path = self.archive_dir.join(format!("audit_{timestamp}.jsonl"));
        fs::rename(&self.path, &archive_path)?;
        warn!("Rotated audit log to {:?}", archive_path);
        Ok(())
    }

    /// Read the most recent audit records, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        content
            .lines()
            .rev()
            .take(limit)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;

        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Redact secret-looking material from error text before it reaches the
/// audit trail, then truncate oversized messages.
pub fn sanitize_error(text: &str) -> String {
    let mut sanitized = text.to_string();

    let secret_patterns = [
        (
            r"(?i)(password|passwd|pwd)\s*[=:]\s*\S+",
            "[REDACTED_PASSWORD]",
        ),
        (
            r"(?i)(api[_-]?key|apikey)\s*[=:]\s*\S+",
            "[REDACTED_API_KEY]",
        ),
        (r"(?i)(secret|token)\s*[=:]\s*\S+", "[REDACTED_SECRET]"),
        (r"(?i)(bearer)\s+\S+", "Bearer [REDACTED]"),
    ];

    for (pattern, replacement) in &secret_patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            sanitized = re.replace_all(&sanitized, *replacement).to_string();
        }
    }

    if sanitized.len() > 1000 {
        sanitized = format!("{}... [truncated]", &sanitized[..1000]);
    }

    sanitized
}
