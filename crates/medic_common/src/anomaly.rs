//! Anomaly records handed to the remediation subsystem.
//!
//! Detection is an upstream concern; the engine only needs enough context
//! to link an execution back to the signal that triggered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a detected anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A detected anomaly that triggered a remediation plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    /// Unique identifier assigned by the detection layer
    pub id: String,
    /// Metric that tripped detection (e.g. "pod_restart_rate")
    pub metric_name: String,
    /// Severity level
    pub severity: Severity,
    /// Category label (e.g. "availability", "saturation")
    pub category: String,
    /// Observed value at detection time, if the metric is numeric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the anomaly was detected
    pub detected_at: DateTime<Utc>,
}

impl Anomaly {
    /// Create a new anomaly record
    pub fn new(
        id: impl Into<String>,
        metric_name: impl Into<String>,
        severity: Severity,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            metric_name: metric_name.into(),
            severity,
            category: category.into(),
            value: None,
            description: None,
            detected_at: Utc::now(),
        }
    }

    /// Set the observed metric value
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_anomaly_builder() {
        let anomaly = Anomaly::new("anom-1", "pod_restart_rate", Severity::High, "availability")
            .with_value(12.0)
            .with_description("restart storm in payments namespace");

        assert_eq!(anomaly.id, "anom-1");
        assert_eq!(anomaly.severity.as_str(), "high");
        assert_eq!(anomaly.value, Some(12.0));
    }
}
