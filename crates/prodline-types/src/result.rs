//! Execution outcomes and the reserved engine exit-code table.

use serde::{Deserialize, Serialize};

/// Exit codes the engine reserves for conditions it detects itself.
/// Operator processes follow the same convention; an operator's own
/// nonzero code passes through unchanged as a business-logic failure.
pub mod exit_code {
    /// Successful completion.
    pub const SUCCESS: i32 = 0;
    /// Invalid or unresolvable configuration.
    pub const CONFIG: i32 = 1;
    /// Missing or malformed input data.
    pub const INPUT: i32 = 2;
    /// Operator business-logic failure.
    pub const BUSINESS: i32 = 3;
    /// Resource exhaustion or timeout.
    pub const RESOURCE: i32 = 4;
    /// Environment provisioning or activation failure.
    pub const ENVIRONMENT: i32 = 5;
}

/// Terminal status of one operator attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    Succeeded,
    Failed,
    TimedOut,
    EnvironmentError,
}

/// A point-in-time (or peak) resource reading for a monitored child.
///
/// GPU fields stay unset unless a GPU-aware sampler fills them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub disk_read_mb_s: f64,
    pub disk_write_mb_s: f64,
    pub net_sent_mb_s: f64,
    pub net_recv_mb_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_mb: Option<f64>,
}

impl ResourceSample {
    /// Fold another sample into this one, keeping per-field maxima.
    pub fn fold_peak(&mut self, other: &ResourceSample) {
        self.cpu_percent = self.cpu_percent.max(other.cpu_percent);
        self.memory_mb = self.memory_mb.max(other.memory_mb);
        self.disk_read_mb_s = self.disk_read_mb_s.max(other.disk_read_mb_s);
        self.disk_write_mb_s = self.disk_write_mb_s.max(other.disk_write_mb_s);
        self.net_sent_mb_s = self.net_sent_mb_s.max(other.net_sent_mb_s);
        self.net_recv_mb_s = self.net_recv_mb_s.max(other.net_recv_mb_s);
        self.gpu_percent = max_opt(self.gpu_percent, other.gpu_percent);
        self.gpu_memory_mb = max_opt(self.gpu_memory_mb, other.gpu_memory_mb);
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Outcome of a single operator attempt. Produced exactly once per
/// attempted operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub operator_id: String,
    pub node_id: String,
    pub exit_code: i32,
    pub duration_secs: f64,
    pub peak: ResourceSample,
    pub status: OperatorStatus,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == OperatorStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_peak_keeps_maxima() {
        let mut peak = ResourceSample {
            cpu_percent: 40.0,
            memory_mb: 512.0,
            ..ResourceSample::default()
        };
        peak.fold_peak(&ResourceSample {
            cpu_percent: 25.0,
            memory_mb: 900.0,
            disk_read_mb_s: 3.5,
            ..ResourceSample::default()
        });
        assert_eq!(peak.cpu_percent, 40.0);
        assert_eq!(peak.memory_mb, 900.0);
        assert_eq!(peak.disk_read_mb_s, 3.5);
    }

    #[test]
    fn test_fold_peak_gpu_optional() {
        let mut peak = ResourceSample::default();
        assert!(peak.gpu_percent.is_none());
        peak.fold_peak(&ResourceSample {
            gpu_percent: Some(55.0),
            ..ResourceSample::default()
        });
        assert_eq!(peak.gpu_percent, Some(55.0));
    }

    #[test]
    fn test_result_success_predicate() {
        let result = ExecutionResult {
            operator_id: "a".into(),
            node_id: "n1".into(),
            exit_code: exit_code::SUCCESS,
            duration_secs: 1.5,
            peak: ResourceSample::default(),
            status: OperatorStatus::Succeeded,
        };
        assert!(result.is_success());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&OperatorStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }
}
