//! Aggregate run reporting.

use prodline_types::result::{exit_code, ExecutionResult, ResourceSample};

/// Summary of one pipeline run: every attempted operator's result,
/// total wall-clock time, and the peak resource readings across all of
/// them.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub pipeline_id: String,
    pub succeeded: bool,
    pub results: Vec<ExecutionResult>,
    pub duration_secs: f64,
}

impl PipelineReport {
    /// Per-field maxima over every operator's peak sample.
    pub fn peak(&self) -> ResourceSample {
        let mut peak = ResourceSample::default();
        for result in &self.results {
            peak.fold_peak(&result.peak);
        }
        peak
    }

    /// The first non-success result, if any. Fail-fast execution means
    /// it is also the last result.
    pub fn failure(&self) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| !r.is_success())
    }

    /// Process exit code for the whole run: 0 on success, otherwise the
    /// failing operator's code.
    pub fn overall_exit_code(&self) -> i32 {
        if self.succeeded {
            exit_code::SUCCESS
        } else {
            self.failure()
                .map(|r| r.exit_code)
                .unwrap_or(exit_code::CONFIG)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodline_types::result::OperatorStatus;

    fn result(op: &str, code: i32, status: OperatorStatus, mem: f64) -> ExecutionResult {
        ExecutionResult {
            operator_id: op.into(),
            node_id: "n1".into(),
            exit_code: code,
            duration_secs: 1.0,
            peak: ResourceSample {
                memory_mb: mem,
                ..ResourceSample::default()
            },
            status,
        }
    }

    #[test]
    fn test_successful_report_exit_code_zero() {
        let report = PipelineReport {
            pipeline_id: "pl".into(),
            succeeded: true,
            results: vec![result("a", 0, OperatorStatus::Succeeded, 100.0)],
            duration_secs: 2.0,
        };
        assert_eq!(report.overall_exit_code(), 0);
        assert!(report.failure().is_none());
    }

    #[test]
    fn test_failed_report_carries_operator_code() {
        let report = PipelineReport {
            pipeline_id: "pl".into(),
            succeeded: false,
            results: vec![
                result("a", 0, OperatorStatus::Succeeded, 100.0),
                result("b", 3, OperatorStatus::Failed, 50.0),
            ],
            duration_secs: 2.0,
        };
        assert_eq!(report.overall_exit_code(), 3);
        assert_eq!(report.failure().unwrap().operator_id, "b");
    }

    #[test]
    fn test_peak_folds_across_operators() {
        let report = PipelineReport {
            pipeline_id: "pl".into(),
            succeeded: true,
            results: vec![
                result("a", 0, OperatorStatus::Succeeded, 100.0),
                result("b", 0, OperatorStatus::Succeeded, 300.0),
            ],
            duration_secs: 2.0,
        };
        assert_eq!(report.peak().memory_mb, 300.0);
    }
}
