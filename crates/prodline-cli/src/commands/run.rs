use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use prodline_engine::execution::{ExecutionOptions, RunScope};
use prodline_engine::orchestrator::{Orchestrator, RunOutcome};
use prodline_engine::report::PipelineReport;
use prodline_engine::sources::GitCli;
use prodline_engine::storage::UnconfiguredStore;

pub async fn execute(
    conf: &Path,
    node: Option<String>,
    operator: Option<String>,
    dump_integrated: bool,
) -> Result<()> {
    let scope = match (node, operator) {
        (Some(node_id), _) => RunScope::Node(node_id),
        (_, Some(operator_id)) => RunScope::Operator(operator_id),
        _ => RunScope::Pipeline,
    };
    let options = ExecutionOptions {
        scope,
        plan_only: false,
        dump_integrated,
    };

    let orchestrator = Orchestrator::new(Arc::new(UnconfiguredStore), Arc::new(GitCli));
    match orchestrator.run(conf, &options).await {
        Ok(RunOutcome::Report(report)) => {
            print_report(&report);
            if !report.succeeded {
                std::process::exit(report.overall_exit_code());
            }
            Ok(())
        }
        // plan_only is false, so a Plan outcome cannot occur.
        Ok(RunOutcome::Plan(_)) => Ok(()),
        Err(e) => {
            tracing::error!("Pipeline run failed: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn print_report(report: &PipelineReport) {
    let verdict = if report.succeeded { "succeeded" } else { "FAILED" };
    println!(
        "pipeline {} {verdict} in {:.1}s ({} operator(s))",
        report.pipeline_id,
        report.duration_secs,
        report.results.len()
    );
    for result in &report.results {
        println!(
            "  {:<24} {:?} exit={} duration={:.1}s peak_mem={:.1}MB peak_cpu={:.1}%",
            result.operator_id,
            result.status,
            result.exit_code,
            result.duration_secs,
            result.peak.memory_mb,
            result.peak.cpu_percent,
        );
    }
    let peak = report.peak();
    println!(
        "peak across run: cpu={:.1}% mem={:.1}MB disk_r={:.2}MB/s disk_w={:.2}MB/s",
        peak.cpu_percent, peak.memory_mb, peak.disk_read_mb_s, peak.disk_write_mb_s
    );
}
