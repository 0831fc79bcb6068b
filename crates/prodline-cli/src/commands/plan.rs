use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use prodline_engine::execution::ExecutionOptions;
use prodline_engine::orchestrator::{Orchestrator, RunOutcome};
use prodline_engine::sources::GitCli;
use prodline_engine::storage::UnconfiguredStore;

pub async fn execute(conf: &Path) -> Result<()> {
    let options = ExecutionOptions {
        plan_only: true,
        ..ExecutionOptions::default()
    };

    let orchestrator = Orchestrator::new(Arc::new(UnconfiguredStore), Arc::new(GitCli));
    match orchestrator.run(conf, &options).await {
        Ok(RunOutcome::Plan(schedule)) => {
            println!("execution schedule:");
            for (i, node) in schedule.nodes.iter().enumerate() {
                println!(
                    "  {}. node {}: {}",
                    i + 1,
                    node.node_id,
                    node.operators.join(" -> ")
                );
            }
            Ok(())
        }
        Ok(RunOutcome::Report(_)) => Ok(()),
        Err(e) => {
            tracing::error!("Plan failed: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
