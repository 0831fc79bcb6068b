use std::path::Path;

use anyhow::Result;

use prodline_engine::config::ConfigResolver;
use prodline_engine::graph::DependencyGraph;
use prodline_engine::storage::UnconfiguredStore;

/// Resolve, validate, and schedule-check a pipeline without running it.
pub async fn execute(conf: &Path) -> Result<()> {
    let store = UnconfiguredStore;
    let config_root = conf.parent().unwrap_or(Path::new("."));
    let resolver = ConfigResolver::new(config_root, &store);

    let spec = match resolver.resolve(conf) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("configuration invalid: {e}");
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = DependencyGraph::build(&spec).and_then(|g| g.schedule()) {
        eprintln!("schedule invalid: {e}");
        std::process::exit(e.exit_code());
    }

    println!("configuration valid: {}", conf.display());
    println!("  pipeline:  {} ({})", spec.pipeline_id, spec.name);
    println!("  operators: {}", spec.operators.len());
    println!("  nodes:     {}", spec.nodes.len());
    Ok(())
}
