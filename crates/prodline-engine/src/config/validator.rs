//! Semantic validation for resolved pipeline specs.

use std::collections::HashMap;
use std::str::FromStr;

use prodline_types::environment::{EnvKind, EnvironmentSpec};
use prodline_types::errors::PipelineError;
use prodline_types::pipeline::PipelineSpec;
use prodline_types::storage::RemoteUri;

/// Validate a resolved pipeline spec.
/// Collects every rule violation before failing so a bad spec is fixed
/// in one pass.
///
/// # Errors
///
/// Returns a `Config` error listing all violations with their field
/// paths, or `DuplicateEnvName` when one name spans two backends.
pub fn validate_pipeline(spec: &PipelineSpec) -> Result<(), PipelineError> {
    let mut errors = Vec::new();

    if spec.pipeline_id.trim().is_empty() {
        errors.push("pipeline_id: must not be empty".to_string());
    }
    if spec.name.trim().is_empty() {
        errors.push("name: must not be empty".to_string());
    }
    if spec.nodes.is_empty() {
        errors.push("nodes: pipeline must declare at least one node".to_string());
    }
    if spec.operators.is_empty() {
        errors.push("operators: pipeline must declare at least one operator".to_string());
    }

    validate_operators(spec, &mut errors)?;
    validate_nodes(spec, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::config(
            "pipeline",
            format!("validation failed:\n  - {}", errors.join("\n  - ")),
        ))
    }
}

fn validate_operators(
    spec: &PipelineSpec,
    errors: &mut Vec<String>,
) -> Result<(), PipelineError> {
    let mut seen_ids: HashMap<&str, usize> = HashMap::new();
    // env name -> (kind, first full spec)
    let mut env_identities: HashMap<&str, (EnvKind, &EnvironmentSpec)> = HashMap::new();

    for (i, op) in spec.operators.iter().enumerate() {
        let path = format!("operators[{i}]");
        if op.operator_id.trim().is_empty() {
            errors.push(format!("{path}.operator_id: must not be empty"));
        }
        if let Some(first) = seen_ids.insert(&op.operator_id, i) {
            errors.push(format!(
                "{path}.operator_id: duplicate of operators[{first}] ('{}')",
                op.operator_id
            ));
        }
        if op.start_command.trim().is_empty() {
            errors.push(format!("{path}.start_command: must not be empty"));
        }
        if op.timeout_secs == 0 {
            errors.push(format!("{path}.timeout_secs: must be > 0"));
        }
        if op.source.repo.trim().is_empty() {
            errors.push(format!("{path}.source.repo: must not be empty"));
        }
        if op.source.tag.trim().is_empty() {
            errors.push(format!("{path}.source.tag: must not be empty"));
        }

        validate_environment(&op.environment, &path, errors);

        let name = op.environment.env_name();
        let kind = op.environment.kind();
        match env_identities.get(name) {
            None => {
                env_identities.insert(name, (kind, &op.environment));
            }
            Some((existing, _)) if *existing != kind => {
                // Cross-type collision is its own error class, reported
                // immediately with both kinds named.
                return Err(PipelineError::DuplicateEnvName {
                    name: name.to_string(),
                    existing: *existing,
                    requested: kind,
                });
            }
            Some((_, first_spec)) if *first_spec != &op.environment => {
                errors.push(format!(
                    "{path}.environment: '{name}' redefined with different fields"
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn validate_environment(env: &EnvironmentSpec, path: &str, errors: &mut Vec<String>) {
    if env.env_name().trim().is_empty() {
        errors.push(format!("{path}.environment.env_name: must not be empty"));
    }
    match env {
        EnvironmentSpec::UvProject { pyproject_path, .. } => {
            if pyproject_path.file_name().map(|n| n != "pyproject.toml").unwrap_or(true) {
                errors.push(format!(
                    "{path}.environment.pyproject_path: must point at a pyproject.toml file"
                ));
            }
        }
        EnvironmentSpec::PixiProject { manifest_path, .. } => {
            if manifest_path.file_name().map(|n| n != "pixi.toml").unwrap_or(true) {
                errors.push(format!(
                    "{path}.environment.manifest_path: must point at a pixi.toml file"
                ));
            }
        }
        EnvironmentSpec::CondaArchive { archive_uri, .. } => {
            if let Err(e) = RemoteUri::from_str(archive_uri) {
                errors.push(format!("{path}.environment.archive_uri: {e}"));
            }
        }
    }
}

fn validate_nodes(spec: &PipelineSpec, errors: &mut Vec<String>) {
    let mut seen_nodes: HashMap<&str, usize> = HashMap::new();
    // operator id -> owning node id
    let mut owners: HashMap<&str, &str> = HashMap::new();

    for (i, node) in spec.nodes.iter().enumerate() {
        let path = format!("nodes[{i}]");
        if node.node_id.trim().is_empty() {
            errors.push(format!("{path}.node_id: must not be empty"));
        }
        if let Some(first) = seen_nodes.insert(&node.node_id, i) {
            errors.push(format!(
                "{path}.node_id: duplicate of nodes[{first}] ('{}')",
                node.node_id
            ));
        }
        if node.operators.is_empty() {
            errors.push(format!("{path}.operators: node must list at least one operator"));
        }
        if node.runner_count == 0 {
            errors.push(format!("{path}.runner_count: must be at least 1"));
        }

        let r = &node.resources;
        if r.cpu_request <= 0.0 || r.memory_request_gb <= 0.0 {
            errors.push(format!("{path}.resources: requests must be positive"));
        }
        if r.cpu_limit < r.cpu_request {
            errors.push(format!("{path}.resources.cpu_limit: below cpu_request"));
        }
        if r.memory_limit_gb < r.memory_request_gb {
            errors.push(format!(
                "{path}.resources.memory_limit_gb: below memory_request_gb"
            ));
        }
        if let Some(gpu_limit) = r.gpu_limit {
            if gpu_limit < r.gpu_request {
                errors.push(format!("{path}.resources.gpu_limit: below gpu_request"));
            }
        }

        for (j, member) in node.operators.iter().enumerate() {
            if spec.operator(member).is_none() {
                errors.push(format!(
                    "{path}.operators[{j}]: unknown operator '{member}'"
                ));
                continue;
            }
            if let Some(previous) = owners.insert(member, &node.node_id) {
                errors.push(format!(
                    "{path}.operators[{j}]: operator '{member}' already belongs to node '{previous}'"
                ));
            }
        }
    }

    for op in &spec.operators {
        if !owners.contains_key(op.operator_id.as_str()) {
            errors.push(format!(
                "operators: operator '{}' is not assigned to any node",
                op.operator_id
            ));
        }
    }
}
