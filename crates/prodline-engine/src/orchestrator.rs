//! Pipeline orchestration: the run state machine composing resolution,
//! scheduling, environment provisioning, and execution.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;

use prodline_types::errors::PipelineError;
use prodline_types::operator::OperatorSpec;
use prodline_types::pipeline::PipelineSpec;
use prodline_types::result::{exit_code, ExecutionResult, OperatorStatus, ResourceSample};

use crate::config::ConfigResolver;
use crate::envs::EnvironmentManager;
use crate::exec::{ExecutionRequest, ProcessExecutor};
use crate::execution::{ExecutionOptions, RunScope};
use crate::graph::{DependencyGraph, Schedule, ScheduledNode};
use crate::report::PipelineReport;
use crate::sources::SourceFetcher;
use crate::storage::ObjectStore;
use crate::workspace::Workspace;

/// Run lifecycle states. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Resolving,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Either an executed run's report or, in plan mode, the schedule that
/// would have run.
#[derive(Debug)]
pub enum RunOutcome {
    Report(PipelineReport),
    Plan(Schedule),
}

pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn SourceFetcher>,
    executor: ProcessExecutor,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            store,
            fetcher,
            executor: ProcessExecutor::new(),
        }
    }

    /// Drive one pipeline run end to end:
    /// resolve -> schedule -> (plan mode stops here) -> execute.
    ///
    /// Per-operator failures produce a failed report; configuration and
    /// graph errors fail the run before any operator executes.
    ///
    /// # Errors
    ///
    /// `Config`/`MissingDependency`/`CyclicDependency`/`DuplicateEnvName`
    /// during resolution and scheduling; infrastructure faults as
    /// `Other`.
    pub async fn run(
        &self,
        pipeline_file: &Path,
        options: &ExecutionOptions,
    ) -> Result<RunOutcome, PipelineError> {
        let mut state = RunState::Pending;

        transition(&mut state, RunState::Resolving);
        let config_root = pipeline_file.parent().unwrap_or(Path::new("."));
        let mut resolver = ConfigResolver::new(config_root, self.store.as_ref());
        resolver.dump_integrated = options.dump_integrated;
        let spec = resolver.resolve(pipeline_file)?;
        log_spec(&spec);

        transition(&mut state, RunState::Scheduled);
        let schedule = DependencyGraph::build(&spec)?.schedule()?;
        let schedule = narrow(schedule, &options.scope, &spec)?;

        if options.plan_only {
            tracing::info!(pipeline = spec.pipeline_id, "Plan mode, skipping execution");
            return Ok(RunOutcome::Plan(schedule));
        }

        transition(&mut state, RunState::Running);
        let start = Instant::now();
        let workspace = Workspace::init(&spec.work_dir)?;
        let envs = EnvironmentManager::new(workspace.envs_dir(), self.store.clone());

        let mut results = Vec::new();
        for node in &schedule.nodes {
            tracing::info!(node = node.node_id, "Starting node");
            for operator_id in &node.operators {
                let op = spec
                    .operator(operator_id)
                    .ok_or_else(|| anyhow!("scheduled operator '{operator_id}' missing from spec"))?;

                let result = self
                    .run_operator(&spec, &node.node_id, op, &workspace, &envs)
                    .await;
                let ok = result.is_success();
                if !ok {
                    if let Some(err) = halt_error(&result, op.timeout_secs) {
                        tracing::error!("Halting pipeline: {err}");
                    }
                    results.push(result);
                    transition(&mut state, RunState::Failed);
                    let report = finish(&spec, false, results, start);
                    return Ok(RunOutcome::Report(report));
                }
                results.push(result);
            }
            tracing::info!(node = node.node_id, "Node complete");
        }

        let evicted = envs.sweep(crate::envs::DEFAULT_EVICTION_TTL);
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "Evicted stale environments");
        }

        transition(&mut state, RunState::Completed);
        Ok(RunOutcome::Report(finish(&spec, true, results, start)))
    }

    /// Run one operator: source checkout, environment lease, merged
    /// environment, monitored execution. Always yields exactly one
    /// result; provisioning failures become `environment_error`.
    async fn run_operator(
        &self,
        spec: &PipelineSpec,
        node_id: &str,
        op: &OperatorSpec,
        workspace: &Workspace,
        envs: &EnvironmentManager,
    ) -> ExecutionResult {
        tracing::info!(operator = op.operator_id, "Starting operator");

        let code_path = workspace.sources_dir().join(&op.operator_id);
        if let Err(e) = self.checkout_source(op, &code_path).await {
            tracing::error!(operator = op.operator_id, "Source checkout failed: {e}");
            return environment_failure(op, node_id);
        }

        let lease = match envs.checkout(&op.environment, &code_path).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!(operator = op.operator_id, "Environment not ready: {e}");
                return environment_failure(op, node_id);
            }
        };

        let paths = match workspace.operator_paths(&spec.pipeline_id, node_id, &op.operator_id) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::error!(operator = op.operator_id, "Workspace layout failed: {e}");
                return environment_failure(op, node_id);
            }
        };

        // Precedence: inherited process env < activation < operator
        // extras < engine-owned identity variables.
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(lease.activation.env.iter().cloned());
        env.extend(op.extra_env.clone());
        env.extend(paths.standard_env(&spec.pipeline_id, node_id, &op.operator_id));

        let command = if lease.activation.prefix.is_empty() {
            op.start_command.clone()
        } else {
            format!("{} {}", lease.activation.prefix.join(" "), op.start_command)
        };

        let request = ExecutionRequest {
            pipeline_id: spec.pipeline_id.clone(),
            node_id: node_id.to_string(),
            operator_id: op.operator_id.clone(),
            command,
            cwd: code_path,
            env,
            timeout: Duration::from_secs(op.timeout_secs),
        };

        let result = match self.executor.execute(&request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(operator = op.operator_id, "Execution failed to start: {e}");
                environment_failure(op, node_id)
            }
        };
        drop(lease);

        tracing::info!(
            operator = op.operator_id,
            status = ?result.status,
            exit_code = result.exit_code,
            "Operator finished"
        );
        result
    }

    async fn checkout_source(
        &self,
        op: &OperatorSpec,
        dest: &Path,
    ) -> Result<(), PipelineError> {
        let fetcher = self.fetcher.clone();
        let repo = op.source.repo.clone();
        let tag = op.source.tag.clone();
        let dest: PathBuf = dest.to_path_buf();
        tokio::task::spawn_blocking(move || fetcher.checkout(&repo, &tag, &dest))
            .await
            .map_err(|e| PipelineError::Other(anyhow!("source checkout task panicked: {e}")))?
            .map_err(PipelineError::Other)
    }
}

fn transition(state: &mut RunState, next: RunState) {
    tracing::info!(from = %state, to = %next, "Run state transition");
    *state = next;
}

/// Narrow the schedule to the selected scope. Unknown selections are
/// rejected, never silently widened.
fn narrow(
    schedule: Schedule,
    scope: &RunScope,
    spec: &PipelineSpec,
) -> Result<Schedule, PipelineError> {
    match scope {
        RunScope::Pipeline => Ok(schedule),
        RunScope::Node(node_id) => {
            let node = schedule
                .nodes
                .iter()
                .find(|n| &n.node_id == node_id)
                .cloned()
                .ok_or_else(|| {
                    PipelineError::MissingDependency(format!(
                        "selected node '{node_id}' does not exist"
                    ))
                })?;
            Ok(Schedule { nodes: vec![node] })
        }
        RunScope::Operator(operator_id) => {
            let owner = spec.node_of(operator_id).ok_or_else(|| {
                PipelineError::MissingDependency(format!(
                    "selected operator '{operator_id}' does not exist or has no node"
                ))
            })?;
            Ok(Schedule {
                nodes: vec![ScheduledNode {
                    node_id: owner.node_id.clone(),
                    operators: vec![operator_id.clone()],
                }],
            })
        }
    }
}

/// The pipeline-level error a non-success result halts the run with.
/// Environment failures were already reported with their own error at
/// provisioning time.
fn halt_error(result: &ExecutionResult, timeout_secs: u64) -> Option<PipelineError> {
    match result.status {
        OperatorStatus::TimedOut => Some(PipelineError::ExecutionTimeout {
            operator_id: result.operator_id.clone(),
            timeout_secs,
        }),
        OperatorStatus::Failed => Some(PipelineError::BusinessLogic {
            operator_id: result.operator_id.clone(),
            code: result.exit_code,
        }),
        OperatorStatus::Succeeded | OperatorStatus::EnvironmentError => None,
    }
}

fn environment_failure(op: &OperatorSpec, node_id: &str) -> ExecutionResult {
    ExecutionResult {
        operator_id: op.operator_id.clone(),
        node_id: node_id.to_string(),
        exit_code: exit_code::ENVIRONMENT,
        duration_secs: 0.0,
        peak: ResourceSample::default(),
        status: OperatorStatus::EnvironmentError,
    }
}

fn finish(
    spec: &PipelineSpec,
    succeeded: bool,
    results: Vec<ExecutionResult>,
    start: Instant,
) -> PipelineReport {
    let report = PipelineReport {
        pipeline_id: spec.pipeline_id.clone(),
        succeeded,
        results,
        duration_secs: start.elapsed().as_secs_f64(),
    };
    let peak = report.peak();
    tracing::info!(
        pipeline = report.pipeline_id,
        succeeded = report.succeeded,
        operators = report.results.len(),
        duration_secs = report.duration_secs,
        peak_memory_mb = format!("{:.2}", peak.memory_mb),
        peak_cpu_percent = format!("{:.2}", peak.cpu_percent),
        "Pipeline run finished"
    );
    report
}

fn log_spec(spec: &PipelineSpec) {
    tracing::info!(
        pipeline = spec.pipeline_id,
        name = spec.name,
        work_dir = %spec.work_dir.display(),
        operators = spec.operators.len(),
        nodes = spec.nodes.len(),
        log_level = spec.log.level,
        "Resolved pipeline"
    );
    for op in &spec.operators {
        tracing::info!(
            operator = op.operator_id,
            repo = op.source.repo,
            tag = op.source.tag,
            upstream = ?op.upstream,
            env = op.environment.env_name(),
            "Operator"
        );
    }
    for node in &spec.nodes {
        tracing::info!(
            node = node.node_id,
            operators = ?node.operators,
            runner_count = node.runner_count,
            "Node"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use anyhow::Result as AnyResult;

    /// Test fetcher: materializes an empty checkout directory.
    struct DirFetcher;

    impl SourceFetcher for DirFetcher {
        fn checkout(&self, _repo: &str, _tag: &str, dest: &Path) -> AnyResult<()> {
            std::fs::create_dir_all(dest)?;
            Ok(())
        }
    }

    fn write_pipeline(dir: &Path, work_dir: &Path, operators: &[(&str, &str, &[&str])]) -> PathBuf {
        // operators: (id, start_command, upstream)
        let ops_yaml: String = operators
            .iter()
            .map(|(id, cmd, upstream)| {
                format!(
                    r#"  - operator_id: {id}
    source: {{ repo: "git@example.com:x/{id}.git", tag: v1.0.0 }}
    upstream: [{}]
    environment:
      type: uv_project
      env_name: {id}
      pyproject_path: pyproject.toml
    start_command: "{cmd}"
    timeout_secs: 30
"#,
                    upstream.join(", ")
                )
            })
            .collect();
        let members: Vec<String> = operators.iter().map(|(id, ..)| id.to_string()).collect();
        let yaml = format!(
            r#"pipeline_id: test_line
name: Test line
work_dir: {}
nodes:
  - node_id: n1
    operators: [{}]
    resources:
      cpu_request: 1.0
      cpu_limit: 2.0
      memory_request_gb: 1.0
      memory_limit_gb: 2.0
operators:
{}"#,
            work_dir.display(),
            members.join(", "),
            ops_yaml
        );
        let file = dir.join("pipeline.yaml");
        std::fs::write(&file, yaml).unwrap();
        file
    }

    /// Pre-create env roots so checkout reuses them without installers.
    fn seed_envs(work_dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::create_dir_all(work_dir.join("envs").join(name)).unwrap();
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(MemoryStore::new()), Arc::new(DirFetcher))
    }

    #[tokio::test]
    async fn test_full_run_produces_result_per_operator() {
        let _env_guard = crate::config::overrides::test_support::env_guard();
        let conf = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let file = write_pipeline(
            conf.path(),
            work.path(),
            &[("a", "true", &[]), ("b", "true", &["a"])],
        );
        seed_envs(work.path(), &["a", "b"]);

        let outcome = orchestrator()
            .run(&file, &ExecutionOptions::default())
            .await
            .unwrap();
        let RunOutcome::Report(report) = outcome else {
            panic!("expected report");
        };
        assert!(report.succeeded);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].operator_id, "a");
        assert_eq!(report.results[1].operator_id, "b");
        assert_eq!(report.overall_exit_code(), 0);
    }

    #[tokio::test]
    async fn test_fail_fast_halts_remaining_work() {
        let _env_guard = crate::config::overrides::test_support::env_guard();
        let conf = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let file = write_pipeline(
            conf.path(),
            work.path(),
            &[("a", "exit 3", &[]), ("b", "true", &["a"])],
        );
        seed_envs(work.path(), &["a", "b"]);

        let outcome = orchestrator()
            .run(&file, &ExecutionOptions::default())
            .await
            .unwrap();
        let RunOutcome::Report(report) = outcome else {
            panic!("expected report");
        };
        assert!(!report.succeeded);
        // b was never attempted
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].status, OperatorStatus::Failed);
        assert_eq!(report.overall_exit_code(), 3);
    }

    #[tokio::test]
    async fn test_selective_operator_runs_exactly_one() {
        let _env_guard = crate::config::overrides::test_support::env_guard();
        let conf = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let file = write_pipeline(
            conf.path(),
            work.path(),
            &[("a", "true", &[]), ("b", "true", &[])],
        );
        seed_envs(work.path(), &["a", "b"]);

        let options = ExecutionOptions {
            scope: RunScope::Operator("b".to_string()),
            ..ExecutionOptions::default()
        };
        let outcome = orchestrator().run(&file, &options).await.unwrap();
        let RunOutcome::Report(report) = outcome else {
            panic!("expected report");
        };
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].operator_id, "b");
        assert_eq!(report.results[0].node_id, "n1");
    }

    #[tokio::test]
    async fn test_selective_unknown_operator_rejected() {
        let _env_guard = crate::config::overrides::test_support::env_guard();
        let conf = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let file = write_pipeline(conf.path(), work.path(), &[("a", "true", &[])]);
        seed_envs(work.path(), &["a"]);

        let options = ExecutionOptions {
            scope: RunScope::Operator("ghost".to_string()),
            ..ExecutionOptions::default()
        };
        let err = orchestrator().run(&file, &options).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingDependency(_)));
    }

    #[tokio::test]
    async fn test_plan_mode_executes_nothing() {
        let _env_guard = crate::config::overrides::test_support::env_guard();
        let conf = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let file = write_pipeline(
            conf.path(),
            work.path(),
            &[("a", "touch ran_marker", &[])],
        );

        let options = ExecutionOptions {
            plan_only: true,
            ..ExecutionOptions::default()
        };
        let outcome = orchestrator().run(&file, &options).await.unwrap();
        let RunOutcome::Plan(schedule) = outcome else {
            panic!("expected plan");
        };
        assert_eq!(schedule.nodes.len(), 1);
        assert_eq!(schedule.nodes[0].operators, vec!["a"]);
        // No workspace was materialized, nothing ran.
        assert!(!work.path().join("operators").exists());
    }

    #[tokio::test]
    async fn test_env_install_failure_is_environment_error() {
        let _env_guard = crate::config::overrides::test_support::env_guard();
        let conf = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        // conda env whose archive is absent from the store; install runs
        // and fails at fetch.
        let yaml = format!(
            r#"pipeline_id: test_line
name: Test line
work_dir: {}
nodes:
  - node_id: n1
    operators: [a]
    resources:
      cpu_request: 1.0
      cpu_limit: 2.0
      memory_request_gb: 1.0
      memory_limit_gb: 2.0
operators:
  - operator_id: a
    source: {{ repo: "git@example.com:x/a.git", tag: v1.0.0 }}
    environment:
      type: conda_archive
      env_name: a
      archive_uri: tos://conda-envs/absent.zst
      run_repair: false
    start_command: "true"
"#,
            work.path().display()
        );
        let file = conf.path().join("pipeline.yaml");
        std::fs::write(&file, yaml).unwrap();

        let outcome = orchestrator()
            .run(&file, &ExecutionOptions::default())
            .await
            .unwrap();
        let RunOutcome::Report(report) = outcome else {
            panic!("expected report");
        };
        assert!(!report.succeeded);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].status, OperatorStatus::EnvironmentError);
        assert_eq!(report.overall_exit_code(), exit_code::ENVIRONMENT);
    }

    #[tokio::test]
    async fn test_standard_env_vars_reach_operator() {
        let _env_guard = crate::config::overrides::test_support::env_guard();
        let conf = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let file = write_pipeline(
            conf.path(),
            work.path(),
            &[(
                "a",
                "test \\\"$PIPELINE_ID\\\" = test_line && test \\\"$OPERATOR_ID\\\" = a && test -d \\\"$WORKSPACE_ROOT\\\"",
                &[],
            )],
        );
        seed_envs(work.path(), &["a"]);

        let outcome = orchestrator()
            .run(&file, &ExecutionOptions::default())
            .await
            .unwrap();
        let RunOutcome::Report(report) = outcome else {
            panic!("expected report");
        };
        assert!(report.succeeded, "results: {:?}", report.results);
    }
}
