//! Pipeline error taxonomy.
//!
//! Configuration and graph variants are fatal before any operator runs;
//! per-operator variants are recorded on that operator's result and halt
//! the pipeline. `Other` wraps opaque infrastructure faults that carry
//! no schedule-level meaning.

use thiserror::Error;

use crate::environment::EnvKind;
use crate::result::exit_code;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or invalid specification. `path` names the offending
    /// field.
    #[error("invalid configuration at '{path}': {message}")]
    Config { path: String, message: String },

    /// A declared reference does not resolve to a known component.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// The operator dependency relation contains a cycle.
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// The same environment name was requested under two backends.
    #[error(
        "environment name '{name}' is registered as {existing} but was requested as {requested}"
    )]
    DuplicateEnvName {
        name: String,
        existing: EnvKind,
        requested: EnvKind,
    },

    /// An environment backend's install step failed. Terminal for the
    /// owning operator; no retry.
    #[error("environment install failed for '{env_name}': {diagnostic}")]
    EnvInstall { env_name: String, diagnostic: String },

    /// The monitored child did not exit before its deadline.
    #[error("operator '{operator_id}' timed out after {timeout_secs}s")]
    ExecutionTimeout {
        operator_id: String,
        timeout_secs: u64,
    },

    /// The operator process exited nonzero.
    #[error("operator '{operator_id}' failed with exit code {code}")]
    BusinessLogic { operator_id: String, code: i32 },

    /// The environment exists but could not be activated for a command.
    #[error("environment activation failed for '{env_name}': {message}")]
    EnvironmentActivation { env_name: String, message: String },

    /// Infrastructure fault (I/O, subprocess plumbing, object store).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error per the reserved table.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. }
            | Self::MissingDependency(_)
            | Self::CyclicDependency { .. }
            | Self::DuplicateEnvName { .. }
            | Self::Other(_) => exit_code::CONFIG,
            Self::EnvInstall { .. } | Self::EnvironmentActivation { .. } => {
                exit_code::ENVIRONMENT
            }
            Self::ExecutionTimeout { .. } => exit_code::RESOURCE,
            Self::BusinessLogic { code, .. } => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_names_members_in_order() {
        let err = PipelineError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_duplicate_env_name_names_both_kinds() {
        let err = PipelineError::DuplicateEnvName {
            name: "shared".into(),
            existing: EnvKind::UvProject,
            requested: EnvKind::CondaArchive,
        };
        let msg = err.to_string();
        assert!(msg.contains("uv_project"));
        assert!(msg.contains("conda_archive"));
        assert!(msg.contains("shared"));
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(
            PipelineError::config("nodes[0].node_id", "empty").exit_code(),
            exit_code::CONFIG
        );
        assert_eq!(
            PipelineError::ExecutionTimeout {
                operator_id: "a".into(),
                timeout_secs: 10
            }
            .exit_code(),
            exit_code::RESOURCE
        );
        assert_eq!(
            PipelineError::EnvInstall {
                env_name: "e".into(),
                diagnostic: "boom".into()
            }
            .exit_code(),
            exit_code::ENVIRONMENT
        );
        assert_eq!(
            PipelineError::BusinessLogic {
                operator_id: "a".into(),
                code: 3
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn test_from_anyhow_is_infrastructure() {
        let err: PipelineError = anyhow::anyhow!("disk on fire").into();
        assert!(matches!(err, PipelineError::Other(_)));
        assert_eq!(err.exit_code(), exit_code::CONFIG);
    }
}
