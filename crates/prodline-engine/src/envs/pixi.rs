//! Declarative-environment backend: environment built from the
//! operator's `pixi.toml` manifest.

use std::path::Path;

use prodline_types::errors::PipelineError;

use super::{uv::prepend_path, Activation};
use crate::exec;

pub(super) async fn install(
    env_name: &str,
    manifest: &Path,
    code_path: &Path,
    extra_args: &[String],
) -> Result<(), PipelineError> {
    if !manifest.exists() {
        return Err(PipelineError::EnvInstall {
            env_name: env_name.to_string(),
            diagnostic: format!("manifest not found: {}", manifest.display()),
        });
    }

    let mut args = vec![
        "install".to_string(),
        "--manifest-path".to_string(),
        manifest.display().to_string(),
    ];
    args.extend(extra_args.iter().cloned());

    let out = exec::capture("pixi", &args, Some(code_path))
        .await
        .map_err(|e| PipelineError::EnvInstall {
            env_name: env_name.to_string(),
            diagnostic: e.to_string(),
        })?;
    if !out.success() {
        return Err(PipelineError::EnvInstall {
            env_name: env_name.to_string(),
            diagnostic: format!("pixi install failed:\n{}", out.diagnostic()),
        });
    }
    Ok(())
}

/// Activation wraps the command through pixi's own run-in-environment
/// invocation.
pub(super) fn activation(env_name: &str, root: &Path, manifest: &Path) -> Activation {
    Activation {
        prefix: vec![
            "pixi".to_string(),
            "run".to_string(),
            "--manifest-path".to_string(),
            manifest.display().to_string(),
        ],
        env: vec![
            ("PATH".to_string(), prepend_path(&root.join("bin"))),
            ("CONDA_DEFAULT_ENV".to_string(), env_name.to_string()),
            ("CONDA_PREFIX".to_string(), root.display().to_string()),
            ("PIXI_ENV_ACTIVATED".to_string(), "true".to_string()),
        ],
    }
}
