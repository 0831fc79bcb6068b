//! Interpreter-project backend: isolated interpreter environment
//! installed from the operator's `pyproject.toml`.

use std::path::Path;

use prodline_types::errors::PipelineError;

use super::Activation;
use crate::exec;

pub(super) async fn install(
    env_name: &str,
    root: &Path,
    code_path: &Path,
    extra_args: &[String],
) -> Result<(), PipelineError> {
    if let Some(parent) = root.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| install_error(env_name, format!("cannot create env root: {e}")))?;
    }

    let out = exec::capture("uv", &["venv".to_string(), root.display().to_string()], None)
        .await
        .map_err(|e| install_error(env_name, e.to_string()))?;
    if !out.success() {
        return Err(install_error(
            env_name,
            format!("uv venv failed:\n{}", out.diagnostic()),
        ));
    }

    let python = root.join("bin").join("python");
    let mut args: Vec<String> = ["-m", "pip", "install", "-e", "."]
        .iter()
        .map(ToString::to_string)
        .collect();
    args.extend(extra_args.iter().cloned());

    let out = exec::capture(&python.display().to_string(), &args, Some(code_path))
        .await
        .map_err(|e| install_error(env_name, e.to_string()))?;
    if !out.success() {
        return Err(install_error(
            env_name,
            format!("dependency install failed:\n{}", out.diagnostic()),
        ));
    }
    Ok(())
}

pub(super) fn activation(root: &Path) -> Activation {
    let bin = root.join("bin");
    Activation {
        prefix: Vec::new(),
        env: vec![
            ("PATH".to_string(), prepend_path(&bin)),
            ("VIRTUAL_ENV".to_string(), root.display().to_string()),
            ("UV_ENV_ACTIVATED".to_string(), "true".to_string()),
        ],
    }
}

pub(super) fn prepend_path(bin: &Path) -> String {
    format!(
        "{}:{}",
        bin.display(),
        std::env::var("PATH").unwrap_or_default()
    )
}

fn install_error(env_name: &str, diagnostic: String) -> PipelineError {
    PipelineError::EnvInstall {
        env_name: env_name.to_string(),
        diagnostic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_prepends_bin_to_path() {
        let activation = activation(Path::new("/envs/demo"));
        let path = &activation.env.iter().find(|(k, _)| k == "PATH").unwrap().1;
        assert!(path.starts_with("/envs/demo/bin:"));
    }

    #[test]
    fn test_activation_sets_virtual_env() {
        let activation = activation(Path::new("/envs/demo"));
        let venv = &activation.env.iter().find(|(k, _)| k == "VIRTUAL_ENV").unwrap().1;
        assert_eq!(venv, "/envs/demo");
        assert!(activation.prefix.is_empty());
    }
}
