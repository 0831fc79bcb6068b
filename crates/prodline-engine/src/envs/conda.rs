//! Packaged-archive backend: pre-built environment fetched from object
//! storage as a zstd archive and unpacked into the environment root.

use std::path::Path;
use std::str::FromStr;

use prodline_types::errors::PipelineError;
use prodline_types::storage::RemoteUri;

use super::{uv::prepend_path, Activation};
use crate::exec;
use crate::storage::ObjectStore;

pub(super) async fn install(
    env_name: &str,
    root: &Path,
    archive_uri: &str,
    run_repair: bool,
    extra_args: &[String],
    store: &dyn ObjectStore,
) -> Result<(), PipelineError> {
    let uri = RemoteUri::from_str(archive_uri)
        .map_err(|e| install_error(env_name, e.to_string()))?;

    let parent = root
        .parent()
        .ok_or_else(|| install_error(env_name, "environment root has no parent".to_string()))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| install_error(env_name, format!("cannot create env root: {e}")))?;

    tracing::info!(env = env_name, uri = %uri, "Fetching environment archive");
    let bytes = store
        .fetch(&uri)
        .map_err(|e| install_error(env_name, format!("archive fetch failed: {e}")))?;

    let archive = parent.join(format!("{env_name}.zst"));
    std::fs::write(&archive, bytes)
        .map_err(|e| install_error(env_name, format!("cannot write archive: {e}")))?;

    let mut args = vec![
        "-d".to_string(),
        archive.display().to_string(),
        "-o".to_string(),
        root.display().to_string(),
        "--recursive".to_string(),
    ];
    args.extend(extra_args.iter().cloned());

    let out = exec::capture("zstd", &args, None)
        .await
        .map_err(|e| install_error(env_name, e.to_string()))?;
    // The archive is an intermediate either way.
    let _ = std::fs::remove_file(&archive);
    if !out.success() {
        return Err(install_error(
            env_name,
            format!("archive decompress failed:\n{}", out.diagnostic()),
        ));
    }

    if run_repair {
        repair(env_name, root).await;
    }
    Ok(())
}

/// Unpacked environments carry build-machine paths; `conda env update
/// --prune` rewrites them in place. Failures are logged, not fatal.
async fn repair(env_name: &str, root: &Path) {
    let conda = root.join("bin").join("conda");
    if !conda.exists() {
        tracing::debug!(env = env_name, "No conda binary in archive, skipping repair");
        return;
    }
    let args = vec![
        "env".to_string(),
        "update".to_string(),
        "--prefix".to_string(),
        root.display().to_string(),
        "--prune".to_string(),
    ];
    match exec::capture(&conda.display().to_string(), &args, None).await {
        Ok(out) if out.success() => {
            tracing::info!(env = env_name, "Environment repair complete");
        }
        Ok(out) => {
            tracing::warn!(env = env_name, "Environment repair warning:\n{}", out.diagnostic());
        }
        Err(e) => {
            tracing::warn!(env = env_name, "Environment repair failed to run: {e}");
        }
    }
}

pub(super) fn activation(env_name: &str, root: &Path) -> Activation {
    Activation {
        prefix: vec![
            "conda".to_string(),
            "run".to_string(),
            "--prefix".to_string(),
            root.display().to_string(),
        ],
        env: vec![
            ("PATH".to_string(), prepend_path(&root.join("bin"))),
            ("CONDA_DEFAULT_ENV".to_string(), env_name.to_string()),
            ("CONDA_PREFIX".to_string(), root.display().to_string()),
            ("CONDA_SHLVL".to_string(), "1".to_string()),
            ("CONDA_ENV_ACTIVATED".to_string(), "true".to_string()),
        ],
    }
}

fn install_error(env_name: &str, diagnostic: String) -> PipelineError {
    PipelineError::EnvInstall {
        env_name: env_name.to_string(),
        diagnostic,
    }
}
