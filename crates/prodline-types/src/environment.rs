//! Environment specs: the three isolated-runtime backends and their
//! shared `(kind, name)` identity.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment backend discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvKind {
    UvProject,
    PixiProject,
    CondaArchive,
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UvProject => "uv_project",
            Self::PixiProject => "pixi_project",
            Self::CondaArchive => "conda_archive",
        };
        f.write_str(s)
    }
}

fn default_channels() -> Vec<String> {
    vec!["conda-forge".to_string()]
}

fn default_true() -> bool {
    true
}

/// Backend-specific environment description.
///
/// `(kind, env_name)` is the identity used for reuse and eviction; the
/// same name under a different kind is always rejected, never resolved
/// silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvironmentSpec {
    /// Isolated interpreter environment installed from a project manifest.
    UvProject {
        env_name: String,
        /// Project manifest, relative to the operator checkout.
        /// Must be named `pyproject.toml`.
        pyproject_path: PathBuf,
        #[serde(default)]
        uv_extra_args: Vec<String>,
    },
    /// Declarative environment built from a manifest plus channels.
    PixiProject {
        env_name: String,
        /// Must be named `pixi.toml`, relative to the operator checkout.
        manifest_path: PathBuf,
        #[serde(default = "default_channels")]
        channels: Vec<String>,
        #[serde(default)]
        pixi_extra_args: Vec<String>,
    },
    /// Pre-built environment shipped as a zstd archive in object storage.
    CondaArchive {
        env_name: String,
        /// `provider://bucket/key` location of the archive.
        archive_uri: String,
        /// Run `conda env update --prune` after unpacking to repair paths.
        #[serde(default = "default_true")]
        run_repair: bool,
        #[serde(default)]
        zstd_extra_args: Vec<String>,
    },
}

impl EnvironmentSpec {
    pub fn kind(&self) -> EnvKind {
        match self {
            Self::UvProject { .. } => EnvKind::UvProject,
            Self::PixiProject { .. } => EnvKind::PixiProject,
            Self::CondaArchive { .. } => EnvKind::CondaArchive,
        }
    }

    pub fn env_name(&self) -> &str {
        match self {
            Self::UvProject { env_name, .. }
            | Self::PixiProject { env_name, .. }
            | Self::CondaArchive { env_name, .. } => env_name,
        }
    }
}
