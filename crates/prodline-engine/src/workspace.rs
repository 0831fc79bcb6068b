//! Pipeline working-directory layout and per-operator standard paths.
//!
//! ```text
//! <work_dir>/
//! ├── logs/
//! ├── input/<operator_id>/
//! ├── output/
//! ├── workspace/<operator_id>/                       # operator output root
//! ├── workspace/<pipeline>/<node>/<operator_id>/     # scratch space
//! ├── operators/<operator_id>/                       # source checkouts
//! └── envs/<env_name>/                               # environments
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

/// Standard paths handed to one operator through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorPaths {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub workspace_root: PathBuf,
}

impl Workspace {
    /// Materialize the standard directory layout under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created.
    pub fn init(root: &Path) -> Result<Self> {
        for subdir in ["logs", "input", "output", "workspace"] {
            let dir = root.join(subdir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        tracing::info!(root = %root.display(), "Workspace initialized");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where operator source checkouts live.
    pub fn sources_dir(&self) -> PathBuf {
        self.root.join("operators")
    }

    /// Where environments are installed.
    pub fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    /// Standard paths for one operator, created on demand.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created.
    pub fn operator_paths(
        &self,
        pipeline_id: &str,
        node_id: &str,
        operator_id: &str,
    ) -> Result<OperatorPaths> {
        let paths = OperatorPaths {
            input_root: self.root.join("input").join(operator_id),
            output_root: self.root.join("workspace").join(operator_id),
            workspace_root: self
                .root
                .join("workspace")
                .join(pipeline_id)
                .join(node_id)
                .join(operator_id),
        };
        for dir in [&paths.input_root, &paths.output_root, &paths.workspace_root] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(paths)
    }
}

impl OperatorPaths {
    /// The identity and path variables every operator process receives.
    pub fn standard_env(
        &self,
        pipeline_id: &str,
        node_id: &str,
        operator_id: &str,
    ) -> Vec<(String, String)> {
        vec![
            ("PIPELINE_ID".to_string(), pipeline_id.to_string()),
            ("NODE_ID".to_string(), node_id.to_string()),
            ("OPERATOR_ID".to_string(), operator_id.to_string()),
            (
                "INPUT_ROOT".to_string(),
                self.input_root.display().to_string(),
            ),
            (
                "OUTPUT_ROOT".to_string(),
                self.output_root.display().to_string(),
            ),
            (
                "WORKSPACE_ROOT".to_string(),
                self.workspace_root.display().to_string(),
            ),
        ]
    }
}
