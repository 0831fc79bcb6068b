//! Pipeline spec: the full ordered set of nodes plus global configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::node::NodeSpec;
use crate::operator::OperatorSpec;

/// Log sink configuration. Rotation and retention are hints handed to
/// external log management; the engine itself only honors level and path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub path: Option<PathBuf>,
    pub rotation: String,
    pub retention_days: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: None,
            rotation: "10 GB".to_string(),
            retention_days: 30,
        }
    }
}

/// The resolved pipeline: identity, workspace root, log configuration,
/// and the node/operator specs it owns. Nothing is shared across
/// pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub pipeline_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Local working directory holding checkouts, environments, and
    /// per-operator workspaces.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub log: LogConfig,
    pub nodes: Vec<NodeSpec>,
    pub operators: Vec<OperatorSpec>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./pipeline_workspace")
}

impl PipelineSpec {
    pub fn operator(&self, operator_id: &str) -> Option<&OperatorSpec> {
        self.operators.iter().find(|op| op.operator_id == operator_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// The node that declares `operator_id` as a member.
    pub fn node_of(&self, operator_id: &str) -> Option<&NodeSpec> {
        self.nodes
            .iter()
            .find(|n| n.operators.iter().any(|id| id == operator_id))
    }

    /// Declaration index of a node, used for deterministic ordering.
    pub fn node_index(&self, node_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.node_id == node_id)
    }
}
