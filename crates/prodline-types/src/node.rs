//! Node spec: a group of operators sharing resource bounds.

use serde::{Deserialize, Serialize};

/// Resource bounds for a node. Used as monitoring thresholds only; the
/// engine does not enforce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    /// CPU request in cores.
    pub cpu_request: f64,
    /// CPU ceiling in cores.
    pub cpu_limit: f64,
    /// Memory request in GB.
    pub memory_request_gb: f64,
    /// Memory ceiling in GB.
    pub memory_limit_gb: f64,
    /// GPU request in devices; 0 means no GPU.
    #[serde(default)]
    pub gpu_request: u32,
    /// GPU ceiling; defaults to the request when absent.
    #[serde(default)]
    pub gpu_limit: Option<u32>,
}

impl NodeResources {
    pub fn effective_gpu_limit(&self) -> u32 {
        self.gpu_limit.unwrap_or(self.gpu_request)
    }
}

/// A group of operators scheduled together under shared resource bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: String,
    /// Member operator ids, in declared order.
    pub operators: Vec<String>,
    /// Advisory concurrency hint. The engine executes members
    /// sequentially; a worker-pool scheduler is a future extension.
    #[serde(default = "default_runner_count")]
    pub runner_count: u32,
    pub resources: NodeResources,
}

fn default_runner_count() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_from_yaml() {
        let yaml = r#"
node_id: preprocess
operators: [ingest, tile_cutter]
resources:
  cpu_request: 2.0
  cpu_limit: 4.0
  memory_request_gb: 8.0
  memory_limit_gb: 16.0
"#;
        let node: NodeSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.node_id, "preprocess");
        assert_eq!(node.operators.len(), 2);
        assert_eq!(node.runner_count, 1);
        assert_eq!(node.resources.gpu_request, 0);
    }

    #[test]
    fn test_gpu_limit_defaults_to_request() {
        let resources = NodeResources {
            cpu_request: 1.0,
            cpu_limit: 1.0,
            memory_request_gb: 1.0,
            memory_limit_gb: 2.0,
            gpu_request: 2,
            gpu_limit: None,
        };
        assert_eq!(resources.effective_gpu_limit(), 2);
    }
}
