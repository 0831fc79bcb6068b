//! Operator spec: the smallest schedulable unit of a pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::codec;
use crate::environment::EnvironmentSpec;

/// Where an operator's code comes from: a repository at a fixed tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub repo: String,
    pub tag: String,
}

/// One command run once inside one environment.
///
/// Specs are immutable after configuration resolution; the local
/// checkout path is tracked by the orchestrator rather than written
/// back into the spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub operator_id: String,
    pub source: SourceRef,
    /// Direct upstream operator ids, in declared order. Transitive
    /// dependencies are not declared.
    #[serde(default)]
    pub upstream: Vec<String>,
    pub environment: EnvironmentSpec,
    pub start_command: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra environment variables for the child process. Values with
    /// the `base64://` prefix are decoded at load time.
    #[serde(default, deserialize_with = "decoded_env_map")]
    pub extra_env: BTreeMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    3600
}

fn decoded_env_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let decoded = codec::decode(&value)
                .map_err(|e| serde::de::Error::custom(format!("extra_env.{key}: {e}")))?;
            Ok((key, decoded))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator_yaml() -> &'static str {
        r#"
operator_id: tile_cutter
source:
  repo: git@example.com:maps/tile-cutter.git
  tag: v2.3.1
upstream: [ingest]
environment:
  type: uv_project
  env_name: tile_cutter
  pyproject_path: pyproject.toml
start_command: python -m tile_cutter.main
extra_env:
  API_TOKEN: base64://aHVudGVyMg==
  REGION: eu-west-1
"#
    }

    #[test]
    fn test_operator_from_yaml() {
        let op: OperatorSpec = serde_yaml::from_str(operator_yaml()).unwrap();
        assert_eq!(op.operator_id, "tile_cutter");
        assert_eq!(op.source.tag, "v2.3.1");
        assert_eq!(op.upstream, vec!["ingest".to_string()]);
        assert_eq!(op.timeout_secs, 3600);
    }

    #[test]
    fn test_extra_env_base64_decoded_on_load() {
        let op: OperatorSpec = serde_yaml::from_str(operator_yaml()).unwrap();
        assert_eq!(op.extra_env["API_TOKEN"], "hunter2");
        assert_eq!(op.extra_env["REGION"], "eu-west-1");
    }

    #[test]
    fn test_bad_base64_env_value_fails_load() {
        let yaml = operator_yaml().replace("aHVudGVyMg==", "***");
        let result: Result<OperatorSpec, _> = serde_yaml::from_str(&yaml);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("API_TOKEN"), "error should name the field: {err}");
    }

    #[test]
    fn test_upstream_defaults_empty() {
        let yaml = operator_yaml().replace("upstream: [ingest]\n", "");
        let op: OperatorSpec = serde_yaml::from_str(&yaml).unwrap();
        assert!(op.upstream.is_empty());
    }
}
