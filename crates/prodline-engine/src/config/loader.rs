//! Hierarchical spec loading.
//!
//! A configuration root holds the pipeline descriptor plus versioned
//! component documents:
//!
//! ```text
//! conf/
//! ├── pipeline.yaml
//! ├── nodes/{node_id}_{version}.yaml
//! ├── operators/{operator_id}_{version}.yaml
//! └── integration/          # resolved-spec audit artifacts
//! ```
//!
//! The pipeline descriptor references components as `"{id}:{version}"`
//! strings (or `{ node_id/operator_id, version }` mappings); the loader
//! resolves them, merges override layers, and returns one validated
//! `PipelineSpec`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_yaml::Value;

use prodline_types::errors::PipelineError;
use prodline_types::pipeline::PipelineSpec;

use crate::config::overrides::OverrideLayers;
use crate::config::{parser, validator};
use crate::storage::ObjectStore;

/// Version assumed when a component reference omits one.
pub const DEFAULT_COMPONENT_VERSION: &str = "v1.0";

pub struct ConfigResolver<'a> {
    config_root: PathBuf,
    store: &'a dyn ObjectStore,
    /// Serialize the integrated spec to `integration/` for audit. Pure
    /// side effect: failures are logged, never fatal.
    pub dump_integrated: bool,
}

struct ComponentRef {
    id: String,
    version: String,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(config_root: impl Into<PathBuf>, store: &'a dyn ObjectStore) -> Self {
        Self {
            config_root: config_root.into(),
            store,
            dump_integrated: false,
        }
    }

    /// Resolve a root pipeline descriptor into a validated spec.
    ///
    /// # Errors
    ///
    /// `Config` for malformed or invalid documents, `MissingDependency`
    /// when a referenced component document does not exist.
    pub fn resolve(&self, pipeline_file: &Path) -> Result<PipelineSpec, PipelineError> {
        let mut doc = self.load_root(pipeline_file)?;

        self.integrate(&mut doc, "nodes", "node_id", &self.config_root.join("nodes"))?;
        self.integrate(
            &mut doc,
            "operators",
            "operator_id",
            &self.config_root.join("operators"),
        )?;

        let layers = OverrideLayers::from_env(self.store)?;
        if !layers.is_empty() {
            tracing::info!("Applying configuration overrides");
            layers.apply(&mut doc)?;
        }

        let spec: PipelineSpec = serde_yaml::from_value(doc).map_err(|e| {
            let path = e
                .location()
                .map(|l| format!("line {}, column {}", l.line(), l.column()))
                .unwrap_or_else(|| "<document>".to_string());
            PipelineError::Config {
                path,
                message: e.to_string(),
            }
        })?;

        validator::validate_pipeline(&spec)?;

        if self.dump_integrated {
            match self.dump(&spec) {
                Ok(path) => tracing::info!(path = %path.display(), "Wrote integrated spec"),
                Err(e) => tracing::warn!("Failed to write integrated spec: {e}"),
            }
        }

        tracing::info!(
            pipeline = spec.pipeline_id,
            operators = spec.operators.len(),
            nodes = spec.nodes.len(),
            "Spec resolution complete"
        );
        Ok(spec)
    }

    fn load_root(&self, pipeline_file: &Path) -> Result<Value, PipelineError> {
        let doc = parser::parse_document(pipeline_file)?;
        // A root descriptor may nest its body under a `pipeline` key.
        Ok(unwrap_nested(doc, "pipeline"))
    }

    /// Replace a list of component references under `section` with the
    /// loaded component documents. Inline definitions (mappings with
    /// more than id/version keys) pass through untouched.
    fn integrate(
        &self,
        doc: &mut Value,
        section: &str,
        id_key: &str,
        dir: &Path,
    ) -> Result<(), PipelineError> {
        let Some(map) = doc.as_mapping_mut() else {
            return Err(PipelineError::config(
                "<document>",
                "pipeline descriptor must be a mapping",
            ));
        };
        let section_key = Value::String(section.to_string());
        let Some(entry) = map.get_mut(&section_key) else {
            return Ok(());
        };

        // Either `section: [refs...]` or `section: { refs: [...] }`.
        let refs: Vec<Value> = match entry {
            Value::Sequence(seq) => seq.clone(),
            Value::Mapping(m) => match m.get(&Value::String("refs".to_string())) {
                Some(Value::Sequence(seq)) => seq.clone(),
                _ => {
                    return Err(PipelineError::config(
                        section,
                        "expected a list of component references",
                    ))
                }
            },
            _ => {
                return Err(PipelineError::config(
                    section,
                    "expected a list of component references",
                ))
            }
        };

        let mut resolved = Vec::with_capacity(refs.len());
        for (i, item) in refs.iter().enumerate() {
            match component_ref(item, id_key) {
                Some(cref) => resolved.push(self.load_component(&cref, id_key, dir)?),
                None if item.is_mapping() => resolved.push(item.clone()),
                None => {
                    return Err(PipelineError::config(
                        format!("{section}[{i}]"),
                        "expected an \"id:version\" reference or a component mapping",
                    ))
                }
            }
        }

        map.insert(section_key, Value::Sequence(resolved));
        Ok(())
    }

    fn load_component(
        &self,
        cref: &ComponentRef,
        id_key: &str,
        dir: &Path,
    ) -> Result<Value, PipelineError> {
        let versioned = dir.join(format!("{}_{}.yaml", cref.id, cref.version));
        let fallback = dir.join(format!("{}.yaml", cref.id));

        let path = if versioned.exists() {
            versioned
        } else if fallback.exists() {
            fallback
        } else {
            return Err(PipelineError::MissingDependency(format!(
                "component spec '{}:{}' not found under {} (tried {}_{}.yaml and {}.yaml)",
                cref.id,
                cref.version,
                dir.display(),
                cref.id,
                cref.version,
                cref.id,
            )));
        };

        tracing::debug!(path = %path.display(), "Loading component spec");
        let doc = parser::parse_document(&path)?;
        let doc = unwrap_nested(doc, &cref.id);

        // The file must agree with the reference about its own identity.
        if let Some(found) = doc.get(id_key).and_then(Value::as_str) {
            if found != cref.id {
                return Err(PipelineError::config(
                    format!("{}.{id_key}", path.display()),
                    format!("document declares '{found}' but was referenced as '{}'", cref.id),
                ));
            }
        }
        Ok(doc)
    }

    fn dump(&self, spec: &PipelineSpec) -> anyhow::Result<PathBuf> {
        let dir = self.config_root.join("integration");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{stamp}.yaml", spec.pipeline_id));
        let text = serde_yaml::to_string(spec).context("Failed to serialize integrated spec")?;
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Unwrap a document nested under `key` (`{key: {..body..}}` -> body).
fn unwrap_nested(doc: Value, key: &str) -> Value {
    match &doc {
        Value::Mapping(map) if map.len() == 1 => match map.get(&Value::String(key.to_string())) {
            Some(inner @ Value::Mapping(_)) => inner.clone(),
            _ => doc,
        },
        _ => doc,
    }
}

/// Interpret a reference item: `"id:version"`, bare `"id"`, or a
/// `{<id_key>, version}` mapping. Mappings with additional keys are
/// inline component definitions, not references.
fn component_ref(item: &Value, id_key: &str) -> Option<ComponentRef> {
    match item {
        Value::String(s) => {
            let (id, version) = match s.split_once(':') {
                Some((id, version)) => (id, version),
                None => (s.as_str(), DEFAULT_COMPONENT_VERSION),
            };
            Some(ComponentRef {
                id: id.to_string(),
                version: version.to_string(),
            })
        }
        Value::Mapping(map) => {
            let only_ref_keys = map.iter().all(|(k, _)| {
                matches!(k.as_str(), Some(key) if key == id_key || key == "version")
            });
            if !only_ref_keys {
                return None;
            }
            let id = map.get(&Value::String(id_key.to_string()))?.as_str()?;
            let version = map
                .get(&Value::String("version".to_string()))
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_COMPONENT_VERSION);
            Some(ComponentRef {
                id: id.to_string(),
                version: version.to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UnconfiguredStore;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn seed_conf(root: &Path) {
        write(
            &root.join("pipeline.yaml"),
            r#"
pipeline_id: map_build
name: Map build line
nodes:
  refs: ["prep:v1.0"]
operators:
  refs: ["ingest:v1.0", "tile_cutter"]
"#,
        );
        write(
            &root.join("nodes/prep_v1.0.yaml"),
            r#"
prep:
  node_id: prep
  operators: [ingest, tile_cutter]
  resources:
    cpu_request: 1.0
    cpu_limit: 2.0
    memory_request_gb: 2.0
    memory_limit_gb: 4.0
"#,
        );
        write(
            &root.join("operators/ingest_v1.0.yaml"),
            r#"
operator_id: ingest
source: { repo: "git@example.com:maps/ingest.git", tag: v1.0.0 }
environment:
  type: uv_project
  env_name: ingest
  pyproject_path: pyproject.toml
start_command: python -m ingest
"#,
        );
        // Unversioned fallback file
        write(
            &root.join("operators/tile_cutter.yaml"),
            r#"
operator_id: tile_cutter
source: { repo: "git@example.com:maps/tiles.git", tag: v2.0.0 }
upstream: [ingest]
environment:
  type: uv_project
  env_name: tile_cutter
  pyproject_path: pyproject.toml
start_command: python -m tiles
"#,
        );
    }

    #[test]
    fn test_resolve_versioned_and_fallback_components() {
        let _guard = crate::config::overrides::test_support::env_guard();
        let dir = tempfile::tempdir().unwrap();
        seed_conf(dir.path());
        let store = UnconfiguredStore;
        let resolver = ConfigResolver::new(dir.path(), &store);
        let spec = resolver.resolve(&dir.path().join("pipeline.yaml")).unwrap();

        assert_eq!(spec.pipeline_id, "map_build");
        assert_eq!(spec.nodes.len(), 1);
        assert_eq!(spec.operators.len(), 2);
        assert_eq!(spec.operators[1].operator_id, "tile_cutter");
        assert_eq!(spec.operators[1].upstream, vec!["ingest".to_string()]);
    }

    #[test]
    fn test_missing_component_is_missing_dependency() {
        let _guard = crate::config::overrides::test_support::env_guard();
        let dir = tempfile::tempdir().unwrap();
        seed_conf(dir.path());
        std::fs::remove_file(dir.path().join("operators/ingest_v1.0.yaml")).unwrap();
        let store = UnconfiguredStore;
        let resolver = ConfigResolver::new(dir.path(), &store);
        let err = resolver
            .resolve(&dir.path().join("pipeline.yaml"))
            .unwrap_err();
        match err {
            PipelineError::MissingDependency(msg) => {
                assert!(msg.contains("ingest:v1.0"), "got: {msg}");
            }
            other => panic!("expected MissingDependency, got {other}"),
        }
    }

    #[test]
    fn test_component_identity_must_match_reference() {
        let _guard = crate::config::overrides::test_support::env_guard();
        let dir = tempfile::tempdir().unwrap();
        seed_conf(dir.path());
        write(
            &dir.path().join("operators/ingest_v1.0.yaml"),
            "operator_id: somebody_else\nstart_command: echo\n",
        );
        let store = UnconfiguredStore;
        let resolver = ConfigResolver::new(dir.path(), &store);
        let err = resolver
            .resolve(&dir.path().join("pipeline.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("somebody_else"));
    }

    #[test]
    fn test_inline_component_definitions_pass_through() {
        let _guard = crate::config::overrides::test_support::env_guard();
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("pipeline.yaml"),
            r#"
pipeline_id: inline
name: Inline pipeline
nodes:
  - node_id: only
    operators: [solo]
    resources:
      cpu_request: 1.0
      cpu_limit: 1.0
      memory_request_gb: 1.0
      memory_limit_gb: 1.0
operators:
  - operator_id: solo
    source: { repo: "git@example.com:x/solo.git", tag: v1.0.0 }
    environment:
      type: uv_project
      env_name: solo
      pyproject_path: pyproject.toml
    start_command: python run.py
"#,
        );
        let store = UnconfiguredStore;
        let resolver = ConfigResolver::new(dir.path(), &store);
        let spec = resolver.resolve(&dir.path().join("pipeline.yaml")).unwrap();
        assert_eq!(spec.operators[0].operator_id, "solo");
    }

    #[test]
    fn test_dump_integrated_writes_artifact() {
        let _guard = crate::config::overrides::test_support::env_guard();
        let dir = tempfile::tempdir().unwrap();
        seed_conf(dir.path());
        let store = UnconfiguredStore;
        let mut resolver = ConfigResolver::new(dir.path(), &store);
        resolver.dump_integrated = true;
        resolver.resolve(&dir.path().join("pipeline.yaml")).unwrap();

        let artifacts: Vec<_> = std::fs::read_dir(dir.path().join("integration"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].starts_with("map_build_"));
        assert!(artifacts[0].ends_with(".yaml"));
    }

    #[test]
    fn test_override_env_beats_component_file() {
        let _guard = crate::config::overrides::test_support::env_guard();
        let dir = tempfile::tempdir().unwrap();
        seed_conf(dir.path());
        let store = UnconfiguredStore;
        let resolver = ConfigResolver::new(dir.path(), &store);

        std::env::set_var(crate::config::overrides::CONF_OVERRIDE_ENV, "log.level=debug");
        let spec = resolver.resolve(&dir.path().join("pipeline.yaml")).unwrap();
        std::env::remove_var(crate::config::overrides::CONF_OVERRIDE_ENV);

        assert_eq!(spec.log.level, "debug");
    }
}
