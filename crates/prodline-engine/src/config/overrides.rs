//! Override layers: an environment dotlist and a remote override
//! document, merged over the resolved spec with fixed precedence
//! (dotlist > remote document > files).

use std::str::FromStr;

use serde_yaml::Value;

use prodline_types::errors::PipelineError;
use prodline_types::storage::RemoteUri;

use crate::config::parser;
use crate::storage::ObjectStore;

/// Env var carrying a `key.path=value,...` dotlist applied at the
/// highest precedence.
pub const CONF_OVERRIDE_ENV: &str = "PRODLINE_CONF_OVERRIDE";

/// Env var carrying the `provider://bucket/key` URI of a remote
/// override document, merged below the dotlist.
pub const CONF_OVERRIDE_URI_ENV: &str = "PRODLINE_CONF_OVERRIDE_URI";

/// Identity fields are fixed at resolution time; an override touching
/// one is rejected, never applied.
const IDENTITY_FIELDS: [&str; 3] = ["pipeline_id", "node_id", "operator_id"];

/// Collected override layers.
#[derive(Debug, Default)]
pub struct OverrideLayers {
    /// Remote override document (lower precedence).
    pub remote: Option<Value>,
    /// Dotlist overrides (highest precedence).
    pub dotlist: Option<Value>,
}

impl OverrideLayers {
    /// Read both override channels from the process environment.
    ///
    /// # Errors
    ///
    /// Fails on a malformed URI or dotlist, or when the remote document
    /// cannot be fetched or parsed.
    pub fn from_env(store: &dyn ObjectStore) -> Result<Self, PipelineError> {
        let remote = match std::env::var(CONF_OVERRIDE_URI_ENV) {
            Ok(raw) if !raw.trim().is_empty() => {
                let uri = RemoteUri::from_str(raw.trim())
                    .map_err(|e| PipelineError::config(CONF_OVERRIDE_URI_ENV, e.to_string()))?;
                tracing::info!(uri = %uri, "Fetching remote override document");
                let bytes = store.fetch(&uri)?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    PipelineError::config(
                        CONF_OVERRIDE_URI_ENV,
                        format!("override document at {uri} is not valid UTF-8"),
                    )
                })?;
                Some(parser::parse_document_str(&text)?)
            }
            _ => None,
        };

        let dotlist = match std::env::var(CONF_OVERRIDE_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_dotlist(&raw)?),
            _ => None,
        };

        Ok(Self { remote, dotlist })
    }

    pub fn is_empty(&self) -> bool {
        self.remote.is_none() && self.dotlist.is_none()
    }

    /// Merge the layers over `base`, lowest precedence first.
    ///
    /// # Errors
    ///
    /// Rejects any layer that touches an identity field.
    pub fn apply(&self, base: &mut Value) -> Result<(), PipelineError> {
        let layers: Vec<&Value> = [&self.remote, &self.dotlist].into_iter().flatten().collect();
        for layer in &layers {
            reject_identity_overrides(layer, "")?;
        }
        for layer in layers {
            deep_merge(base, layer);
        }
        Ok(())
    }
}

/// Parse a `key.path=value,key.path=value` dotlist into a nested
/// mapping. Values are YAML scalars (`4` parses as an integer, `true`
/// as a bool), falling back to plain strings.
pub fn parse_dotlist(raw: &str) -> Result<Value, PipelineError> {
    let mut acc = Value::Mapping(serde_yaml::Mapping::new());

    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((path, value)) = pair.split_once('=') else {
            return Err(PipelineError::config(
                CONF_OVERRIDE_ENV,
                format!("override '{pair}' is not of the form key.path=value"),
            ));
        };
        let path = path.trim();
        if path.is_empty() || path.split('.').any(|seg| seg.is_empty()) {
            return Err(PipelineError::config(
                CONF_OVERRIDE_ENV,
                format!("override '{pair}' has an empty key path segment"),
            ));
        }

        let leaf: Value = serde_yaml::from_str(value.trim())
            .unwrap_or_else(|_| Value::String(value.trim().to_string()));

        let mut entry = leaf;
        for seg in path.split('.').rev() {
            let mut map = serde_yaml::Mapping::new();
            map.insert(Value::String(seg.to_string()), entry);
            entry = Value::Mapping(map);
        }
        deep_merge(&mut acc, &entry);
    }

    Ok(acc)
}

/// Deep key-path merge: mappings merge by key, leaves replace. A
/// mapping whose keys are all numeric indexes merges into a sequence
/// element-wise, so dotlists can address list entries
/// (`nodes.0.runner_count=4`).
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Mapping(overlay_map))
            if !overlay_map.is_empty() && overlay_map.keys().all(|k| index_key(k).is_some()) =>
        {
            for (key, value) in overlay_map {
                let idx = index_key(key).expect("checked numeric");
                if let Some(slot) = base_seq.get_mut(idx) {
                    deep_merge(slot, value);
                }
            }
        }
        (slot, other) => *slot = other.clone(),
    }
}

fn index_key(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn reject_identity_overrides(layer: &Value, path: &str) -> Result<(), PipelineError> {
    match layer {
        Value::Mapping(map) => {
            for (key, value) in map {
                let key_str = match key {
                    Value::String(s) => s.clone(),
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                let child_path = if path.is_empty() {
                    key_str.clone()
                } else {
                    format!("{path}.{key_str}")
                };
                if IDENTITY_FIELDS.contains(&key_str.as_str()) {
                    return Err(PipelineError::config(
                        child_path,
                        "identity fields are immutable and cannot be overridden",
                    ));
                }
                reject_identity_overrides(value, &child_path)?;
            }
            Ok(())
        }
        Value::Sequence(seq) => {
            for (i, value) in seq.iter().enumerate() {
                reject_identity_overrides(value, &format!("{path}[{i}]"))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Serializes tests that read or write the override env vars; resolve()
/// always consults them, so concurrent mutation would cross-talk.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_dotlist_nested_paths_and_typing() {
        let value = parse_dotlist("log.level=debug,log.retention_days=7,name=renamed").unwrap();
        assert_eq!(value["log"]["level"], Value::from("debug"));
        assert_eq!(value["log"]["retention_days"], Value::from(7));
        assert_eq!(value["name"], Value::from("renamed"));
    }

    #[test]
    fn test_dotlist_malformed_pair_rejected() {
        let err = parse_dotlist("log.level").unwrap_err();
        assert!(err.to_string().contains("key.path=value"));
    }

    #[test]
    fn test_deep_merge_containers_merge_leaves_replace() {
        let mut base = yaml("log:\n  level: info\n  rotation: 10 GB\nname: orig\n");
        deep_merge(&mut base, &yaml("log:\n  level: warn\n"));
        assert_eq!(base["log"]["level"], Value::from("warn"));
        assert_eq!(base["log"]["rotation"], Value::from("10 GB"));
        assert_eq!(base["name"], Value::from("orig"));
    }

    #[test]
    fn test_deep_merge_indexes_into_sequences() {
        let mut base = yaml("nodes:\n  - runner_count: 1\n  - runner_count: 1\n");
        let overlay = parse_dotlist("nodes.1.runner_count=4").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["nodes"][0]["runner_count"], Value::from(1));
        assert_eq!(base["nodes"][1]["runner_count"], Value::from(4));
    }

    #[test]
    fn test_precedence_dotlist_beats_remote() {
        let layers = OverrideLayers {
            remote: Some(yaml("log:\n  level: debug\n")),
            dotlist: Some(parse_dotlist("log.level=warn").unwrap()),
        };
        let mut base = yaml("log:\n  level: info\n");
        layers.apply(&mut base).unwrap();
        assert_eq!(base["log"]["level"], Value::from("warn"));
    }

    #[test]
    fn test_remote_layer_applies_when_no_dotlist() {
        let layers = OverrideLayers {
            remote: Some(yaml("log:\n  level: debug\n")),
            dotlist: None,
        };
        let mut base = yaml("log:\n  level: info\n");
        layers.apply(&mut base).unwrap();
        assert_eq!(base["log"]["level"], Value::from("debug"));
    }

    #[test]
    fn test_identity_override_rejected() {
        let layers = OverrideLayers {
            remote: None,
            dotlist: Some(parse_dotlist("operators.0.operator_id=renamed").unwrap()),
        };
        let mut base = yaml("operators:\n  - operator_id: a\n");
        let err = layers.apply(&mut base).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("operator_id"), "got: {msg}");
        assert!(msg.contains("immutable"), "got: {msg}");
        // Base must be untouched
        assert_eq!(base["operators"][0]["operator_id"], Value::from("a"));
    }

    #[test]
    fn test_identity_override_rejected_in_remote_layer() {
        let layers = OverrideLayers {
            remote: Some(yaml("pipeline_id: hijacked\n")),
            dotlist: None,
        };
        let mut base = yaml("pipeline_id: orig\n");
        assert!(layers.apply(&mut base).is_err());
    }

    #[test]
    fn test_from_env_roundtrip() {
        use crate::storage::{MemoryStore, ObjectStore as _};
        let _guard = test_support::env_guard();
        let store = MemoryStore::new();
        let uri: RemoteUri = "s3://conf/override.yaml".parse().unwrap();
        store.store(&uri, b"log:\n  level: debug\n").unwrap();

        std::env::set_var(CONF_OVERRIDE_URI_ENV, "s3://conf/override.yaml");
        std::env::set_var(CONF_OVERRIDE_ENV, "log.level=error");
        let layers = OverrideLayers::from_env(&store).unwrap();
        std::env::remove_var(CONF_OVERRIDE_URI_ENV);
        std::env::remove_var(CONF_OVERRIDE_ENV);

        let mut base = yaml("log:\n  level: info\n");
        layers.apply(&mut base).unwrap();
        assert_eq!(base["log"]["level"], Value::from("error"));
    }
}
