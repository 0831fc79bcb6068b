//! Environment lifecycle: identity-keyed reuse, serialized installs,
//! lease-based checkout, and TTL eviction.
//!
//! The registry is owned by the orchestrator and passed by reference;
//! there is no process-wide environment state.

pub mod conda;
pub mod pixi;
pub mod uv;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use prodline_types::environment::{EnvKind, EnvironmentSpec};
use prodline_types::errors::PipelineError;

use crate::storage::ObjectStore;

/// Idle period after which an unused environment may be evicted.
pub const DEFAULT_EVICTION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Command tokens and environment variables that make a plain command
/// run inside an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activation {
    /// Tokens prepended to the operator's start command. Empty when the
    /// backend activates purely through environment variables.
    pub prefix: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// A provisioned environment. The manager hands out the same `Arc` for
/// the same `(kind, name)`, so reuse is identity equality.
#[derive(Debug)]
pub struct EnvironmentHandle {
    pub kind: EnvKind,
    pub name: String,
    /// Filesystem root of the installed environment.
    pub root: PathBuf,
    last_used: Mutex<SystemTime>,
    active: AtomicUsize,
}

impl EnvironmentHandle {
    fn new(kind: EnvKind, name: &str, root: PathBuf) -> Self {
        Self {
            kind,
            name: name.to_string(),
            root,
            last_used: Mutex::new(SystemTime::now()),
            active: AtomicUsize::new(0),
        }
    }

    pub fn last_used(&self) -> SystemTime {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of leases currently holding this handle.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = SystemTime::now();
    }
}

/// Checkout guard: while alive, the handle counts as in use and the
/// sweep will not evict it. Dropping releases the lease and refreshes
/// `last_used`.
#[derive(Debug)]
pub struct EnvLease {
    handle: Arc<EnvironmentHandle>,
    pub activation: Activation,
}

impl EnvLease {
    fn acquire(handle: Arc<EnvironmentHandle>, activation: Activation) -> Self {
        handle.active.fetch_add(1, Ordering::SeqCst);
        handle.touch();
        Self { handle, activation }
    }

    pub fn handle(&self) -> &Arc<EnvironmentHandle> {
        &self.handle
    }
}

impl Drop for EnvLease {
    fn drop(&mut self) {
        self.handle.active.fetch_sub(1, Ordering::SeqCst);
        self.handle.touch();
    }
}

struct Entry {
    handle: Arc<EnvironmentHandle>,
    /// Single-writer install guard; the bool records whether the
    /// environment is ready.
    install: Arc<tokio::sync::Mutex<bool>>,
}

/// Identity-keyed environment registry.
pub struct EnvironmentManager {
    env_root: PathBuf,
    store: Arc<dyn ObjectStore>,
    registry: Mutex<HashMap<String, Entry>>,
}

impl EnvironmentManager {
    pub fn new(env_root: impl Into<PathBuf>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            env_root: env_root.into(),
            store,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Check out a ready environment for `spec`, installing it on first
    /// use. `code_path` is the operator checkout the backend manifests
    /// live in.
    ///
    /// Installs for the same identity are serialized; lookups for
    /// distinct identities proceed independently. An existing directory
    /// under the environment root is reused without reinstalling.
    ///
    /// # Errors
    ///
    /// `DuplicateEnvName` when `spec.env_name()` is registered under a
    /// different kind; `EnvInstall` when the backend install fails.
    pub async fn checkout(
        &self,
        spec: &EnvironmentSpec,
        code_path: &Path,
    ) -> Result<EnvLease, PipelineError> {
        let name = spec.env_name();
        let kind = spec.kind();

        let (handle, install) = {
            let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = registry.get(name) {
                if entry.handle.kind != kind {
                    return Err(PipelineError::DuplicateEnvName {
                        name: name.to_string(),
                        existing: entry.handle.kind,
                        requested: kind,
                    });
                }
                (entry.handle.clone(), entry.install.clone())
            } else {
                let handle = Arc::new(EnvironmentHandle::new(
                    kind,
                    name,
                    self.env_root.join(name),
                ));
                let install = Arc::new(tokio::sync::Mutex::new(false));
                registry.insert(
                    name.to_string(),
                    Entry {
                        handle: handle.clone(),
                        install: install.clone(),
                    },
                );
                (handle, install)
            }
        };

        // Acquire the lease before installing so the sweep cannot evict
        // a half-built environment.
        let activation = build_activation(spec, &handle.root, code_path);
        let lease = EnvLease::acquire(handle.clone(), activation);

        let mut installed = install.lock().await;
        if !*installed {
            if handle.root.exists() {
                tracing::info!(env = name, root = %handle.root.display(), "Environment already present, reusing");
            } else {
                tracing::info!(env = name, kind = %kind, "Installing environment");
                install_backend(spec, &handle.root, code_path, self.store.as_ref()).await?;
                tracing::info!(env = name, "Environment install complete");
            }
            *installed = true;
        }
        drop(installed);

        // A reused environment can still be unusable if the checkout it
        // activates through lost its manifest.
        if let EnvironmentSpec::PixiProject { manifest_path, .. } = spec {
            let manifest = code_path.join(manifest_path);
            if !manifest.exists() {
                return Err(PipelineError::EnvironmentActivation {
                    env_name: name.to_string(),
                    message: format!("manifest not found: {}", manifest.display()),
                });
            }
        }

        Ok(lease)
    }

    /// Evict environments idle longer than `ttl` and not checked out.
    /// Returns the evicted names.
    pub fn sweep(&self, ttl: Duration) -> Vec<String> {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<String> = registry
            .iter()
            .filter(|(_, entry)| {
                entry.handle.active_count() == 0
                    && entry
                        .handle
                        .last_used()
                        .elapsed()
                        .map(|idle| idle >= ttl)
                        .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            if let Some(entry) = registry.remove(name) {
                if entry.handle.root.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&entry.handle.root) {
                        tracing::warn!(env = name, "Failed to delete environment root: {e}");
                    }
                }
                tracing::info!(env = name, "Evicted idle environment");
            }
        }
        stale
    }

    /// Registered environment count, for reporting.
    pub fn len(&self) -> usize {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_activation(spec: &EnvironmentSpec, root: &Path, code_path: &Path) -> Activation {
    match spec {
        EnvironmentSpec::UvProject { .. } => uv::activation(root),
        EnvironmentSpec::PixiProject { manifest_path, .. } => {
            pixi::activation(spec.env_name(), root, &code_path.join(manifest_path))
        }
        EnvironmentSpec::CondaArchive { .. } => conda::activation(spec.env_name(), root),
    }
}

async fn install_backend(
    spec: &EnvironmentSpec,
    root: &Path,
    code_path: &Path,
    store: &dyn ObjectStore,
) -> Result<(), PipelineError> {
    match spec {
        EnvironmentSpec::UvProject {
            env_name,
            uv_extra_args,
            ..
        } => uv::install(env_name, root, code_path, uv_extra_args).await,
        EnvironmentSpec::PixiProject {
            env_name,
            manifest_path,
            pixi_extra_args,
            ..
        } => {
            pixi::install(
                env_name,
                &code_path.join(manifest_path),
                code_path,
                pixi_extra_args,
            )
            .await
        }
        EnvironmentSpec::CondaArchive {
            env_name,
            archive_uri,
            run_repair,
            zstd_extra_args,
        } => {
            conda::install(
                env_name,
                root,
                archive_uri,
                *run_repair,
                zstd_extra_args,
                store,
            )
            .await
        }
    }
}
