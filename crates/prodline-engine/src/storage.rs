//! Object-storage collaborator interface.
//!
//! The engine depends only on `fetch`/`store`; actual byte transfer is
//! deployment wiring. Credentials are resolved per provider+bucket from
//! the environment, never embedded in URIs.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};

use prodline_types::storage::RemoteUri;

pub trait ObjectStore: Send + Sync {
    /// Download the object at `uri`.
    fn fetch(&self, uri: &RemoteUri) -> Result<Vec<u8>>;

    /// Upload `bytes` to `uri`.
    fn store(&self, uri: &RemoteUri, bytes: &[u8]) -> Result<()>;
}

/// Placeholder for deployments without object storage wired in. Any use
/// fails loudly instead of substituting a different source.
#[derive(Debug, Default)]
pub struct UnconfiguredStore;

impl ObjectStore for UnconfiguredStore {
    fn fetch(&self, uri: &RemoteUri) -> Result<Vec<u8>> {
        bail!("no object store client is configured; cannot fetch {uri}");
    }

    fn store(&self, uri: &RemoteUri, _bytes: &[u8]) -> Result<()> {
        bail!("no object store client is configured; cannot store {uri}");
    }
}

/// In-memory store for tests and local experiments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: &RemoteUri, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uri.to_string(), bytes);
    }
}

impl ObjectStore for MemoryStore {
    fn fetch(&self, uri: &RemoteUri) -> Result<Vec<u8>> {
        match self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&uri.to_string())
        {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("object not found: {uri}"),
        }
    }

    fn store(&self, uri: &RemoteUri, bytes: &[u8]) -> Result<()> {
        self.insert(uri, bytes.to_vec());
        Ok(())
    }
}
