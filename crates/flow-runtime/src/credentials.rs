//! Node credentials
//!
//! Deployed node configs may carry a `credentials` object. It is pulled out
//! before the config is persisted or instantiated and kept in a cache keyed
//! by node id, which is saved through the flow storage.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::storage::{CredentialMap, FlowStorage};
use crate::types::NodeConfig;

/// Placeholder the editor sends for a password it did not change
pub const UNCHANGED_PASSWORD: &str = "__PWRD__";

/// Credential cache and persistence
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Replace the cache with the stored credentials
    async fn load(&self) -> Result<()>;

    fn get(&self, id: &str) -> Option<Value>;

    /// Move a node's `credentials` property into the cache
    ///
    /// Returns whether the node carried credentials. Does not persist.
    fn extract(&self, node: &mut NodeConfig) -> bool;

    /// Drop credentials of nodes not present in `config`, persisting if anything changed
    async fn clean(&self, config: &[NodeConfig]) -> Result<()>;

    async fn save(&self) -> Result<()>;
}

/// Credential store backed by [`FlowStorage`]
pub struct StorageCredentials {
    storage: Arc<dyn FlowStorage>,
    cache: RwLock<CredentialMap>,
}

impl StorageCredentials {
    pub fn new(storage: Arc<dyn FlowStorage>) -> Self {
        Self {
            storage,
            cache: RwLock::new(Map::new()),
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        Value::Null => true,
        _ => false,
    }
}

#[async_trait]
impl CredentialStore for StorageCredentials {
    async fn load(&self) -> Result<()> {
        match self.storage.get_credentials().await {
            Ok(creds) => *self.cache.write() = creds,
            Err(e) => log::warn!("Error loading credentials: {}", e),
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Value> {
        self.cache.read().get(id).cloned()
    }

    fn extract(&self, node: &mut NodeConfig) -> bool {
        let Some(new_creds) = node.remove("credentials") else {
            return false;
        };
        let Value::Object(new_creds) = new_creds else {
            log::warn!("Ignoring non-object credentials on node {}", node.id());
            return true;
        };

        let mut cache = self.cache.write();
        let mut saved = match cache.remove(node.id()) {
            Some(Value::Object(saved)) => saved,
            _ => Map::new(),
        };
        for (key, value) in new_creds {
            if value.as_str() == Some(UNCHANGED_PASSWORD) {
                continue;
            }
            if is_blank(&value) {
                saved.remove(&key);
                continue;
            }
            saved.insert(key, value);
        }
        cache.insert(node.id().to_string(), Value::Object(saved));
        true
    }

    async fn clean(&self, config: &[NodeConfig]) -> Result<()> {
        let existing: HashSet<&str> = config.iter().map(NodeConfig::id).collect();
        let snapshot = {
            let mut cache = self.cache.write();
            let before = cache.len();
            cache.retain(|id, _| existing.contains(id.as_str()));
            if cache.len() == before {
                return Ok(());
            }
            cache.clone()
        };
        self.storage.save_credentials(&snapshot).await
    }

    async fn save(&self) -> Result<()> {
        let snapshot = self.cache.read().clone();
        self.storage.save_credentials(&snapshot).await
    }
}
