//! Node, flow and global context storage
//!
//! Context is key-value state that outlives a single message. Every scope is
//! addressed by a string key:
//! - node scope: `"<node id>:<flow id>"` (subflow instance nodes use their
//!   template id, so context survives a redeploy of the instance)
//! - flow scope: `"<flow id>"`
//! - global scope: `"global"`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Scope key of the global context
pub const GLOBAL_CONTEXT: &str = "global";

/// Scope key of a node's context
pub fn node_scope(id: &str, flow: Option<&str>) -> String {
    match flow {
        Some(flow) => format!("{}:{}", id, flow),
        None => id.to_string(),
    }
}

/// Backend for context values
pub trait ContextStore: Send + Sync {
    fn get(&self, scope: &str, key: &str) -> Option<Value>;

    fn set(&self, scope: &str, key: &str, value: Value);

    fn keys(&self, scope: &str) -> Vec<String>;

    /// Drop a whole scope (called when a node closes)
    fn delete(&self, scope: &str);

    /// Drop every scope whose node id is not in `live_ids`
    ///
    /// The global scope is always kept.
    fn clean(&self, live_ids: &HashSet<String>);
}

/// In-memory context store
#[derive(Default)]
pub struct MemoryContextStore {
    scopes: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the scopes currently holding values
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.scopes.read().keys().cloned().collect();
        scopes.sort();
        scopes
    }
}

impl ContextStore for MemoryContextStore {
    fn get(&self, scope: &str, key: &str) -> Option<Value> {
        self.scopes.read().get(scope)?.get(key).cloned()
    }

    fn set(&self, scope: &str, key: &str, value: Value) {
        let mut scopes = self.scopes.write();
        let entries = scopes.entry(scope.to_string()).or_default();
        if value.is_null() {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), value);
        }
    }

    fn keys(&self, scope: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .scopes
            .read()
            .get(scope)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn delete(&self, scope: &str) {
        self.scopes.write().remove(scope);
    }

    fn clean(&self, live_ids: &HashSet<String>) {
        self.scopes.write().retain(|scope, _| {
            if scope == GLOBAL_CONTEXT {
                return true;
            }
            let id = scope.split(':').next().unwrap_or(scope);
            live_ids.contains(id)
        });
    }
}

/// A context store bound to one scope
#[derive(Clone)]
pub struct ContextHandle {
    store: Arc<dyn ContextStore>,
    scope: String,
}

impl ContextHandle {
    pub fn new(store: Arc<dyn ContextStore>, scope: impl Into<String>) -> Self {
        Self {
            store,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(&self.scope, key)
    }

    /// Set a value; `null` removes the key
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.store.set(&self.scope, key, value.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.keys(&self.scope)
    }
}
