//! Node type registry
//!
//! Maps node type strings to factories that attach behavior to a freshly
//! constructed [`Node`]. The engine itself knows no node behaviors; hosts
//! register them here before deploying flows.
//!
//! # Usage
//!
//! ```ignore
//! use flow_runtime::{NodeTypeRegistry, Node};
//!
//! let types = NodeTypeRegistry::new();
//! types.register_fn("core", "debug", |node| {
//!     node.on_input(|node, msg| {
//!         node.log(&format!("{:?}", msg.payload()));
//!         Ok(())
//!     });
//!     Ok(())
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{FlowError, Result};
use crate::node::Node;

/// Per-node-type constructor
///
/// Receives the wrapper built from the node's configuration and attaches
/// input handlers and close hooks to it. Returning an error omits the node
/// from its flow.
pub trait NodeFactory: Send + Sync {
    fn create(&self, node: &Arc<Node>) -> Result<()>;
}

/// Closure-backed factory
struct FnNodeFactory<F> {
    constructor: F,
}

impl<F> NodeFactory for FnNodeFactory<F>
where
    F: Fn(&Arc<Node>) -> Result<()> + Send + Sync,
{
    fn create(&self, node: &Arc<Node>) -> Result<()> {
        (self.constructor)(node)
    }
}

/// A registration entry combining the owning module with the factory
#[derive(Clone)]
struct RegistryEntry {
    module: String,
    factory: Arc<dyn NodeFactory>,
}

/// Registry of node types and the modules that provide them
///
/// Interior locking lets types be registered while flows are running,
/// which is how deployments blocked on missing types get unblocked.
pub struct NodeTypeRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl NodeTypeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a node type provided by `module`
    pub fn register(&self, module: &str, node_type: &str, factory: Arc<dyn NodeFactory>) {
        log::debug!("Registering node type '{}' from module '{}'", node_type, module);
        self.entries.write().insert(
            node_type.to_string(),
            RegistryEntry {
                module: module.to_string(),
                factory,
            },
        );
    }

    /// Register a node type using a constructor closure
    pub fn register_fn<F>(&self, module: &str, node_type: &str, constructor: F)
    where
        F: Fn(&Arc<Node>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(module, node_type, Arc::new(FnNodeFactory { constructor }));
    }

    /// Register several types from one module
    pub fn register_module(&self, module: &str, types: Vec<(&str, Arc<dyn NodeFactory>)>) {
        for (node_type, factory) in types {
            self.register(module, node_type, factory);
        }
    }

    /// Get the factory for a node type
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeFactory>> {
        self.entries
            .read()
            .get(node_type)
            .map(|e| Arc::clone(&e.factory))
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.read().contains_key(node_type)
    }

    /// List all registered node type strings, sorted
    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.entries.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Node types provided by a module
    ///
    /// Fails when no type is registered under the module id.
    pub fn get_module(&self, module: &str) -> Result<Vec<String>> {
        let mut types: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.module == module)
            .map(|(t, _)| t.clone())
            .collect();
        if types.is_empty() {
            return Err(FlowError::UnknownModule(module.to_string()));
        }
        types.sort();
        Ok(types)
    }

    /// Module that provides a node type
    pub fn module_of(&self, node_type: &str) -> Option<String> {
        self.entries.read().get(node_type).map(|e| e.module.clone())
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node type.
    pub fn merge(&self, other: NodeTypeRegistry) {
        let incoming = other.entries.into_inner();
        self.entries.write().extend(incoming);
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
