//! Registration of the built-in node types

use std::sync::Arc;

use flow_runtime::{NodeFactory, NodeTypeRegistry};

use crate::{CatchNode, LinkInNode, LinkOutNode, StatusNode};

/// Module id the built-in types are registered under
pub const CORE_MODULE: &str = "core";

/// Register every built-in node type with `registry`
///
/// # Example
///
/// ```ignore
/// let types = Arc::new(NodeTypeRegistry::new());
/// flow_nodes::register_core_nodes(&types);
/// ```
pub fn register_core_nodes(registry: &NodeTypeRegistry) {
    let types: Vec<(&str, Arc<dyn NodeFactory>)> = vec![
        (CatchNode::NODE_TYPE, Arc::new(CatchNode)),
        (StatusNode::NODE_TYPE, Arc::new(StatusNode)),
        (LinkInNode::NODE_TYPE, Arc::new(LinkInNode)),
        (LinkOutNode::NODE_TYPE, Arc::new(LinkOutNode)),
    ];
    let count = types.len();
    registry.register_module(CORE_MODULE, types);
    log::info!("Registered {} core node types", count);
}
