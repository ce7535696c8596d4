//! Catch node
//!
//! Receives errors raised by nodes in its scope and passes them on to its
//! outputs. Which errors reach it is decided by the runtime: the nearest
//! enclosing scope with a matching catch wins, and the optional `scope`
//! list restricts the nodes it listens to.

use std::sync::Arc;

use flow_runtime::types::CATCH_TYPE;
use flow_runtime::{Node, NodeFactory, Result};
use serde::{Deserialize, Serialize};

use crate::node_config;

/// Configuration for a catch node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatchConfig {
    /// Only catch errors from these node ids; absent or empty catches all
    #[serde(default)]
    pub scope: Option<Vec<String>>,
}

/// Factory for `catch` nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchNode;

impl CatchNode {
    pub const NODE_TYPE: &'static str = CATCH_TYPE;
}

impl NodeFactory for CatchNode {
    fn create(&self, node: &Arc<Node>) -> Result<()> {
        let config: CatchConfig = node_config(node)?;
        log::debug!(
            "CatchNode {}: listening to {}",
            node.id(),
            match &config.scope {
                Some(scope) if !scope.is_empty() => format!("{} node(s)", scope.len()),
                _ => "all nodes".to_string(),
            }
        );
        node.on_input(|node, msg| {
            node.send(msg);
            Ok(())
        });
        Ok(())
    }
}
