//! Status node
//!
//! Receives status updates from nodes in its scope as
//! `{ status: { text, fill?, shape?, source } }` messages and passes them on.

use std::sync::Arc;

use flow_runtime::types::STATUS_TYPE;
use flow_runtime::{Node, NodeFactory, Result};
use serde::{Deserialize, Serialize};

use crate::node_config;

/// Configuration for a status node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Only report status from these node ids; absent or empty reports all
    #[serde(default)]
    pub scope: Option<Vec<String>>,
}

/// Factory for `status` nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusNode;

impl StatusNode {
    pub const NODE_TYPE: &'static str = STATUS_TYPE;
}

impl NodeFactory for StatusNode {
    fn create(&self, node: &Arc<Node>) -> Result<()> {
        let config: StatusConfig = node_config(node)?;
        if let Some(scope) = config.scope.filter(|s| !s.is_empty()) {
            log::debug!("StatusNode {}: reporting {} node(s)", node.id(), scope.len());
        }
        node.on_input(|node, msg| {
            node.send(msg);
            Ok(())
        });
        Ok(())
    }
}
