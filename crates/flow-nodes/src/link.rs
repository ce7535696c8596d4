//! Link nodes
//!
//! `link out` and `link in` pairs act as virtual wires, including across
//! tabs. The runtime resolves the `links` lists of both ends into the
//! `link out` node's wiring at deploy time, so both nodes simply relay
//! what they receive.

use std::sync::Arc;

use flow_runtime::types::{LINK_IN_TYPE, LINK_OUT_TYPE};
use flow_runtime::{Node, NodeFactory, Result};
use serde::{Deserialize, Serialize};

use crate::node_config;

/// Configuration shared by both link node types
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Ids of the nodes at the other end of the link
    #[serde(default)]
    pub links: Vec<String>,
}

/// Factory for `link in` nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkInNode;

impl LinkInNode {
    pub const NODE_TYPE: &'static str = LINK_IN_TYPE;
}

impl NodeFactory for LinkInNode {
    fn create(&self, node: &Arc<Node>) -> Result<()> {
        let _config: LinkConfig = node_config(node)?;
        node.on_input(|node, msg| {
            node.send(msg);
            Ok(())
        });
        Ok(())
    }
}

/// Factory for `link out` nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkOutNode;

impl LinkOutNode {
    pub const NODE_TYPE: &'static str = LINK_OUT_TYPE;
}

impl NodeFactory for LinkOutNode {
    fn create(&self, node: &Arc<Node>) -> Result<()> {
        let config: LinkConfig = node_config(node)?;
        if config.links.is_empty() {
            node.debug("no links configured");
        }
        node.on_input(|node, msg| {
            node.send(msg);
            Ok(())
        });
        Ok(())
    }
}
