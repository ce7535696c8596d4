//! Flow Nodes
//!
//! Built-in node types the flow runtime's routing and supervision refer to.
//!
//! # Categories
//!
//! - **Supervision**: `catch` and `status` handlers, fed by the runtime's
//!   scope walk
//! - **Routing**: `link in` / `link out` virtual wires
//!
//! Hosts call [`register_core_nodes`] once at startup.

pub mod catch;
pub mod link;
pub mod setup;
pub mod status;

pub use catch::{CatchConfig, CatchNode};
pub use link::{LinkConfig, LinkInNode, LinkOutNode};
pub use setup::{register_core_nodes, CORE_MODULE};
pub use status::{StatusConfig, StatusNode};

use flow_runtime::{FlowError, Node, Result};
use serde::de::DeserializeOwned;

/// Deserialize a node's own configuration into its typed form
pub(crate) fn node_config<T: DeserializeOwned>(node: &Node) -> Result<T> {
    serde_json::from_value(node.config().clone().into_value()).map_err(|e| {
        FlowError::construction(format!(
            "invalid {} configuration: {}",
            node.node_type(),
            e
        ))
    })
}
