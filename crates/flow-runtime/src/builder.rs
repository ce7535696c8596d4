//! Fluent builder for flat flow configurations
//!
//! Provides a compact API for constructing deployable configurations in
//! tests and embedding hosts.

use serde_json::{json, Value};

use crate::types::{NodeConfig, NodeId, SUBFLOW_INSTANCE_PREFIX, SUBFLOW_TYPE, TAB_TYPE};

/// Fluent builder for flow configurations
///
/// Nodes are placed in the most recently added tab or subflow. Positioned
/// nodes get layout coordinates; config nodes do not.
///
/// # Example
///
/// ```ignore
/// let config = FlowConfigBuilder::new()
///     .add_tab("t1", "Main")
///     .add_node("inject", "inject")
///     .add_node("debug", "debug")
///     .wire("inject", 0, "debug")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct FlowConfigBuilder {
    nodes: Vec<NodeConfig>,
    container: Option<NodeId>,
    placed: usize,
}

impl FlowConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tab and make it the current container
    pub fn add_tab(mut self, id: impl Into<NodeId>, label: impl Into<String>) -> Self {
        let id = id.into();
        let mut tab = NodeConfig::new(id.as_str(), TAB_TYPE);
        tab.set("label", label.into());
        self.nodes.push(tab);
        self.container = Some(id);
        self
    }

    /// Add a subflow template and make it the current container
    pub fn add_subflow(mut self, id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        let id = id.into();
        let mut subflow = NodeConfig::new(id.as_str(), SUBFLOW_TYPE);
        subflow.set("name", name.into());
        subflow.set("in", json!([]));
        subflow.set("out", json!([]));
        self.nodes.push(subflow);
        self.container = Some(id);
        self
    }

    /// Add a positioned node to the current container
    pub fn add_node(mut self, id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        let mut node = self.contained(id.into(), node_type.into());
        self.placed += 1;
        node.set("x", 100 * self.placed as u64);
        node.set("y", 100);
        node.set_wires(&Vec::new());
        self.nodes.push(node);
        self
    }

    /// Add a reference to subflow template `template` in the current container
    pub fn add_subflow_instance(self, id: impl Into<NodeId>, template: &str) -> Self {
        self.add_node(id, format!("{}{}", SUBFLOW_INSTANCE_PREFIX, template))
    }

    /// Add a config node to the current container
    pub fn add_config(mut self, id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        let node = self.contained(id.into(), node_type.into());
        self.nodes.push(node);
        self
    }

    /// Add a config node with no container
    pub fn add_global_config(mut self, id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        self.nodes.push(NodeConfig::new(id, node_type));
        self
    }

    /// Set a property on the most recently added entry
    pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.set(key, value);
        }
        self
    }

    /// Wire output `port` of `source` to `target`
    pub fn wire(mut self, source: &str, port: usize, target: impl Into<NodeId>) -> Self {
        if let Some(node) = self.find(source) {
            let mut wires = node.wires();
            if wires.len() <= port {
                wires.resize_with(port + 1, Vec::new);
            }
            wires[port].push(target.into());
            node.set_wires(&wires);
        }
        self
    }

    /// Route subflow input `port` of the current subflow to `target`
    pub fn subflow_input(mut self, port: usize, target: &str) -> Self {
        self.push_port("in", port, json!({ "id": target }));
        self
    }

    /// Feed subflow output `port` of the current subflow from `source_port`
    /// of `source`
    ///
    /// Passing the subflow's own id as `source` routes its input straight
    /// through.
    pub fn subflow_output(mut self, port: usize, source: &str, source_port: usize) -> Self {
        self.push_port("out", port, json!({ "id": source, "port": source_port }));
        self
    }

    pub fn build(self) -> Vec<NodeConfig> {
        self.nodes
    }

    fn contained(&self, id: NodeId, node_type: String) -> NodeConfig {
        let mut node = NodeConfig::new(id, node_type);
        if let Some(z) = &self.container {
            node.set("z", z.as_str());
        }
        node
    }

    fn find(&mut self, id: &str) -> Option<&mut NodeConfig> {
        self.nodes.iter_mut().find(|n| n.id() == id)
    }

    fn push_port(&mut self, key: &str, port: usize, wire: Value) {
        let Some(container) = self.container.clone() else {
            return;
        };
        let Some(subflow) = self.find(&container) else {
            return;
        };
        if subflow.node_type() != SUBFLOW_TYPE {
            return;
        }
        let mut ports = match subflow.get(key) {
            Some(Value::Array(ports)) => ports.clone(),
            _ => Vec::new(),
        };
        while ports.len() <= port {
            ports.push(json!({ "wires": [] }));
        }
        if let Some(Value::Array(wires)) = ports[port].get_mut("wires") {
            wires.push(wire);
        }
        subflow.set(key, ports);
    }
}
