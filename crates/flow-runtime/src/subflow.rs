//! Subflow instantiation
//!
//! Every `subflow:<id>` node is expanded into a fresh copy of the template's
//! nodes. The copy is entered through a boundary node that carries the
//! reference node's id and passes every message it receives on to the
//! template's input targets. Template output ports are resolved by appending
//! the reference node's outer wiring to the interior nodes feeding each port.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::config::{ParsedFlowGraph, SubflowPort, SubflowTemplate};
use crate::error::{FlowError, Result};
use crate::flow::create_node;
use crate::node::{Node, NodeEnv, RewireHook};
use crate::registry::NodeTypeRegistry;
use crate::types::{NodeConfig, NodeId, Wires, CATCH_TYPE, STATUS_TYPE};
use crate::util::generate_id;

/// Properties never treated as references to sibling nodes
const STRUCTURAL_PROPS: [&str; 5] = ["id", "z", "_alias", "wires", "type"];

/// Append `targets` to output `port`, growing the output list as needed
fn extend_port(wires: &mut Wires, port: usize, targets: &[NodeId]) {
    if wires.len() <= port {
        wires.resize_with(port + 1, Vec::new);
    }
    wires[port].extend(targets.iter().cloned());
}

/// Pushes new outer wiring of a subflow reference into its instance
struct SubflowRewirer {
    template_id: NodeId,
    outputs: Vec<SubflowPort>,
    /// Template node id -> instance node id
    node_map: HashMap<NodeId, NodeId>,
    boundary_wires: Wires,
    /// Wiring of output-port feeders before outer wires were appended
    interior_wires: HashMap<NodeId, Wires>,
    instance_nodes: HashMap<NodeId, Weak<Node>>,
}

impl RewireHook for SubflowRewirer {
    fn update_wires(&self, boundary: &Node, wires: Wires) {
        let mut boundary_wires = self.boundary_wires.clone();
        let mut boundary_modified = false;
        let mut modified: Vec<(NodeId, Wires)> = Vec::new();

        for (index, port) in self.outputs.iter().enumerate() {
            let outer = wires.get(index).map(Vec::as_slice).unwrap_or_default();
            for wire in &port.wires {
                if wire.id == self.template_id {
                    extend_port(&mut boundary_wires, wire.port, outer);
                    boundary_modified = true;
                    continue;
                }
                let Some(new_id) = self.node_map.get(&wire.id) else {
                    continue;
                };
                let position = match modified.iter().position(|(id, _)| id == new_id) {
                    Some(position) => position,
                    None => {
                        let original = self.interior_wires.get(new_id).cloned().unwrap_or_default();
                        modified.push((new_id.clone(), original));
                        modified.len() - 1
                    }
                };
                extend_port(&mut modified[position].1, wire.port, outer);
            }
        }

        for (id, node_wires) in modified {
            match self.instance_nodes.get(&id).and_then(Weak::upgrade) {
                Some(node) => node.update_wires(node_wires),
                None => log::debug!("Subflow node {} is not running, skipping rewire", id),
            }
        }
        if boundary_modified {
            boundary.apply_wires(boundary_wires);
        }
    }
}

/// Expand one subflow reference into live nodes, boundary node first
///
/// Interior nodes that fail to construct are logged and left out. Nested
/// references are expanded recursively; a nested reference that cannot be
/// expanded (unknown template, or one that transitively contains itself)
/// is logged and left out the same way.
pub(crate) fn instantiate_subflow(
    template: &SubflowTemplate,
    instance: &NodeConfig,
    graph: &ParsedFlowGraph,
    types: &NodeTypeRegistry,
    env: &NodeEnv,
) -> Result<Vec<Arc<Node>>> {
    let mut chain = Vec::new();
    expand(template, instance, graph, types, env, &mut chain)
}

fn expand(
    template: &SubflowTemplate,
    instance: &NodeConfig,
    graph: &ParsedFlowGraph,
    types: &NodeTypeRegistry,
    env: &NodeEnv,
    chain: &mut Vec<NodeId>,
) -> Result<Vec<Arc<Node>>> {
    let template_id = template.id().to_string();
    if chain.contains(&template_id) {
        return Err(FlowError::InvalidConfig(format!(
            "subflow {} contains itself",
            template_id
        )));
    }
    chain.push(template_id.clone());

    // Fresh copies of every template node
    let mut node_map: HashMap<NodeId, NodeId> = HashMap::new();
    let mut copies: Vec<NodeConfig> = Vec::new();
    for def in template.configs.values().chain(template.nodes.values()) {
        let mut copy = def.clone();
        let new_id = generate_id();
        node_map.insert(def.id().to_string(), new_id.clone());
        copy.set("_alias", def.id());
        copy.set("id", new_id);
        copy.set("z", instance.id());
        copies.push(copy);
    }

    for copy in &mut copies {
        if copy.has_wires() {
            let wires: Wires = copy
                .wires()
                .into_iter()
                .map(|output| {
                    output
                        .iter()
                        .filter_map(|target| node_map.get(target).cloned())
                        .collect()
                })
                .collect();
            copy.set_wires(&wires);
        }

        let scoped = matches!(copy.node_type(), CATCH_TYPE | STATUS_TYPE);
        if scoped {
            if let Some(scope) = copy.str_list("scope") {
                let scope: Vec<Value> = scope
                    .iter()
                    .map(|id| Value::String(node_map.get(id).cloned().unwrap_or_default()))
                    .collect();
                copy.set("scope", scope);
            }
        }
        for (key, value) in copy.properties_mut() {
            if STRUCTURAL_PROPS.contains(&key.as_str()) || (scoped && key == "scope") {
                continue;
            }
            let remapped = value.as_str().and_then(|v| node_map.get(v)).cloned();
            if let Some(new_id) = remapped {
                *value = Value::String(new_id);
            }
        }
    }

    let mut boundary_wires: Wires = template
        .inputs
        .iter()
        .map(|port| {
            port.wires
                .iter()
                .filter_map(|wire| node_map.get(&wire.id).cloned())
                .collect()
        })
        .collect();
    let original_boundary_wires = boundary_wires.clone();

    let outer_wires = instance.wires();
    let mut interior_wires: HashMap<NodeId, Wires> = HashMap::new();
    for (index, port) in template.outputs.iter().enumerate() {
        let outer = outer_wires.get(index).map(Vec::as_slice).unwrap_or_default();
        for wire in &port.wires {
            if wire.id == template_id {
                extend_port(&mut boundary_wires, wire.port, outer);
                continue;
            }
            let Some(new_id) = node_map.get(&wire.id) else {
                log::warn!(
                    "Subflow {} output {} references unknown node {}",
                    template_id,
                    index,
                    wire.id
                );
                continue;
            };
            let Some(copy) = copies.iter_mut().find(|c| c.id() == new_id) else {
                continue;
            };
            interior_wires
                .entry(new_id.clone())
                .or_insert_with(|| copy.wires());
            let mut wires = copy.wires();
            extend_port(&mut wires, wire.port, outer);
            copy.set_wires(&wires);
        }
    }

    let mut boundary_config = NodeConfig::new(instance.id(), instance.node_type());
    if let Some(z) = instance.z() {
        boundary_config.set("z", z);
    }
    if let Some(name) = instance.name() {
        boundary_config.set("name", name);
    }
    boundary_config.set_wires(&boundary_wires);
    let boundary = Node::new(boundary_config, env.clone());
    boundary.on_input(|node, msg| {
        node.send(msg);
        Ok(())
    });

    let mut nodes = vec![Arc::clone(&boundary)];
    for copy in &copies {
        match copy.subflow_template_id() {
            Some(nested_id) => {
                let expanded = graph
                    .subflows
                    .get(nested_id)
                    .ok_or_else(|| FlowError::UnknownSubflow(nested_id.to_string()))
                    .and_then(|nested| expand(nested, copy, graph, types, env, chain));
                match expanded {
                    Ok(instance) => nodes.extend(instance),
                    Err(e) => log::error!("[{}:{}] {}", copy.node_type(), copy.id(), e),
                }
            }
            None => {
                if let Some(node) = create_node(copy, types, env) {
                    nodes.push(node);
                }
            }
        }
    }

    let instance_nodes = nodes
        .iter()
        .map(|node| (node.id().to_string(), Arc::downgrade(node)))
        .collect();
    boundary.set_rewire_hook(Arc::new(SubflowRewirer {
        template_id,
        outputs: template.outputs.clone(),
        node_map,
        boundary_wires: original_boundary_wires,
        interior_wires,
        instance_nodes,
    }));

    chain.pop();
    Ok(nodes)
}
