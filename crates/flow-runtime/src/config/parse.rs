//! Flat configuration -> parsed flow graph

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::registry::NodeTypeRegistry;
use crate::types::{
    IdMap, NodeConfig, NodeId, LINK_IN_TYPE, LINK_OUT_TYPE, SUBFLOW_TYPE, TAB_TYPE,
};

/// One wire of a subflow template port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortWire {
    /// Interior node id, or the template id for a straight-through wire
    pub id: NodeId,
    /// Output index on that node
    #[serde(default)]
    pub port: usize,
}

/// An input or output port of a subflow template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubflowPort {
    #[serde(default)]
    pub wires: Vec<PortWire>,
}

/// A tab and the nodes it contains
#[derive(Debug, Clone)]
pub struct FlowDescriptor {
    pub config: NodeConfig,
    /// Nodes with layout coordinates
    pub nodes: IdMap<NodeConfig>,
    /// Config nodes scoped to this tab
    pub configs: IdMap<NodeConfig>,
}

impl FlowDescriptor {
    fn new(config: NodeConfig) -> Self {
        Self {
            config,
            nodes: IdMap::new(),
            configs: IdMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.config.id()
    }

    pub fn label(&self) -> Option<&str> {
        self.config.str_prop("label")
    }
}

/// A subflow template
#[derive(Debug, Clone)]
pub struct SubflowTemplate {
    pub config: NodeConfig,
    pub nodes: IdMap<NodeConfig>,
    pub configs: IdMap<NodeConfig>,
    /// Ids of the `subflow:<id>` nodes referencing this template
    pub instances: Vec<NodeId>,
    pub inputs: Vec<SubflowPort>,
    pub outputs: Vec<SubflowPort>,
}

impl SubflowTemplate {
    fn new(config: NodeConfig) -> Self {
        let inputs = ports_of(&config, "in");
        let outputs = ports_of(&config, "out");
        Self {
            config,
            nodes: IdMap::new(),
            configs: IdMap::new(),
            instances: Vec::new(),
            inputs,
            outputs,
        }
    }

    pub fn id(&self) -> &str {
        self.config.id()
    }
}

fn ports_of(config: &NodeConfig, key: &str) -> Vec<SubflowPort> {
    let Some(value) = config.get(key) else {
        return Vec::new();
    };
    match serde_json::from_value::<Vec<SubflowPort>>(value.clone()) {
        Ok(ports) => ports,
        Err(e) => {
            log::warn!(
                "Ignoring malformed '{}' ports on subflow {}: {}",
                key,
                config.id(),
                e
            );
            Vec::new()
        }
    }
}

/// Normalized view of a flat configuration
#[derive(Debug, Clone, Default)]
pub struct ParsedFlowGraph {
    /// Untouched copy of every entry, in configuration order
    pub all_nodes: IdMap<NodeConfig>,
    pub flows: IdMap<FlowDescriptor>,
    pub subflows: IdMap<SubflowTemplate>,
    /// Config nodes (and unparented nodes) with no owning container
    pub configs: IdMap<NodeConfig>,
    /// Top-level config id -> ids of the nodes referencing it
    pub config_users: HashMap<NodeId, Vec<NodeId>>,
    /// Unregistered node types, first-seen order
    pub missing_types: Vec<String>,
}

impl ParsedFlowGraph {
    /// Ids of the nodes referencing a top-level config node
    pub fn users_of(&self, config_id: &str) -> &[NodeId] {
        self.config_users
            .get(config_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Ids of every configured node
    pub fn live_ids(&self) -> HashSet<String> {
        self.all_nodes.keys().cloned().collect()
    }

    pub fn is_subflow(&self, id: &str) -> bool {
        self.subflows.contains_key(id)
    }

    /// Drop a type from `missing_types`, returning whether it was listed
    pub fn resolve_missing_type(&mut self, node_type: &str) -> bool {
        let before = self.missing_types.len();
        self.missing_types.retain(|t| t != node_type);
        self.missing_types.len() != before
    }

    /// Remove every `credentials` property, including container copies
    pub fn strip_credentials(&mut self) {
        fn strip(map: &mut IdMap<NodeConfig>) {
            let ids: Vec<NodeId> = map.keys().cloned().collect();
            for id in ids {
                if let Some(node) = map.get_mut(&id) {
                    node.remove("credentials");
                }
            }
        }
        strip(&mut self.all_nodes);
        strip(&mut self.configs);
        let flow_ids: Vec<NodeId> = self.flows.keys().cloned().collect();
        for id in flow_ids {
            if let Some(flow) = self.flows.get_mut(&id) {
                strip(&mut flow.nodes);
                strip(&mut flow.configs);
            }
        }
        let subflow_ids: Vec<NodeId> = self.subflows.keys().cloned().collect();
        for id in subflow_ids {
            if let Some(subflow) = self.subflows.get_mut(&id) {
                strip(&mut subflow.nodes);
                strip(&mut subflow.configs);
            }
        }
    }

    /// Node and config maps of the tab or template with the given id
    fn container_mut(
        &mut self,
        id: &str,
    ) -> Option<(&mut IdMap<NodeConfig>, &mut IdMap<NodeConfig>)> {
        if let Some(flow) = self.flows.get_mut(id) {
            return Some((&mut flow.nodes, &mut flow.configs));
        }
        self.subflows
            .get_mut(id)
            .map(|subflow| (&mut subflow.nodes, &mut subflow.configs))
    }
}

/// Parse a flat configuration
///
/// The input is never modified; every map holds its own copy. Link-out
/// wiring is synthesized on the container copies only, so `all_nodes`
/// keeps what was deployed. A node whose `z` names neither a tab nor a
/// subflow gets a placeholder tab so it still runs.
pub fn parse_config(config: &[NodeConfig], types: &NodeTypeRegistry) -> ParsedFlowGraph {
    let mut graph = ParsedFlowGraph::default();

    for node in config {
        graph.all_nodes.insert(node.id().to_string(), node.clone());
        if node.node_type() == TAB_TYPE {
            graph
                .flows
                .insert(node.id().to_string(), FlowDescriptor::new(node.clone()));
        }
    }

    for node in config {
        if node.node_type() == SUBFLOW_TYPE {
            graph
                .subflows
                .insert(node.id().to_string(), SubflowTemplate::new(node.clone()));
        }
    }

    let link_wires = link_adjacency(config);

    for node in config {
        let node_type = node.node_type();
        if node_type == TAB_TYPE || node_type == SUBFLOW_TYPE {
            continue;
        }
        let template_id = node.subflow_template_id();
        let registered = match template_id {
            Some(template) => graph.subflows.contains_key(template),
            None => types.has_node_type(node_type),
        };
        if !registered && !graph.missing_types.iter().any(|t| t == node_type) {
            graph.missing_types.push(node_type.to_string());
        }

        let mut copy = node.clone();
        if node_type == LINK_OUT_TYPE && node.contains_key("links") {
            let targets = link_wires.get(node.id()).cloned().unwrap_or_default();
            copy.set_wires(&vec![targets]);
        }

        if let Some(z) = node.z() {
            if !graph.flows.contains_key(z) && !graph.subflows.contains_key(z) {
                log::debug!("Node {} references unknown flow {}, adding placeholder", node.id(), z);
                graph
                    .flows
                    .insert(z.to_string(), FlowDescriptor::new(NodeConfig::new(z, TAB_TYPE)));
            }
        }

        let id = node.id().to_string();
        if node.has_position() {
            if let Some(template) = template_id {
                if let Some(subflow) = graph.subflows.get_mut(template) {
                    copy.set("subflow", template);
                    subflow.instances.push(id.clone());
                }
            }
        }
        let container = node.z().and_then(|z| graph.container_mut(z));
        match container {
            Some((nodes, _)) if node.has_position() => {
                nodes.insert(id, copy);
            }
            Some((_, configs)) => {
                configs.insert(id, copy);
            }
            None => {
                graph.configs.insert(id, copy);
            }
        }
    }

    for node in config {
        let node_type = node.node_type();
        if node_type == TAB_TYPE || node_type == SUBFLOW_TYPE {
            continue;
        }
        for (key, value) in node.properties() {
            if key == "id" || key == "wires" || key == "_users" {
                continue;
            }
            let Some(referenced) = value.as_str() else {
                continue;
            };
            if graph.configs.contains_key(referenced) {
                let users = graph
                    .config_users
                    .entry(referenced.to_string())
                    .or_default();
                if !users.iter().any(|u| u == node.id()) {
                    users.push(node.id().to_string());
                }
            }
        }
    }

    graph
}

/// Link-out id -> every link-in connected to it, from either side's `links`
fn link_adjacency(config: &[NodeConfig]) -> HashMap<NodeId, Vec<NodeId>> {
    fn connect(map: &mut HashMap<NodeId, Vec<NodeId>>, link_out: &str, link_in: &str) {
        let targets = map.entry(link_out.to_string()).or_default();
        if !targets.iter().any(|t| t == link_in) {
            targets.push(link_in.to_string());
        }
    }

    let mut map = HashMap::new();
    for node in config {
        let Some(links) = node.str_list("links") else {
            continue;
        };
        match node.node_type() {
            LINK_IN_TYPE => {
                for link_out in &links {
                    connect(&mut map, link_out, node.id());
                }
            }
            LINK_OUT_TYPE => {
                for link_in in &links {
                    connect(&mut map, node.id(), link_in);
                }
            }
            _ => {}
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn types(names: &[&str]) -> NodeTypeRegistry {
        let types = NodeTypeRegistry::new();
        for name in names {
            types.register_fn("test", name, |_node: &Arc<crate::node::Node>| Ok(()));
        }
        types
    }

    fn config(value: serde_json::Value) -> Vec<NodeConfig> {
        NodeConfig::list_from_value(value).unwrap()
    }

    #[test]
    fn test_classifies_nodes_and_configs() {
        let flows = config(json!([
            {"id": "t1", "type": "tab"},
            {"id": "n1", "type": "inject", "z": "t1", "x": 1, "y": 1, "wires": [["n2"]]},
            {"id": "n2", "type": "debug", "z": "t1", "x": 2, "y": 1, "wires": []},
            {"id": "c1", "type": "broker", "z": "t1"},
            {"id": "g1", "type": "broker"},
            {"id": "u1", "type": "debug", "z": "t1", "x": 3, "y": 3, "broker": "g1"}
        ]));
        let graph = parse_config(&flows, &types(&["inject", "debug", "broker"]));

        assert_eq!(graph.all_nodes.len(), 6);
        let tab = graph.flows.get("t1").unwrap();
        let node_ids: Vec<_> = tab.nodes.keys().cloned().collect();
        assert_eq!(node_ids, vec!["n1", "n2", "u1"]);
        assert!(tab.configs.contains_key("c1"));
        assert!(graph.configs.contains_key("g1"));
        assert_eq!(graph.users_of("g1"), ["u1".to_string()]);
        assert!(graph.missing_types.is_empty());
    }

    #[test]
    fn test_missing_types_dedup_in_order() {
        let flows = config(json!([
            {"id": "t1", "type": "tab"},
            {"id": "a", "type": "mqtt in", "z": "t1", "x": 1, "y": 1},
            {"id": "b", "type": "subflow:nope", "z": "t1", "x": 1, "y": 1},
            {"id": "c", "type": "mqtt in", "z": "t1", "x": 1, "y": 1},
            {"id": "sf", "type": "subflow"}
        ]));
        let graph = parse_config(&flows, &types(&[]));
        assert_eq!(graph.missing_types, vec!["mqtt in", "subflow:nope"]);
    }

    #[test]
    fn test_subflow_template_and_instances() {
        let flows = config(json!([
            {"id": "t1", "type": "tab"},
            {"id": "sf1", "type": "subflow",
             "in": [{"x": 0, "y": 0, "wires": [{"id": "s1"}]}],
             "out": [{"x": 0, "y": 0, "wires": [{"id": "s1", "port": 0}]}]},
            {"id": "s1", "type": "change", "z": "sf1", "x": 5, "y": 5, "wires": [[]]},
            {"id": "sc", "type": "broker", "z": "sf1"},
            {"id": "i1", "type": "subflow:sf1", "z": "t1", "x": 9, "y": 9, "wires": [[]]}
        ]));
        let graph = parse_config(&flows, &types(&["change", "broker"]));

        let template = graph.subflows.get("sf1").unwrap();
        assert!(template.nodes.contains_key("s1"));
        assert!(template.configs.contains_key("sc"));
        assert_eq!(template.instances, vec!["i1"]);
        assert_eq!(template.inputs[0].wires[0], PortWire { id: "s1".into(), port: 0 });
        assert_eq!(template.outputs.len(), 1);

        let instance = graph.flows.get("t1").unwrap().nodes.get("i1").unwrap();
        assert_eq!(instance.str_prop("subflow"), Some("sf1"));
        assert!(!graph.all_nodes.get("i1").unwrap().contains_key("subflow"));
        assert!(graph.missing_types.is_empty());
    }

    #[test]
    fn test_link_wiring_is_synthesized_on_container_copy() {
        let flows = config(json!([
            {"id": "t1", "type": "tab"},
            {"id": "lo", "type": "link out", "z": "t1", "x": 1, "y": 1, "links": ["li1"]},
            {"id": "li1", "type": "link in", "z": "t1", "x": 1, "y": 1, "links": ["lo"], "wires": [[]]},
            {"id": "li2", "type": "link in", "z": "t1", "x": 1, "y": 1, "links": ["lo"], "wires": [[]]}
        ]));
        let graph = parse_config(&flows, &types(&["link in", "link out"]));

        let link_out = graph.flows.get("t1").unwrap().nodes.get("lo").unwrap();
        assert_eq!(
            link_out.wires(),
            vec![vec!["li1".to_string(), "li2".to_string()]]
        );
        assert!(!graph.all_nodes.get("lo").unwrap().has_wires());
    }

    #[test]
    fn test_link_out_without_links_keeps_its_wires() {
        let flows = config(json!([
            {"id": "t1", "type": "tab"},
            {"id": "lo", "type": "link out", "z": "t1", "x": 1, "y": 1, "wires": [["n2"]]},
            {"id": "n2", "type": "debug", "z": "t1", "x": 1, "y": 1, "wires": []}
        ]));
        let graph = parse_config(&flows, &types(&["link out", "debug"]));

        let link_out = graph.flows.get("t1").unwrap().nodes.get("lo").unwrap();
        assert_eq!(link_out.wires(), vec![vec!["n2".to_string()]]);
    }

    #[test]
    fn test_unknown_container_gets_placeholder_tab() {
        let flows = config(json!([
            {"id": "n1", "type": "debug", "z": "gone", "x": 1, "y": 1}
        ]));
        let graph = parse_config(&flows, &types(&["debug"]));

        let placeholder = graph.flows.get("gone").unwrap();
        assert!(placeholder.nodes.contains_key("n1"));
        assert!(!graph.all_nodes.contains_key("gone"));
    }

    #[test]
    fn test_input_is_not_modified() {
        let flows = config(json!([
            {"id": "t1", "type": "tab"},
            {"id": "lo", "type": "link out", "z": "t1", "x": 1, "y": 1, "links": []}
        ]));
        let before = flows.clone();
        let _ = parse_config(&flows, &types(&[]));
        assert_eq!(flows, before);
    }

    #[test]
    fn test_strip_credentials() {
        let flows = config(json!([
            {"id": "t1", "type": "tab"},
            {"id": "n1", "type": "debug", "z": "t1", "x": 1, "y": 1, "credentials": {"k": "v"}}
        ]));
        let mut graph = parse_config(&flows, &types(&["debug"]));
        graph.strip_credentials();

        assert!(!graph.all_nodes.get("n1").unwrap().contains_key("credentials"));
        let tab = graph.flows.get("t1").unwrap();
        assert!(!tab.nodes.get("n1").unwrap().contains_key("credentials"));
    }
}
