//! Diffing two parsed flow graphs for incremental redeploy

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::parse::ParsedFlowGraph;
use crate::types::{DeployType, NodeConfig, NodeId, SUBFLOW_INSTANCE_PREFIX, SUBFLOW_TYPE};

/// Classification of every node touched by a redeploy
///
/// A node id is in at most one of `added`, `changed`, `removed` and
/// `rewired`. `linked` holds the untouched nodes wired to any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub added: BTreeSet<NodeId>,
    pub changed: BTreeSet<NodeId>,
    pub removed: BTreeSet<NodeId>,
    /// Nodes whose only change is their wiring
    pub rewired: BTreeSet<NodeId>,
    pub linked: BTreeSet<NodeId>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.changed.is_empty()
            && self.removed.is_empty()
            && self.rewired.is_empty()
            && self.linked.is_empty()
    }

    /// Nodes to stop for a deploy type; `None` means stop everything
    pub fn stop_list(&self, deploy_type: DeployType) -> Option<Vec<NodeId>> {
        match deploy_type {
            DeployType::Nodes => Some(self.changed.union(&self.removed).cloned().collect()),
            DeployType::Flows => Some(
                self.changed
                    .iter()
                    .chain(&self.removed)
                    .chain(&self.linked)
                    .cloned()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
            ),
            DeployType::Full | DeployType::Load => None,
        }
    }
}

/// Whether two configs differ in anything but layout and wiring
fn diff_nodes(old: &NodeConfig, new: &NodeConfig) -> bool {
    fn material(config: &NodeConfig) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        config
            .properties()
            .filter(|(key, _)| !matches!(key.as_str(), "x" | "y" | "wires"))
    }
    if material(old).count() != material(new).count() {
        return true;
    }
    material(new).any(|(key, value)| old.get(key) != Some(value))
}

/// Working state of one diff
struct Classifier<'a> {
    new: &'a ParsedFlowGraph,
    added: BTreeSet<NodeId>,
    changed: BTreeSet<NodeId>,
    removed: BTreeSet<NodeId>,
    rewired: BTreeSet<NodeId>,
    changed_subflows: Vec<NodeId>,
}

impl<'a> Classifier<'a> {
    fn is_template(&self, id: &str) -> bool {
        self.new
            .all_nodes
            .get(id)
            .map_or(false, |n| n.node_type() == SUBFLOW_TYPE)
    }

    fn note_subflow(&mut self, id: &str) {
        if !self.changed_subflows.iter().any(|s| s == id) {
            self.changed_subflows.push(id.to_string());
        }
    }

    /// Mark the container of `node` changed; returns true when that
    /// container is a subflow template, which supersedes the child
    fn mark_parent(&mut self, node: &NodeConfig) -> bool {
        let Some(z) = node.z() else {
            return false;
        };
        if !self.new.all_nodes.contains_key(z) {
            return false;
        }
        self.changed.insert(z.to_string());
        if self.is_template(z) {
            self.note_subflow(z);
            return true;
        }
        false
    }
}

/// Build the undirected wiring adjacency of one graph into `link_map`
fn add_wiring(link_map: &mut HashMap<NodeId, Vec<NodeId>>, graph: &ParsedFlowGraph) {
    fn link(link_map: &mut HashMap<NodeId, Vec<NodeId>>, from: &str, to: &str) {
        let neighbours = link_map.entry(from.to_string()).or_default();
        if !neighbours.iter().any(|n| n == to) {
            neighbours.push(to.to_string());
        }
    }
    for (id, node) in graph.all_nodes.iter() {
        if !node.has_wires() {
            continue;
        }
        link_map.entry(id.clone()).or_default();
        for target in node.wires().iter().flatten() {
            link(link_map, id, target);
            if graph.all_nodes.contains_key(target) {
                link(link_map, target, id);
            }
        }
    }
}

/// Compare two parsed graphs
pub fn diff_configs(old: &ParsedFlowGraph, new: &ParsedFlowGraph) -> DiffResult {
    let mut link_map: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    add_wiring(&mut link_map, old);
    add_wiring(&mut link_map, new);

    let mut c = Classifier {
        new,
        added: BTreeSet::new(),
        changed: BTreeSet::new(),
        removed: BTreeSet::new(),
        rewired: BTreeSet::new(),
        changed_subflows: Vec::new(),
    };

    for (id, old_node) in old.all_nodes.iter() {
        let Some(new_node) = new.all_nodes.get(id) else {
            c.removed.insert(id.clone());
            c.mark_parent(old_node);
            continue;
        };

        if diff_nodes(old_node, new_node) || new_node.contains_key("credentials") {
            c.changed.insert(id.clone());
            if new_node.node_type() == SUBFLOW_TYPE {
                c.note_subflow(id);
            }
            if c.mark_parent(new_node) {
                c.changed.remove(id);
            }
        }
        if old_node.get("wires") != new_node.get("wires") {
            c.rewired.insert(id.clone());
            if c.mark_parent(new_node) {
                c.rewired.remove(id);
            }
        }
    }

    for (id, new_node) in new.all_nodes.iter() {
        if old.all_nodes.contains_key(id) {
            continue;
        }
        c.added.insert(id.clone());
        if c.mark_parent(new_node) {
            c.added.remove(id);
        }
    }

    // Nodes referencing a changed or removed node (usually a config node)
    let mut referencing: HashSet<NodeId> = HashSet::new();
    loop {
        let mut grew = false;
        for (id, node) in new.all_nodes.iter() {
            if c.changed.contains(id) || c.added.contains(id) || referencing.contains(id) {
                continue;
            }
            let references_change = node.properties().any(|(key, value)| {
                if matches!(key.as_str(), "z" | "id" | "wires") {
                    return false;
                }
                value
                    .as_str()
                    .map_or(false, |v| c.changed.contains(v) || c.removed.contains(v))
            });
            if references_change {
                referencing.insert(id.clone());
                c.changed.insert(id.clone());
                if c.mark_parent(node) {
                    c.changed.remove(id);
                }
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }

    // Template members are represented by their template
    c.changed.retain(|id| {
        !new
            .all_nodes
            .get(id)
            .and_then(NodeConfig::z)
            .map_or(false, |z| new.is_subflow(z))
    });

    let mut stack = c.changed_subflows.clone();
    let mut cascaded: HashSet<NodeId> = HashSet::new();
    while let Some(template_id) = stack.pop() {
        if !cascaded.insert(template_id.clone()) {
            continue;
        }
        let instance_type = format!("{}{}", SUBFLOW_INSTANCE_PREFIX, template_id);
        for (id, node) in new.all_nodes.iter() {
            if node.node_type() != instance_type || c.changed.contains(id) {
                continue;
            }
            c.changed.insert(id.clone());
            let Some(z) = node.z() else {
                continue;
            };
            if !new.all_nodes.contains_key(z) {
                continue;
            }
            if c.is_template(z) {
                // Instance inside another template: cascade to that template
                c.changed.insert(z.to_string());
                c.changed.remove(id);
                stack.push(z.to_string());
            } else {
                c.changed.insert(z.to_string());
            }
        }
    }

    let Classifier {
        added,
        changed,
        removed,
        mut rewired,
        ..
    } = c;
    rewired.retain(|id| !changed.contains(id));

    let mut linked = BTreeSet::new();
    let mut queue: Vec<NodeId> = added
        .iter()
        .chain(&changed)
        .chain(&removed)
        .chain(&rewired)
        .cloned()
        .collect();
    let mut visited: HashSet<NodeId> = HashSet::new();
    while let Some(id) = queue.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(neighbours) = link_map.get(&id) else {
            continue;
        };
        if !added.contains(&id)
            && !changed.contains(&id)
            && !removed.contains(&id)
            && !rewired.contains(&id)
        {
            linked.insert(id.clone());
        }
        queue.extend(neighbours.iter().cloned());
    }

    DiffResult {
        added,
        changed,
        removed,
        rewired,
        linked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::registry::NodeTypeRegistry;
    use serde_json::{json, Value};

    fn parse(value: Value) -> ParsedFlowGraph {
        let config = NodeConfig::list_from_value(value).unwrap();
        parse_config(&config, &NodeTypeRegistry::new())
    }

    fn ids(list: &[&str]) -> BTreeSet<NodeId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn chain() -> Value {
        json!([
            {"id": "t1", "type": "tab"},
            {"id": "a", "type": "inject", "z": "t1", "x": 1, "y": 1, "wires": [["b"]]},
            {"id": "b", "type": "change", "z": "t1", "x": 2, "y": 1, "rule": "x", "wires": [["c"]]},
            {"id": "c", "type": "debug", "z": "t1", "x": 3, "y": 1, "wires": []}
        ])
    }

    #[test]
    fn test_identical_graphs_have_empty_diff() {
        let graph = parse(chain());
        let diff = diff_configs(&graph, &graph.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn test_moving_a_node_is_not_a_change() {
        let old = parse(chain());
        let mut moved = chain();
        moved[2]["x"] = json!(200);
        let diff = diff_configs(&old, &parse(moved));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_added_unparented_node() {
        let old = parse(json!([
            {"id": "y", "type": "debug", "x": 1, "y": 1, "wires": []}
        ]));
        let new = parse(json!([
            {"id": "y", "type": "debug", "x": 1, "y": 1, "wires": []},
            {"id": "x", "type": "inject", "x": 1, "y": 1, "wires": [["y"]]}
        ]));
        let diff = diff_configs(&old, &new);
        assert_eq!(diff.added, ids(&["x"]));
        assert!(diff.linked.contains("y"));
        assert!(diff.changed.is_empty());
        assert!(diff.removed.is_empty());
        assert!(diff.rewired.is_empty());
    }

    #[test]
    fn test_removed_node_marks_tab_changed() {
        let old = parse(chain());
        let mut new = chain();
        new.as_array_mut().unwrap().remove(3);
        new[2]["wires"] = json!([[]]);
        let diff = diff_configs(&old, &parse(new));

        assert_eq!(diff.removed, ids(&["c"]));
        assert_eq!(diff.changed, ids(&["t1"]));
        assert_eq!(diff.rewired, ids(&["b"]));
        assert_eq!(diff.linked, ids(&["a"]));
    }

    #[test]
    fn test_rewire_only() {
        let old = parse(json!([
            {"id": "a", "type": "inject", "x": 1, "y": 1, "wires": [["b"]]},
            {"id": "b", "type": "debug", "x": 1, "y": 1, "wires": []},
            {"id": "c", "type": "debug", "x": 1, "y": 1, "wires": []}
        ]));
        let new = parse(json!([
            {"id": "a", "type": "inject", "x": 1, "y": 1, "wires": [["c"]]},
            {"id": "b", "type": "debug", "x": 1, "y": 1, "wires": []},
            {"id": "c", "type": "debug", "x": 1, "y": 1, "wires": []}
        ]));
        let diff = diff_configs(&old, &new);
        assert_eq!(diff.rewired, ids(&["a"]));
        assert!(diff.changed.is_empty());
        assert_eq!(diff.linked, ids(&["b", "c"]));
    }

    #[test]
    fn test_changed_and_rewired_is_only_changed() {
        let old = parse(chain());
        let mut new = chain();
        new[2]["rule"] = json!("y");
        new[2]["wires"] = json!([[]]);
        let diff = diff_configs(&old, &parse(new));
        assert!(diff.changed.contains("b"));
        assert!(!diff.rewired.contains("b"));
    }

    #[test]
    fn test_config_node_cascade() {
        let old = parse(json!([
            {"id": "t1", "type": "tab"},
            {"id": "g1", "type": "broker", "host": "a"},
            {"id": "u1", "type": "mqtt out", "z": "t1", "x": 1, "y": 1, "broker": "g1", "wires": [["n3"]]},
            {"id": "n3", "type": "debug", "z": "t1", "x": 1, "y": 1, "wires": []},
            {"id": "n4", "type": "debug", "z": "t1", "x": 1, "y": 1, "wires": []}
        ]));
        let mut changed = old.clone();
        let mut broker = changed.all_nodes.get("g1").unwrap().clone();
        broker.set("host", "b");
        changed.all_nodes.insert("g1".to_string(), broker);

        let diff = diff_configs(&old, &changed);
        assert_eq!(diff.changed, ids(&["g1", "t1", "u1"]));
        assert_eq!(diff.linked, ids(&["n3"]));
    }

    #[test]
    fn test_config_reference_chain_reaches_fixed_point() {
        let old = parse(json!([
            {"id": "c1", "type": "tls", "cert": "x"},
            {"id": "c2", "type": "broker", "tls": "c1"},
            {"id": "n1", "type": "mqtt in", "x": 1, "y": 1, "broker": "c2", "wires": []}
        ]));
        let new = parse(json!([
            {"id": "c1", "type": "tls", "cert": "y"},
            {"id": "c2", "type": "broker", "tls": "c1"},
            {"id": "n1", "type": "mqtt in", "x": 1, "y": 1, "broker": "c2", "wires": []}
        ]));
        let diff = diff_configs(&old, &new);
        assert_eq!(diff.changed, ids(&["c1", "c2", "n1"]));
    }

    #[test]
    fn test_credentials_force_change() {
        let old = parse(chain());
        let mut new = chain();
        new[3]["credentials"] = json!({"token": "abc"});
        let diff = diff_configs(&old, &parse(new));
        assert!(diff.changed.contains("c"));
    }

    fn subflow_config(rule: &str) -> Value {
        json!([
            {"id": "t1", "type": "tab"},
            {"id": "sf1", "type": "subflow",
             "in": [{"wires": [{"id": "s1"}]}],
             "out": [{"wires": [{"id": "s1", "port": 0}]}]},
            {"id": "s1", "type": "change", "z": "sf1", "x": 1, "y": 1, "rule": rule, "wires": [[]]},
            {"id": "i1", "type": "subflow:sf1", "z": "t1", "x": 1, "y": 1, "wires": [["d1"]]},
            {"id": "d1", "type": "debug", "z": "t1", "x": 1, "y": 1, "wires": []}
        ])
    }

    #[test]
    fn test_subflow_member_change_cascades_to_instances() {
        let old = parse(subflow_config("a"));
        let new = parse(subflow_config("b"));
        let diff = diff_configs(&old, &new);

        assert!(diff.changed.contains("sf1"));
        assert!(diff.changed.contains("i1"));
        assert!(diff.changed.contains("t1"));
        assert!(!diff.changed.contains("s1"));
        assert!(diff.linked.contains("d1"));
    }

    #[test]
    fn test_nested_subflow_cascade() {
        let build = |rule: &str| {
            json!([
                {"id": "t1", "type": "tab"},
                {"id": "inner", "type": "subflow", "in": [], "out": []},
                {"id": "s1", "type": "change", "z": "inner", "x": 1, "y": 1, "rule": rule, "wires": [[]]},
                {"id": "outer", "type": "subflow", "in": [], "out": []},
                {"id": "ni", "type": "subflow:inner", "z": "outer", "x": 1, "y": 1, "wires": []},
                {"id": "oi", "type": "subflow:outer", "z": "t1", "x": 1, "y": 1, "wires": []}
            ])
        };
        let diff = diff_configs(&parse(build("a")), &parse(build("b")));

        assert!(diff.changed.contains("inner"));
        assert!(diff.changed.contains("outer"));
        assert!(diff.changed.contains("oi"));
        assert!(!diff.changed.contains("ni"));
        assert!(!diff.changed.contains("s1"));
    }

    #[test]
    fn test_class_sets_are_disjoint() {
        let old = parse(chain());
        let mut new = chain();
        new[1]["wires"] = json!([["c"]]);
        new[2]["rule"] = json!("z");
        new.as_array_mut()
            .unwrap()
            .push(json!({"id": "e", "type": "debug", "z": "t1", "x": 1, "y": 1, "b": "b"}));
        let diff = diff_configs(&old, &parse(new));

        let sets = [&diff.added, &diff.changed, &diff.removed, &diff.rewired, &diff.linked];
        for (i, a) in sets.iter().enumerate() {
            for b in sets.iter().skip(i + 1) {
                assert!(a.is_disjoint(b), "{:?} overlaps {:?}", a, b);
            }
        }
        assert!(diff.added.contains("e"));
    }

    #[test]
    fn test_stop_lists() {
        let diff = DiffResult {
            changed: ids(&["b"]),
            removed: ids(&["c"]),
            linked: ids(&["a"]),
            ..Default::default()
        };
        assert_eq!(diff.stop_list(DeployType::Nodes), Some(vec!["b".into(), "c".into()]));
        assert_eq!(
            diff.stop_list(DeployType::Flows),
            Some(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(diff.stop_list(DeployType::Full), None);
    }
}
