//! Flow containers
//!
//! A [`Flow`] owns the live nodes of one tab, or of the global scope for
//! top-level config nodes. It instantiates them on `start`, closes them on
//! `stop` and walks its scopes to find the catch and status handlers that
//! should see a node's errors and status updates.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use crate::config::{DiffResult, ParsedFlowGraph};
use crate::message::Message;
use crate::node::{Node, NodeEnv};
use crate::registry::NodeTypeRegistry;
use crate::subflow::instantiate_subflow;
use crate::types::{
    IdMap, NodeConfig, NodeId, NodeRef, StatusPayload, CATCH_TYPE, GLOBAL_FLOW_ID, STATUS_TYPE,
};

/// Number of times one error may re-enter the catch walk from the same node
pub const MAX_CATCH_COUNT: u64 = 10;

/// Build a live node from its configuration
///
/// Unknown types and failing constructors are logged and yield `None`.
pub(crate) fn create_node(
    config: &NodeConfig,
    types: &NodeTypeRegistry,
    env: &NodeEnv,
) -> Option<Arc<Node>> {
    let node_type = config.node_type();
    let Some(factory) = types.get(node_type) else {
        log::error!("Unknown type: {} (node {})", node_type, config.id());
        return None;
    };
    let node = Node::new(config.clone(), env.clone());
    match factory.create(&node) {
        Ok(()) => Some(node),
        Err(e) => {
            log::error!("[{}:{}] {}", node_type, config.id(), e);
            None
        }
    }
}

#[derive(Default)]
struct FlowState {
    active_nodes: IdMap<Arc<Node>>,
    /// Subflow reference id -> ids of its instance, boundary first
    subflow_instance_nodes: HashMap<NodeId, Vec<NodeId>>,
    /// Handler `z` -> catch handlers in activation order
    catch_nodes: HashMap<NodeId, Vec<Arc<Node>>>,
    status_nodes: HashMap<NodeId, Vec<Arc<Node>>>,
}

/// Live node container for one tab or the global scope
pub struct Flow {
    id: NodeId,
    global: bool,
    types: Arc<NodeTypeRegistry>,
    env: NodeEnv,
    graph: RwLock<Arc<ParsedFlowGraph>>,
    state: RwLock<FlowState>,
}

impl Flow {
    /// Container for the tab `id`
    pub fn new(
        id: impl Into<NodeId>,
        graph: Arc<ParsedFlowGraph>,
        types: Arc<NodeTypeRegistry>,
        env: NodeEnv,
    ) -> Self {
        Self {
            id: id.into(),
            global: false,
            types,
            env,
            graph: RwLock::new(graph),
            state: RwLock::new(FlowState::default()),
        }
    }

    /// Container for the top-level config nodes
    pub fn global(graph: Arc<ParsedFlowGraph>, types: Arc<NodeTypeRegistry>, env: NodeEnv) -> Self {
        Self {
            global: true,
            ..Self::new(GLOBAL_FLOW_ID, graph, types, env)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Swap in a new graph; running nodes are untouched until the next start
    pub fn update(&self, graph: Arc<ParsedFlowGraph>) {
        *self.graph.write() = graph;
    }

    /// Config and positioned node definitions of this container
    fn definitions(&self, graph: &ParsedFlowGraph) -> (Vec<NodeConfig>, Vec<NodeConfig>) {
        if self.global {
            return (graph.configs.values().cloned().collect(), Vec::new());
        }
        match graph.flows.get(&self.id) {
            Some(flow) => (
                flow.configs.values().cloned().collect(),
                flow.nodes.values().cloned().collect(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }

    fn is_active(&self, id: &str) -> bool {
        let state = self.state.read();
        state.active_nodes.contains_key(id) || state.subflow_instance_nodes.contains_key(id)
    }

    fn activate(&self, node: Arc<Node>) {
        self.state.write().active_nodes.insert(node.id().to_string(), node);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Instantiate every configured node that is not already running
    ///
    /// With a diff, the `rewired` nodes that kept running get their new
    /// wiring. Catch and status handler maps are rebuilt afterwards.
    pub fn start(&self, diff: Option<&DiffResult>) {
        let graph = self.graph.read().clone();
        let (configs, nodes) = self.definitions(&graph);
        log::debug!(
            "Starting flow {} ({} configs, {} nodes)",
            self.id,
            configs.len(),
            nodes.len()
        );

        {
            let mut state = self.state.write();
            state.catch_nodes.clear();
            state.status_nodes.clear();
        }

        for config in &configs {
            if self.is_active(config.id()) {
                continue;
            }
            if let Some(node) = create_node(config, &self.types, &self.env) {
                self.activate(node);
            }
        }

        for config in nodes.iter().filter(|n| n.subflow_template_id().is_none()) {
            if self.is_active(config.id()) {
                continue;
            }
            if let Some(node) = create_node(config, &self.types, &self.env) {
                self.activate(node);
            }
        }

        for config in &nodes {
            let Some(template_id) = config.subflow_template_id() else {
                continue;
            };
            if self.state.read().subflow_instance_nodes.contains_key(config.id()) {
                continue;
            }
            let Some(template) = graph.subflows.get(template_id) else {
                log::error!("Unknown subflow {} (node {})", template_id, config.id());
                continue;
            };
            match instantiate_subflow(template, config, &graph, &self.types, &self.env) {
                Ok(instance) => {
                    let ids: Vec<NodeId> = instance.iter().map(|n| n.id().to_string()).collect();
                    let mut state = self.state.write();
                    for node in instance {
                        state.active_nodes.insert(node.id().to_string(), node);
                    }
                    state
                        .subflow_instance_nodes
                        .insert(config.id().to_string(), ids);
                }
                Err(e) => log::error!("[{}:{}] {}", config.node_type(), config.id(), e),
            }
        }

        if let Some(diff) = diff {
            for id in &diff.rewired {
                let Some(config) = nodes.iter().find(|n| n.id() == id) else {
                    continue;
                };
                if let Some(node) = self.get_node(id) {
                    log::debug!("Rewiring node {}", id);
                    node.update_wires(config.wires());
                }
            }
        }

        let mut state = self.state.write();
        let handlers: Vec<Arc<Node>> = state
            .active_nodes
            .values()
            .filter(|n| matches!(n.node_type(), CATCH_TYPE | STATUS_TYPE))
            .cloned()
            .collect();
        for handler in handlers {
            let Some(z) = handler.z().map(str::to_string) else {
                continue;
            };
            let map = if handler.node_type() == CATCH_TYPE {
                &mut state.catch_nodes
            } else {
                &mut state.status_nodes
            };
            map.entry(z).or_default().push(handler);
        }
    }

    /// Close running nodes
    ///
    /// `None` stops everything. A listed subflow reference also stops every
    /// node of its instance. Completes once all asynchronous close hooks
    /// have finished.
    pub async fn stop(&self, stop_list: Option<&[NodeId]>) {
        let closing: Vec<Arc<Node>> = {
            let mut state = self.state.write();
            let ids: Vec<NodeId> = match stop_list {
                None => state.active_nodes.keys().cloned().collect(),
                Some(list) => {
                    let mut ids = list.to_vec();
                    for id in list {
                        if let Some(instance) = state.subflow_instance_nodes.get(id) {
                            ids.extend(instance.iter().skip(1).cloned());
                        }
                    }
                    ids
                }
            };
            ids.iter()
                .filter_map(|id| {
                    state.subflow_instance_nodes.remove(id);
                    state.active_nodes.shift_remove(id)
                })
                .collect()
        };
        if closing.is_empty() {
            return;
        }
        log::debug!("Stopping {} node(s) in flow {}", closing.len(), self.id);
        let pending: Vec<_> = closing.iter().map(|node| node.close()).collect();
        join_all(pending).await;
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get_node(&self, id: &str) -> Option<Arc<Node>> {
        self.state.read().active_nodes.get(id).cloned()
    }

    /// Running nodes in activation order
    pub fn active_nodes(&self) -> Vec<Arc<Node>> {
        self.state.read().active_nodes.values().cloned().collect()
    }

    /// Ids of the nodes instantiated for a subflow reference, boundary first
    pub fn subflow_instance(&self, id: &str) -> Option<Vec<NodeId>> {
        self.state.read().subflow_instance_nodes.get(id).cloned()
    }

    // =========================================================================
    // Supervision
    // =========================================================================

    /// Handlers registered for `scope` that accept events from `source_id`,
    /// plus the enclosing scope to try next
    fn handlers_at(
        &self,
        catch: bool,
        scope: &str,
        source_id: &str,
    ) -> (Vec<Arc<Node>>, Option<(NodeId, Option<NodeId>)>) {
        let state = self.state.read();
        let map = if catch {
            &state.catch_nodes
        } else {
            &state.status_nodes
        };
        let handlers = map
            .get(scope)
            .map(|handlers| {
                handlers
                    .iter()
                    .filter(|h| accepts(h, source_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let parent = state
            .active_nodes
            .get(scope)
            .map(|n| (n.id().to_string(), n.z().map(str::to_string)));
        (handlers, parent)
    }

    /// Deliver a status update to the nearest status handlers
    ///
    /// Returns whether any handler received it.
    pub fn handle_status(&self, source: &NodeRef, status: &StatusPayload) -> bool {
        let mut status_body = Map::new();
        if let Some(fill) = &status.fill {
            status_body.insert("fill".to_string(), json!(fill));
        }
        if let Some(shape) = &status.shape {
            status_body.insert("shape".to_string(), json!(shape));
        }
        status_body.insert(
            "text".to_string(),
            json!(status.text.clone().unwrap_or_default()),
        );
        status_body.insert("source".to_string(), source_value(source, None));

        let mut scope = source.z.clone();
        while let Some(current) = scope {
            let (handlers, parent) = self.handlers_at(false, &current, &source.id);
            if !handlers.is_empty() {
                for handler in handlers {
                    let mut msg = Message::new();
                    msg.set("status", Value::Object(status_body.clone()));
                    handler.receive(msg);
                }
                return true;
            }
            scope = parent.and_then(|(_, z)| z);
        }
        false
    }

    /// Deliver an error to the nearest catch handlers
    ///
    /// An error bouncing off the same node `MAX_CATCH_COUNT` times is
    /// dropped with a warning. Returns whether any handler received it.
    pub fn handle_error(&self, source: &NodeRef, message: &str, msg: Option<&Message>) -> bool {
        let mut count = 1;
        if let Some(previous) = msg.and_then(|m| m.get("error")).and_then(|e| e.get("source")) {
            if previous.get("id").and_then(Value::as_str) == Some(source.id.as_str()) {
                count = previous.get("count").and_then(Value::as_u64).unwrap_or(0) + 1;
                if count >= MAX_CATCH_COUNT {
                    match self.get_node(&source.id) {
                        Some(node) => node.warn("Message exceeded maximum number of catches"),
                        None => log::warn!(
                            "[{}:{}] Message exceeded maximum number of catches",
                            source.node_type,
                            source.id
                        ),
                    }
                    return false;
                }
            }
        }

        let mut throwing_id = source.id.clone();
        let mut scope = source.z.clone();
        while let Some(current) = scope {
            let (handlers, parent) = self.handlers_at(true, &current, &throwing_id);
            if !handlers.is_empty() {
                let error = json!({
                    "message": message,
                    "source": source_value(source, Some(count)),
                });
                for handler in handlers {
                    let mut delivered = msg.cloned().unwrap_or_default();
                    if let Some(existing) = delivered.remove("error") {
                        delivered.set("_error", existing);
                    }
                    delivered.set("error", error.clone());
                    handler.receive(delivered);
                }
                return true;
            }
            match parent {
                Some((id, z)) => {
                    throwing_id = id;
                    scope = z;
                }
                None => scope = None,
            }
        }
        false
    }
}

/// Whether a handler's optional `scope` allow-list admits `source_id`
fn accepts(handler: &Node, source_id: &str) -> bool {
    match handler.config().str_list("scope") {
        Some(scope) if !scope.is_empty() => scope.iter().any(|id| id == source_id),
        _ => true,
    }
}

fn source_value(source: &NodeRef, count: Option<u64>) -> Value {
    let mut value = Map::new();
    value.insert("id".to_string(), json!(source.id));
    value.insert("type".to_string(), json!(source.node_type));
    if let Some(name) = &source.name {
        value.insert("name".to_string(), json!(name));
    }
    if let Some(count) = count {
        value.insert("count".to_string(), json!(count));
    }
    Value::Object(value)
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("global", &self.global)
            .field("active_nodes", &self.state.read().active_nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{diff_configs, parse_config};
    use crate::context::MemoryContextStore;
    use crate::error::FlowError;
    use crate::node::NodeRouter;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    /// Routes through a single flow, the way the registry does for one tab
    #[derive(Default)]
    struct FlowRouter {
        flow: RwLock<Option<Arc<Flow>>>,
    }

    impl FlowRouter {
        fn flow(&self) -> Option<Arc<Flow>> {
            self.flow.read().clone()
        }
    }

    impl NodeRouter for FlowRouter {
        fn get_node(&self, id: &str) -> Option<Arc<Node>> {
            self.flow()?.get_node(id)
        }

        fn handle_error(&self, source: &NodeRef, message: &str, msg: Option<&Message>) {
            if let Some(flow) = self.flow() {
                flow.handle_error(source, message, msg);
            }
        }

        fn handle_status(&self, source: &NodeRef, status: &StatusPayload) {
            if let Some(flow) = self.flow() {
                flow.handle_status(source, status);
            }
        }
    }

    struct Fixture {
        router: Arc<FlowRouter>,
        types: Arc<NodeTypeRegistry>,
        received: Arc<Mutex<Vec<(String, Message)>>>,
        constructed: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let types = Arc::new(NodeTypeRegistry::new());
            let received = Arc::new(Mutex::new(Vec::new()));
            let constructed = Arc::new(AtomicUsize::new(0));
            let closed = Arc::new(AtomicUsize::new(0));

            let (r, c, k) = (received.clone(), constructed.clone(), closed.clone());
            let recorder = move |node: &Arc<Node>| -> crate::error::Result<()> {
                c.fetch_add(1, Ordering::SeqCst);
                let r = r.clone();
                node.on_input(move |node, msg| {
                    r.lock()
                        .push((node.alias().unwrap_or(node.id()).to_string(), msg.clone()));
                    if msg.get("fail").is_some() && node.node_type() == "test" {
                        return Err(FlowError::handler("boom", Some(msg)));
                    }
                    node.send(msg);
                    Ok(())
                });
                let k = k.clone();
                node.on_close(move |_| {
                    k.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok(())
            };
            let recorder = Arc::new(recorder);
            for node_type in ["test", CATCH_TYPE, STATUS_TYPE] {
                let recorder = recorder.clone();
                types.register_fn("test", node_type, move |node| recorder(node));
            }
            types.register_fn("test", "broken", |_| Err(FlowError::construction("refused")));

            Self {
                router: Arc::new(FlowRouter::default()),
                types,
                received,
                constructed,
                closed,
            }
        }

        fn env(&self) -> NodeEnv {
            let router: Weak<dyn NodeRouter> = Arc::downgrade(&self.router) as Weak<dyn NodeRouter>;
            NodeEnv::new(router, Arc::new(MemoryContextStore::new()))
        }

        fn graph(&self, value: Value) -> Arc<ParsedFlowGraph> {
            Arc::new(parse_config(
                &NodeConfig::list_from_value(value).unwrap(),
                &self.types,
            ))
        }

        fn flow(&self, id: &str, graph: Arc<ParsedFlowGraph>) -> Arc<Flow> {
            let flow = Arc::new(Flow::new(id, graph, self.types.clone(), self.env()));
            *self.router.flow.write() = Some(flow.clone());
            flow
        }

        fn received_by(&self, id: &str) -> Vec<Message> {
            self.received
                .lock()
                .iter()
                .filter(|(to, _)| to == id)
                .map(|(_, msg)| msg.clone())
                .collect()
        }
    }

    fn chain() -> Value {
        json!([
            {"id": "t1", "type": "tab"},
            {"id": "1", "type": "test", "z": "t1", "x": 1, "y": 1, "wires": [["2"]]},
            {"id": "2", "type": "test", "z": "t1", "x": 1, "y": 1, "wires": [["3"]]},
            {"id": "3", "type": "test", "z": "t1", "x": 1, "y": 1, "wires": []}
        ])
    }

    #[test]
    fn test_start_instantiates_and_routes() {
        let fx = Fixture::new();
        let flow = fx.flow("t1", fx.graph(chain()));
        flow.start(None);

        assert_eq!(flow.active_nodes().len(), 3);
        flow.get_node("1").unwrap().receive(Message::with_payload("x"));
        let at_three = fx.received_by("3");
        assert_eq!(at_three.len(), 1);
        assert_eq!(at_three[0].payload(), Some(&json!("x")));
    }

    #[test]
    fn test_start_is_idempotent_for_running_nodes() {
        let fx = Fixture::new();
        let flow = fx.flow("t1", fx.graph(chain()));
        flow.start(None);
        let first = flow.get_node("2").unwrap();
        flow.start(None);

        assert_eq!(fx.constructed.load(Ordering::SeqCst), 3);
        assert!(Arc::ptr_eq(&first, &flow.get_node("2").unwrap()));
    }

    #[test]
    fn test_failing_constructor_is_omitted() {
        let fx = Fixture::new();
        let flow = fx.flow(
            "t1",
            fx.graph(json!([
                {"id": "t1", "type": "tab"},
                {"id": "1", "type": "broken", "z": "t1", "x": 1, "y": 1, "wires": []},
                {"id": "2", "type": "test", "z": "t1", "x": 1, "y": 1, "wires": []}
            ])),
        );
        flow.start(None);

        assert!(flow.get_node("1").is_none());
        assert!(flow.get_node("2").is_some());
    }

    #[test]
    fn test_stop_list_restarts_only_listed_nodes() {
        let fx = Fixture::new();
        let flow = fx.flow("t1", fx.graph(chain()));
        flow.start(None);
        let one = flow.get_node("1").unwrap();

        tokio_test::block_on(flow.stop(Some(&["2".to_string()])));
        assert_eq!(fx.closed.load(Ordering::SeqCst), 1);
        assert!(flow.get_node("2").is_none());

        flow.start(None);
        assert_eq!(fx.constructed.load(Ordering::SeqCst), 4);
        assert!(Arc::ptr_eq(&one, &flow.get_node("1").unwrap()));
    }

    #[test]
    fn test_stop_all_closes_everything() {
        let fx = Fixture::new();
        let flow = fx.flow("t1", fx.graph(chain()));
        flow.start(None);
        tokio_test::block_on(flow.stop(None));

        assert_eq!(fx.closed.load(Ordering::SeqCst), 3);
        assert!(flow.active_nodes().is_empty());
    }

    #[test]
    fn test_rewired_nodes_keep_running() {
        let fx = Fixture::new();
        let old = fx.graph(chain());
        let new = fx.graph(json!([
            {"id": "t1", "type": "tab"},
            {"id": "1", "type": "test", "z": "t1", "x": 1, "y": 1, "wires": [["3"]]},
            {"id": "2", "type": "test", "z": "t1", "x": 1, "y": 1, "wires": [["3"]]},
            {"id": "3", "type": "test", "z": "t1", "x": 1, "y": 1, "wires": []}
        ]));
        let diff = diff_configs(&old, &new);
        assert!(diff.rewired.contains("1"));

        let flow = fx.flow("t1", old);
        flow.start(None);
        let one = flow.get_node("1").unwrap();
        flow.update(new);
        flow.start(Some(&diff));

        assert!(Arc::ptr_eq(&one, &flow.get_node("1").unwrap()));
        assert_eq!(one.wires(), vec![vec!["3".to_string()]]);
    }

    #[test]
    fn test_subflow_instance_stops_with_reference() {
        let fx = Fixture::new();
        let flow = fx.flow(
            "t1",
            fx.graph(json!([
                {"id": "t1", "type": "tab"},
                {"id": "sf", "type": "subflow",
                 "in": [{"wires": [{"id": "inner"}]}],
                 "out": [{"wires": [{"id": "inner", "port": 0}]}]},
                {"id": "inner", "type": "test", "z": "sf", "x": 1, "y": 1, "wires": [[]]},
                {"id": "ref", "type": "subflow:sf", "z": "t1", "x": 1, "y": 1, "wires": [["end"]]},
                {"id": "end", "type": "test", "z": "t1", "x": 1, "y": 1, "wires": []}
            ])),
        );
        flow.start(None);

        let instance = flow.subflow_instance("ref").unwrap();
        assert_eq!(instance.len(), 2);
        assert_eq!(instance[0], "ref");
        flow.get_node("ref").unwrap().receive(Message::with_payload(1));
        assert_eq!(fx.received_by("inner").len(), 1);
        assert_eq!(fx.received_by("end").len(), 1);

        tokio_test::block_on(flow.stop(Some(&["ref".to_string()])));
        assert!(flow.get_node(&instance[1]).is_none());
        assert!(flow.subflow_instance("ref").is_none());
        assert!(flow.get_node("end").is_some());
    }

    #[test]
    fn test_error_reaches_catch_in_scope() {
        let fx = Fixture::new();
        let flow = fx.flow(
            "t1",
            fx.graph(json!([
                {"id": "t1", "type": "tab"},
                {"id": "n1", "type": "test", "z": "t1", "name": "thrower", "x": 1, "y": 1, "wires": []},
                {"id": "c1", "type": "catch", "z": "t1", "x": 1, "y": 1, "wires": []},
                {"id": "c2", "type": "catch", "z": "t1", "scope": ["other"], "x": 1, "y": 1, "wires": []}
            ])),
        );
        flow.start(None);

        let mut msg = Message::with_payload("p");
        msg.set("fail", true);
        msg.set("error", "earlier");
        flow.get_node("n1").unwrap().receive(msg);

        let caught = fx.received_by("c1");
        assert_eq!(caught.len(), 1);
        let error = caught[0].get("error").unwrap();
        assert_eq!(error["message"], json!("boom"));
        assert_eq!(error["source"], json!({"id": "n1", "type": "test", "name": "thrower", "count": 1}));
        assert_eq!(caught[0].get("_error"), Some(&json!("earlier")));
        assert!(fx.received_by("c2").is_empty());
    }

    #[test]
    fn test_error_escapes_subflow_scope() {
        let fx = Fixture::new();
        let flow = fx.flow(
            "t1",
            fx.graph(json!([
                {"id": "t1", "type": "tab"},
                {"id": "sf", "type": "subflow", "in": [{"wires": [{"id": "inner"}]}], "out": []},
                {"id": "inner", "type": "test", "z": "sf", "x": 1, "y": 1, "wires": [[]]},
                {"id": "ref", "type": "subflow:sf", "z": "t1", "x": 1, "y": 1, "wires": []},
                {"id": "c1", "type": "catch", "z": "t1", "scope": ["ref"], "x": 1, "y": 1, "wires": []}
            ])),
        );
        flow.start(None);

        let mut msg = Message::new();
        msg.set("fail", true);
        flow.get_node("ref").unwrap().receive(msg);

        let caught = fx.received_by("c1");
        assert_eq!(caught.len(), 1);
        let inner_id = flow.subflow_instance("ref").unwrap()[1].clone();
        assert_eq!(caught[0].get("error").unwrap()["source"]["id"], json!(inner_id));
    }

    #[test]
    fn test_error_loop_is_capped() {
        let fx = Fixture::new();
        let flow = fx.flow("t1", fx.graph(json!([{"id": "t1", "type": "tab"}])));
        flow.start(None);
        let source = NodeRef {
            id: "n1".into(),
            node_type: "test".into(),
            z: Some("t1".into()),
            name: None,
        };
        let mut msg = Message::new();
        msg.set("error", json!({"source": {"id": "n1", "count": 9}}));

        assert!(!flow.handle_error(&source, "again", Some(&msg)));
    }

    #[test]
    fn test_status_delivered_at_nearest_scope_only() {
        let fx = Fixture::new();
        let flow = fx.flow(
            "t1",
            fx.graph(json!([
                {"id": "t1", "type": "tab"},
                {"id": "sf", "type": "subflow", "in": [], "out": []},
                {"id": "s_inner", "type": "status", "z": "sf", "x": 1, "y": 1, "wires": []},
                {"id": "w", "type": "test", "z": "sf", "x": 1, "y": 1, "wires": []},
                {"id": "ref", "type": "subflow:sf", "z": "t1", "x": 1, "y": 1, "wires": []},
                {"id": "s_outer", "type": "status", "z": "t1", "x": 1, "y": 1, "wires": []}
            ])),
        );
        flow.start(None);

        let worker = flow
            .active_nodes()
            .into_iter()
            .find(|n| n.alias() == Some("w"))
            .unwrap();
        worker.status(StatusPayload::text("busy").with_fill("red"));

        let inner = fx.received_by("s_inner");
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].get("status").unwrap()["text"], json!("busy"));
        assert_eq!(inner[0].get("status").unwrap()["fill"], json!("red"));
        assert!(fx.received_by("s_outer").is_empty());
    }
}
