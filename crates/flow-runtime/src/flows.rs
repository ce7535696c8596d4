//! Flow registry
//!
//! [`FlowRegistry`] owns every running [`Flow`], persists the deployed
//! configuration and applies redeploys. Full deploys restart everything;
//! `nodes` and `flows` deploys diff the new configuration against the
//! running one and only restart what changed.
//!
//! The registry is also the [`NodeRouter`] every node sends through, so it
//! resolves nodes across flows and hands errors and status updates to the
//! flow that owns the reporting node.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{diff_configs, parse_config, DiffResult, ParsedFlowGraph};
use crate::context::{ContextStore, MemoryContextStore};
use crate::credentials::{CredentialStore, StorageCredentials};
use crate::error::{FlowError, Result};
use crate::events::{EventSink, NullEventSink, RuntimeEvent, NODES_STARTED, NODES_STOPPED, RUNTIME_STATE};
use crate::flow::Flow;
use crate::message::Message;
use crate::node::{Node, NodeEnv, NodeRouter};
use crate::registry::NodeTypeRegistry;
use crate::settings::RuntimeSettings;
use crate::storage::{FileFlowStorage, FlowSet, FlowStorage};
use crate::types::{
    DeployType, IdMap, NodeConfig, NodeId, NodeRef, StatusPayload, GLOBAL_FLOW_ID, SUBFLOW_TYPE,
    TAB_TYPE,
};
use crate::util::generate_id;

// =============================================================================
// Services
// =============================================================================

/// Collaborators the registry runs against
#[derive(Clone)]
pub struct RuntimeServices {
    pub settings: RuntimeSettings,
    pub types: Arc<NodeTypeRegistry>,
    pub storage: Arc<dyn FlowStorage>,
    pub credentials: Arc<dyn CredentialStore>,
    pub context: Arc<dyn ContextStore>,
    pub events: Arc<dyn EventSink>,
}

impl RuntimeServices {
    /// Services over `storage`, with credentials kept in the same storage,
    /// in-memory context and no event listener
    pub fn new(types: Arc<NodeTypeRegistry>, storage: Arc<dyn FlowStorage>) -> Self {
        Self {
            settings: RuntimeSettings::default(),
            credentials: Arc::new(StorageCredentials::new(Arc::clone(&storage))),
            types,
            storage,
            context: Arc::new(MemoryContextStore::new()),
            events: Arc::new(NullEventSink),
        }
    }

    /// File-backed services laid out by `settings`
    pub fn from_settings(types: Arc<NodeTypeRegistry>, settings: RuntimeSettings) -> Self {
        let storage: Arc<dyn FlowStorage> = Arc::new(FileFlowStorage::from_settings(&settings));
        Self {
            settings,
            ..Self::new(types, storage)
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextStore>) -> Self {
        self.context = context;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

// =============================================================================
// Flow definitions
// =============================================================================

/// One subflow template with its contents, as returned by `get_flow("global")`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubflowDefinition {
    #[serde(flatten)]
    pub config: NodeConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub configs: Vec<NodeConfig>,
}

/// A single flow and its contents
///
/// Used to read, add and replace one tab (or the global scope) without
/// deploying the whole configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<NodeConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subflows: Vec<SubflowDefinition>,
}

impl FlowDefinition {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.configs.push(config);
        self
    }

    fn tab_node(&self, id: &str) -> NodeConfig {
        let mut tab = NodeConfig::new(id, TAB_TYPE);
        if let Some(label) = &self.label {
            tab.set("label", label.as_str());
        }
        if let Some(info) = &self.info {
            tab.set("info", info.as_str());
        }
        tab
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryState {
    started: bool,
    /// Deployed configuration with credentials removed
    active_config: Vec<NodeConfig>,
    rev: Option<String>,
    graph: Arc<ParsedFlowGraph>,
    active_flows: IdMap<Arc<Flow>>,
    active_nodes_to_flow: HashMap<NodeId, NodeId>,
    /// Template node id -> ids of every running copy of it
    subflow_instance_nodes: HashMap<NodeId, Vec<NodeId>>,
}

struct RegistryInner {
    services: RuntimeServices,
    state: RwLock<RegistryState>,
    /// Held for the whole of every deploy
    deploy: tokio::sync::Mutex<()>,
}

/// Owner of all running flows
#[derive(Clone)]
pub struct FlowRegistry {
    inner: Arc<RegistryInner>,
}

impl FlowRegistry {
    pub fn new(services: RuntimeServices) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                services,
                state: RwLock::new(RegistryState::default()),
                deploy: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn services(&self) -> &RuntimeServices {
        &self.inner.services
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.read().started
    }

    /// Forget the deployed configuration
    ///
    /// Rejected while flows are running.
    pub fn init(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        if state.started {
            return Err(FlowError::AlreadyStarted);
        }
        *state = RegistryState::default();
        Ok(())
    }

    /// Load the stored configuration and credentials and make them active
    pub async fn load(&self) -> Result<String> {
        let _deploy = self.inner.deploy.lock().await;
        let FlowSet { flows, rev } = self.inner.services.storage.get_flows().await?;
        self.inner.services.credentials.load().await?;
        log::debug!("Loaded {} flow configuration entries (rev {})", flows.len(), rev);
        self.inner
            .apply_config(flows, DeployType::Load, false, Some(rev))
            .await
    }

    /// Deploy a new configuration, returning its revision
    pub async fn set_flows(
        &self,
        config: Vec<NodeConfig>,
        deploy_type: DeployType,
        mute_log: bool,
    ) -> Result<String> {
        let _deploy = self.inner.deploy.lock().await;
        self.inner
            .apply_config(config, deploy_type, mute_log, None)
            .await
    }

    /// Start every flow of the active configuration
    pub async fn start_flows(&self) {
        let _deploy = self.inner.deploy.lock().await;
        self.inner.start(DeployType::Full, None, false);
    }

    /// Stop every running flow
    pub async fn stop_flows(&self) {
        let _deploy = self.inner.deploy.lock().await;
        self.inner.stop(DeployType::Full, None, false).await;
    }

    /// Note that a node type became available
    ///
    /// Once the last missing type of a started configuration is
    /// registered, the flows are started.
    pub async fn type_registered(&self, node_type: &str) {
        let _deploy = self.inner.deploy.lock().await;
        let ready = {
            let mut state = self.inner.state.write();
            if !state.graph.missing_types.iter().any(|t| t == node_type) {
                return;
            }
            let mut graph = (*state.graph).clone();
            graph.resolve_missing_type(node_type);
            let ready = graph.missing_types.is_empty() && state.started;
            state.graph = Arc::new(graph);
            ready
        };
        if ready {
            log::info!("Missing node types now available, starting flows");
            self.inner.start(DeployType::Full, None, false);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The deployed configuration and its revision
    pub fn get_flows(&self) -> FlowSet {
        let state = self.inner.state.read();
        FlowSet {
            flows: state.active_config.clone(),
            rev: state.rev.clone().unwrap_or_default(),
        }
    }

    /// One tab, or the global scope, with its nodes
    pub fn get_flow(&self, id: &str) -> Option<FlowDefinition> {
        let graph = self.inner.state.read().graph.clone();
        let raw = |ids: Vec<&NodeId>| raw_configs(&graph, ids);

        if id == GLOBAL_FLOW_ID {
            let subflows = graph
                .subflows
                .values()
                .map(|template| SubflowDefinition {
                    config: graph
                        .all_nodes
                        .get(template.id())
                        .cloned()
                        .unwrap_or_else(|| template.config.clone()),
                    nodes: raw(template.nodes.keys().collect()),
                    configs: raw(template.configs.keys().collect()),
                })
                .collect();
            return Some(FlowDefinition {
                id: Some(GLOBAL_FLOW_ID.to_string()),
                configs: raw(graph.configs.keys().collect()),
                subflows,
                ..FlowDefinition::default()
            });
        }

        let flow = graph.flows.get(id)?;
        Some(FlowDefinition {
            id: Some(id.to_string()),
            label: flow.label().map(str::to_string),
            info: flow.config.str_prop("info").map(str::to_string),
            nodes: raw(flow.nodes.keys().collect()),
            configs: raw(flow.configs.keys().collect()),
            subflows: Vec::new(),
        })
    }

    /// Add a new tab, returning its generated id
    pub async fn add_flow(&self, definition: FlowDefinition) -> Result<NodeId> {
        let _deploy = self.inner.deploy.lock().await;
        let id = generate_id();
        let (mut config, graph) = {
            let state = self.inner.state.read();
            (state.active_config.clone(), state.graph.clone())
        };

        config.push(definition.tab_node(&id));
        for node in definition.nodes.iter().chain(definition.configs.iter()) {
            if graph.all_nodes.contains_key(node.id()) {
                return Err(FlowError::DuplicateId(node.id().to_string()));
            }
            if matches!(node.node_type(), TAB_TYPE | SUBFLOW_TYPE) {
                return Err(FlowError::InvalidNodeType(node.node_type().to_string()));
            }
            let mut node = node.clone();
            node.set("z", id.as_str());
            config.push(node);
        }

        self.inner
            .apply_config(config, DeployType::Flows, true, None)
            .await?;
        log::info!(
            "Added flow: {}",
            definition.label.as_deref().unwrap_or(&id)
        );
        Ok(id)
    }

    /// Replace the contents of a tab, or the global configs and subflows
    pub async fn update_flow(&self, id: &str, definition: FlowDefinition) -> Result<()> {
        let _deploy = self.inner.deploy.lock().await;
        let (config, graph) = {
            let state = self.inner.state.read();
            (state.active_config.clone(), state.graph.clone())
        };

        let mut updated: Vec<NodeConfig>;
        if id == GLOBAL_FLOW_ID {
            updated = config
                .into_iter()
                .filter(|node| {
                    node.node_type() == TAB_TYPE
                        || node.z().is_some_and(|z| graph.flows.contains_key(z))
                })
                .collect();
            updated.extend(definition.configs);
            for subflow in definition.subflows {
                updated.push(subflow.config);
                updated.extend(subflow.nodes);
                updated.extend(subflow.configs);
            }
        } else {
            if !graph.flows.contains_key(id) {
                return Err(FlowError::FlowNotFound(id.to_string()));
            }
            updated = config
                .into_iter()
                .filter(|node| node.id() != id && node.z() != Some(id))
                .collect();
            updated.push(definition.tab_node(id));
            for node in definition.nodes.into_iter().chain(definition.configs) {
                let mut node = node;
                node.set("z", id);
                updated.push(node);
            }
        }

        self.inner
            .apply_config(updated, DeployType::Flows, true, None)
            .await?;
        log::info!("Updated flow: {}", id);
        Ok(())
    }

    /// Remove a tab and every node on it
    pub async fn remove_flow(&self, id: &str) -> Result<()> {
        if id == GLOBAL_FLOW_ID {
            return Err(FlowError::RemoveGlobalFlow);
        }
        let _deploy = self.inner.deploy.lock().await;
        let (config, graph) = {
            let state = self.inner.state.read();
            (state.active_config.clone(), state.graph.clone())
        };
        if !graph.flows.contains_key(id) {
            return Err(FlowError::FlowNotFound(id.to_string()));
        }

        let remaining = config
            .into_iter()
            .filter(|node| node.id() != id && node.z() != Some(id))
            .collect();
        self.inner
            .apply_config(remaining, DeployType::Flows, true, None)
            .await?;
        log::info!("Removed flow: {}", id);
        Ok(())
    }

    /// Resolve a running node by id
    pub fn get_node(&self, id: &str) -> Option<Arc<Node>> {
        self.inner.get_node(id)
    }

    /// Visit every entry of the deployed configuration
    pub fn each_node<F>(&self, mut visit: F)
    where
        F: FnMut(&NodeConfig),
    {
        let graph = self.inner.state.read().graph.clone();
        for node in graph.all_nodes.values() {
            visit(node);
        }
    }

    /// Fail when any type of `module` is used by the deployed configuration
    pub fn check_type_in_use(&self, module: &str) -> Result<()> {
        let module_types = self.inner.services.types.get_module(module)?;
        let used: HashSet<String> = self
            .inner
            .state
            .read()
            .active_config
            .iter()
            .map(|node| node.node_type().to_string())
            .collect();
        let in_use: Vec<String> = module_types
            .into_iter()
            .filter(|t| used.contains(t))
            .collect();
        if in_use.is_empty() {
            Ok(())
        } else {
            Err(FlowError::TypeInUse(in_use.join(", ")))
        }
    }

    /// Ids of the running flows, global first when present
    pub fn active_flow_ids(&self) -> Vec<NodeId> {
        self.inner.state.read().active_flows.keys().cloned().collect()
    }
}

/// Deployed entries for `ids`, as they were configured
fn raw_configs(graph: &ParsedFlowGraph, ids: Vec<&NodeId>) -> Vec<NodeConfig> {
    ids.into_iter()
        .filter_map(|id| graph.all_nodes.get(id).cloned())
        .collect()
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("FlowRegistry")
            .field("started", &state.started)
            .field("rev", &state.rev)
            .field("active_flows", &state.active_flows.len())
            .finish()
    }
}

impl RegistryInner {
    fn env(self: &Arc<Self>) -> NodeEnv {
        let router: Weak<dyn NodeRouter> = Arc::downgrade(self) as Weak<dyn NodeRouter>;
        NodeEnv::new(router, Arc::clone(&self.services.context))
            .with_credentials(Arc::clone(&self.services.credentials))
            .with_env_substitution(self.services.settings.env_substitution)
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Err(e) = self.services.events.send(event) {
            log::debug!("Dropped runtime event: {}", e);
        }
    }

    /// Make `config` the active configuration and restart what it affects
    ///
    /// Caller holds the deploy lock.
    async fn apply_config(
        self: &Arc<Self>,
        mut config: Vec<NodeConfig>,
        deploy_type: DeployType,
        mute_log: bool,
        loaded_rev: Option<String>,
    ) -> Result<String> {
        let mut graph = parse_config(&config, &self.services.types);
        let diff = match deploy_type {
            DeployType::Full | DeployType::Load => None,
            DeployType::Nodes | DeployType::Flows => {
                let old = self.state.read().graph.clone();
                Some(diff_configs(&old, &graph))
            }
        };

        let mut credentials_changed = false;
        for node in config.iter_mut() {
            credentials_changed |= self.services.credentials.extract(node);
        }
        if credentials_changed {
            self.services.credentials.save().await?;
        }

        let (rev, deploy_type) = match (deploy_type, loaded_rev) {
            (DeployType::Load, Some(rev)) => (rev, DeployType::Full),
            (DeployType::Load, None) => (self.services.storage.save_flows(&config).await?, DeployType::Full),
            (other, _) => (self.services.storage.save_flows(&config).await?, other),
        };

        graph.strip_credentials();
        let started = {
            let mut state = self.state.write();
            state.active_config = config.clone();
            state.rev = Some(rev.clone());
            state.graph = Arc::new(graph);
            state.started
        };
        self.services.credentials.clean(&config).await?;

        if started {
            self.stop(deploy_type, diff.as_ref(), mute_log).await;
            let live = self.state.read().graph.live_ids();
            self.services.context.clean(&live);
            self.start(deploy_type, diff.as_ref(), mute_log);
        }
        Ok(rev)
    }

    fn start(self: &Arc<Self>, deploy_type: DeployType, diff: Option<&DiffResult>, mute_log: bool) {
        let graph = {
            let mut state = self.state.write();
            state.started = true;
            state.graph.clone()
        };

        if !graph.missing_types.is_empty() {
            log::info!("Waiting for missing types to be registered:");
            for missing in &graph.missing_types {
                log::info!(" - {}", missing);
            }
            self.emit(RuntimeEvent::runtime(
                RUNTIME_STATE,
                Some(json!({
                    "error": "missing-types",
                    "type": "warning",
                    "types": graph.missing_types,
                })),
                true,
            ));
            return;
        }

        if !mute_log {
            match diff {
                Some(_) => log::info!("Starting modified {}", deploy_type),
                None => log::info!("Starting flows"),
            }
        }

        let env = self.env();
        let flows: Vec<Arc<Flow>> = {
            let mut state = self.state.write();
            let global = state.active_flows.get(GLOBAL_FLOW_ID).cloned();
            match global {
                Some(flow) => flow.update(graph.clone()),
                None => {
                    let flow = Flow::global(graph.clone(), Arc::clone(&self.services.types), env.clone());
                    state.active_flows.insert(GLOBAL_FLOW_ID.to_string(), Arc::new(flow));
                }
            }
            for id in graph.flows.keys() {
                let existing = state.active_flows.get(id).cloned();
                match existing {
                    Some(flow) => flow.update(graph.clone()),
                    None => {
                        let flow = Flow::new(
                            id.as_str(),
                            graph.clone(),
                            Arc::clone(&self.services.types),
                            env.clone(),
                        );
                        state.active_flows.insert(id.clone(), Arc::new(flow));
                    }
                }
            }
            state.active_flows.values().cloned().collect()
        };

        for flow in &flows {
            flow.start(diff);
        }

        {
            let mut state = self.state.write();
            state.active_nodes_to_flow.clear();
            state.subflow_instance_nodes.clear();
            for flow in &flows {
                for node in flow.active_nodes() {
                    state
                        .active_nodes_to_flow
                        .insert(node.id().to_string(), flow.id().to_string());
                    if let Some(alias) = node.alias() {
                        state
                            .subflow_instance_nodes
                            .entry(alias.to_string())
                            .or_default()
                            .push(node.id().to_string());
                    }
                }
            }
        }

        self.emit(RuntimeEvent::runtime(RUNTIME_STATE, None, true));
        self.emit(RuntimeEvent::runtime(
            NODES_STARTED,
            Some(json!({ "deploy": deploy_type.to_string() })),
            false,
        ));
        if !mute_log {
            match diff {
                Some(_) => log::info!("Started modified {}", deploy_type),
                None => log::info!("Started flows"),
            }
        }
    }

    async fn stop(&self, deploy_type: DeployType, diff: Option<&DiffResult>, mute_log: bool) {
        let stop_list = diff.and_then(|d| d.stop_list(deploy_type));
        let flows: Vec<Arc<Flow>> = {
            let mut state = self.state.write();
            state.started = false;
            state.active_flows.values().cloned().collect()
        };
        if !mute_log {
            match stop_list {
                Some(_) => log::info!("Stopping modified {}", deploy_type),
                None => log::info!("Stopping flows"),
            }
        }

        join_all(flows.iter().map(|flow| flow.stop(stop_list.as_deref()))).await;

        {
            let mut state = self.state.write();
            let gone: Vec<NodeId> = state
                .active_flows
                .keys()
                .filter(|id| diff.map_or(true, |d| d.removed.contains(id.as_str())))
                .cloned()
                .collect();
            for id in &gone {
                state.active_flows.shift_remove(id);
            }
            let stopped: HashSet<&NodeId> = stop_list.iter().flatten().collect();
            let live_flows: HashSet<NodeId> = state.active_flows.keys().cloned().collect();
            state
                .active_nodes_to_flow
                .retain(|node, flow| live_flows.contains(flow) && !stopped.contains(node));
            state.subflow_instance_nodes.clear();
        }

        self.emit(RuntimeEvent::runtime(
            NODES_STOPPED,
            Some(json!({ "deploy": deploy_type.to_string() })),
            false,
        ));
        if !mute_log {
            match stop_list {
                Some(_) => log::info!("Stopped modified {}", deploy_type),
                None => log::info!("Stopped flows"),
            }
        }
    }

    fn flow_of(&self, id: &str) -> Option<Arc<Flow>> {
        let state = self.state.read();
        let flow_id = state.active_nodes_to_flow.get(id)?;
        state.active_flows.get(flow_id).cloned()
    }

    /// Hand an error to the flow owning `node`
    fn delegate_error(&self, node: &NodeRef, message: &str, msg: Option<&Message>) {
        let Some(z) = node.z.as_deref() else {
            return;
        };
        enum Target {
            Flow(Arc<Flow>),
            Copies(Vec<NodeId>),
            Nothing,
        }
        let target = {
            let state = self.state.read();
            if let Some(flow) = state.active_flows.get(z) {
                Target::Flow(flow.clone())
            } else if let Some(flow) = state
                .active_nodes_to_flow
                .get(z)
                .and_then(|flow_id| state.active_flows.get(flow_id))
            {
                Target::Flow(flow.clone())
            } else if state.graph.is_subflow(z) {
                Target::Copies(
                    state
                        .subflow_instance_nodes
                        .get(&node.id)
                        .cloned()
                        .unwrap_or_default(),
                )
            } else {
                Target::Nothing
            }
        };
        match target {
            Target::Flow(flow) => {
                flow.handle_error(node, message, msg);
            }
            Target::Copies(ids) => {
                for id in ids {
                    if let Some(copy) = self.get_node(&id) {
                        self.delegate_error(&copy.node_ref(), message, msg);
                    }
                }
            }
            Target::Nothing => {}
        }
    }

    /// Hand a status update to the flow owning `node`
    fn delegate_status(&self, node: &NodeRef, status: &StatusPayload) {
        let Some(z) = node.z.as_deref() else {
            return;
        };
        let (flow, copies) = {
            let state = self.state.read();
            let flow = state.active_flows.get(z).cloned().or_else(|| {
                state
                    .active_nodes_to_flow
                    .get(z)
                    .and_then(|flow_id| state.active_flows.get(flow_id))
                    .cloned()
            });
            let copies = if flow.is_none() && state.graph.is_subflow(z) {
                state
                    .subflow_instance_nodes
                    .get(&node.id)
                    .cloned()
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            (flow, copies)
        };
        if let Some(flow) = flow {
            flow.handle_status(node, status);
            return;
        }
        for id in copies {
            if let Some(copy) = self.get_node(&id) {
                self.delegate_status(&copy.node_ref(), status);
            }
        }
    }

    /// Users of a top-level config node, as node references
    fn config_users(&self, id: &str) -> Option<Vec<NodeRef>> {
        let state = self.state.read();
        if !state.graph.configs.contains_key(id) {
            return None;
        }
        Some(
            state
                .graph
                .users_of(id)
                .iter()
                .filter_map(|user| state.graph.all_nodes.get(user))
                .map(NodeRef::from)
                .collect(),
        )
    }
}

impl NodeRouter for RegistryInner {
    fn get_node(&self, id: &str) -> Option<Arc<Node>> {
        if let Some(node) = self.flow_of(id).and_then(|flow| flow.get_node(id)) {
            return Some(node);
        }
        let flows: Vec<Arc<Flow>> = self.state.read().active_flows.values().cloned().collect();
        flows.iter().find_map(|flow| flow.get_node(id))
    }

    fn handle_error(&self, source: &NodeRef, message: &str, msg: Option<&Message>) {
        if source.z.is_some() {
            self.delegate_error(source, message, msg);
        } else if let Some(users) = self.config_users(&source.id) {
            for user in users {
                self.delegate_error(&user, message, msg);
            }
        }
    }

    fn handle_status(&self, source: &NodeRef, status: &StatusPayload) {
        self.emit(RuntimeEvent::node_status(&source.id, status.clone()));
        if source.z.is_some() {
            self.delegate_status(source, status);
        } else if let Some(users) = self.config_users(&source.id) {
            for user in users {
                self.delegate_status(&user, status);
            }
        }
    }
}
