//! Live node instances
//!
//! A [`Node`] is the runtime wrapper around one configured node. Node
//! behavior is attached by a [`NodeFactory`](crate::registry::NodeFactory)
//! through input handlers and close hooks; the wrapper itself owns the
//! wiring and implements message routing.
//!
//! # Routing
//!
//! `send` resolves every target through the [`NodeRouter`] before any
//! target's `receive` runs. Deliveries go output by output, then wire by
//! wire, then message by message. The first target of an output gets the
//! original messages and every later target gets deep clones. Messages
//! without a `_msgid` get the id of the first message of the send.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::future::{join_all, BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::context::{node_scope, ContextHandle, ContextStore, MemoryContextStore, GLOBAL_CONTEXT};
use crate::credentials::CredentialStore;
use crate::error::{FlowError, Result};
use crate::message::Message;
use crate::types::{NodeConfig, NodeId, NodeRef, StatusPayload, Wires};
use crate::util::substitute_env_vars;

/// Handler invoked for every message a node receives
pub type InputHandler = Box<dyn Fn(&Node, Message) -> Result<()> + Send + Sync>;

/// Work to run when a node is stopped
pub enum CloseHook {
    /// Runs to completion inside `close()`
    Immediate(Box<dyn FnOnce(&Node) -> Result<()> + Send>),
    /// Returns a future the owning flow awaits before the stop completes
    Deferred(Box<dyn FnOnce(&Node) -> BoxFuture<'static, ()> + Send>),
}

/// Lookup and supervision services a node needs from the runtime
pub trait NodeRouter: Send + Sync {
    /// Resolve a live node by id
    fn get_node(&self, id: &str) -> Option<Arc<Node>>;

    /// Route an error to the nearest catch handlers
    fn handle_error(&self, source: &NodeRef, message: &str, msg: Option<&Message>);

    /// Route a status update to the nearest status handlers
    fn handle_status(&self, source: &NodeRef, status: &StatusPayload);
}

/// Replaces the default `update_wires` behavior of a node
///
/// Subflow boundaries use this to push new outer wiring into the
/// interior nodes of their instance.
pub trait RewireHook: Send + Sync {
    fn update_wires(&self, node: &Node, wires: Wires);
}

struct NoRouter;

impl NodeRouter for NoRouter {
    fn get_node(&self, _id: &str) -> Option<Arc<Node>> {
        None
    }

    fn handle_error(&self, _source: &NodeRef, _message: &str, _msg: Option<&Message>) {}

    fn handle_status(&self, _source: &NodeRef, _status: &StatusPayload) {}
}

/// Shared services handed to every node at construction
#[derive(Clone)]
pub struct NodeEnv {
    pub router: Weak<dyn NodeRouter>,
    pub context: Arc<dyn ContextStore>,
    pub credentials: Option<Arc<dyn CredentialStore>>,
    /// Replace `$(NAME)` properties from the process environment
    pub env_substitution: bool,
}

impl NodeEnv {
    pub fn new(router: Weak<dyn NodeRouter>, context: Arc<dyn ContextStore>) -> Self {
        Self {
            router,
            context,
            credentials: None,
            env_substitution: true,
        }
    }

    /// An environment with no router and a private in-memory context
    ///
    /// Nodes built with it can receive messages but every send is dropped.
    pub fn detached() -> Self {
        let router: Weak<dyn NodeRouter> = Weak::<NoRouter>::new();
        Self::new(router, Arc::new(MemoryContextStore::new()))
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_env_substitution(mut self, enabled: bool) -> Self {
        self.env_substitution = enabled;
        self
    }
}

/// What a node hands to `send`
#[derive(Debug, Clone, Default)]
pub enum SendPayload {
    #[default]
    Nothing,
    /// One message for output 0
    Single(Message),
    /// Messages per output, in output order
    PerOutput(Vec<Vec<Message>>),
}

impl From<Message> for SendPayload {
    fn from(msg: Message) -> Self {
        Self::Single(msg)
    }
}

impl From<Option<Message>> for SendPayload {
    fn from(msg: Option<Message>) -> Self {
        msg.map_or(Self::Nothing, Self::Single)
    }
}

/// One optional message per output
impl From<Vec<Option<Message>>> for SendPayload {
    fn from(outputs: Vec<Option<Message>>) -> Self {
        Self::PerOutput(
            outputs
                .into_iter()
                .map(|msg| msg.into_iter().collect())
                .collect(),
        )
    }
}

impl From<Vec<Vec<Message>>> for SendPayload {
    fn from(outputs: Vec<Vec<Message>>) -> Self {
        Self::PerOutput(outputs)
    }
}

#[derive(Debug, Default)]
struct Wiring {
    wires: Wires,
    wire_count: usize,
    /// Target of a node with exactly one output wired to one node
    single_target: Option<NodeId>,
}

impl Wiring {
    fn new(wires: Wires) -> Self {
        let wire_count = wires.iter().map(Vec::len).sum();
        let single_target = match wires.as_slice() {
            [only] if only.len() == 1 => Some(only[0].clone()),
            _ => None,
        };
        Self {
            wires,
            wire_count,
            single_target,
        }
    }
}

/// A live node
pub struct Node {
    id: NodeId,
    node_type: String,
    z: Option<NodeId>,
    name: Option<String>,
    alias: Option<NodeId>,
    config: NodeConfig,
    wiring: RwLock<Wiring>,
    input_handlers: RwLock<Vec<Arc<InputHandler>>>,
    close_hooks: Mutex<Vec<CloseHook>>,
    rewire_hook: RwLock<Option<Arc<dyn RewireHook>>>,
    env: NodeEnv,
}

impl Node {
    /// Build a node from its configuration
    ///
    /// `credentials` is dropped from the stored config and `$(NAME)` values
    /// are substituted when the environment asks for it.
    pub fn new(config: NodeConfig, env: NodeEnv) -> Arc<Self> {
        let mut config = config;
        config.remove("credentials");
        if env.env_substitution {
            for (_, value) in config.properties_mut() {
                substitute_env_vars(value);
            }
        }
        let wiring = Wiring::new(config.wires());
        Arc::new(Self {
            id: config.id().to_string(),
            node_type: config.node_type().to_string(),
            z: config.z().map(str::to_string),
            name: config.name().map(str::to_string),
            alias: config.str_prop("_alias").map(str::to_string),
            config,
            wiring: RwLock::new(wiring),
            input_handlers: RwLock::new(Vec::new()),
            close_hooks: Mutex::new(Vec::new()),
            rewire_hook: RwLock::new(None),
            env,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Owning tab, or owning subflow instance for subflow interior nodes
    pub fn z(&self) -> Option<&str> {
        self.z.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Template node id for nodes created by a subflow instantiation
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// A configuration property
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn wires(&self) -> Wires {
        self.wiring.read().wires.clone()
    }

    pub fn wire_count(&self) -> usize {
        self.wiring.read().wire_count
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            id: self.id.clone(),
            node_type: self.node_type.clone(),
            z: self.z.clone(),
            name: self.name.clone(),
        }
    }

    // =========================================================================
    // Behavior registration
    // =========================================================================

    /// Register an input handler
    pub fn on_input<F>(&self, handler: F)
    where
        F: Fn(&Node, Message) -> Result<()> + Send + Sync + 'static,
    {
        let handler: InputHandler = Box::new(handler);
        self.input_handlers.write().push(Arc::new(handler));
    }

    /// Register a close hook that completes synchronously
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce(&Node) -> Result<()> + Send + 'static,
    {
        self.close_hooks
            .lock()
            .push(CloseHook::Immediate(Box::new(hook)));
    }

    /// Register a close hook that completes asynchronously
    pub fn on_close_async<F, Fut>(&self, hook: F)
    where
        F: FnOnce(&Node) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.close_hooks
            .lock()
            .push(CloseHook::Deferred(Box::new(move |node| hook(node).boxed())));
    }

    pub(crate) fn set_rewire_hook(&self, hook: Arc<dyn RewireHook>) {
        *self.rewire_hook.write() = Some(hook);
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    fn router(&self) -> Option<Arc<dyn NodeRouter>> {
        self.env.router.upgrade()
    }

    /// Send messages to the nodes wired to this node's outputs
    pub fn send(&self, payload: impl Into<SendPayload>) {
        let payload = payload.into();
        if matches!(payload, SendPayload::Nothing) {
            return;
        }
        let (wires, single_target) = {
            let wiring = self.wiring.read();
            if wiring.wire_count == 0 {
                return;
            }
            (wiring.wires.clone(), wiring.single_target.clone())
        };
        let Some(router) = self.router() else {
            log::debug!("{} send dropped, node is detached", self.log_prefix());
            return;
        };

        let outputs = match (payload, single_target) {
            (SendPayload::Single(mut msg), Some(target)) => {
                msg.ensure_msg_id();
                if let Some(node) = router.get_node(&target) {
                    node.receive(msg);
                }
                return;
            }
            (SendPayload::Single(msg), None) => vec![vec![msg]],
            (SendPayload::PerOutput(outputs), _) => outputs,
            (SendPayload::Nothing, _) => return,
        };

        let mut first_id: Option<String> = None;
        let mut deliveries: Vec<(Arc<Node>, Message)> = Vec::new();
        for (port, mut messages) in outputs.into_iter().enumerate() {
            let Some(targets) = wires.get(port) else {
                break;
            };
            for msg in messages.iter_mut() {
                match &first_id {
                    None => first_id = Some(msg.ensure_msg_id()),
                    Some(id) => {
                        if msg.msg_id().is_none() {
                            msg.set_msg_id(id.clone());
                        }
                    }
                }
            }

            let live: Vec<Arc<Node>> = targets.iter().filter_map(|t| router.get_node(t)).collect();
            let Some((first, rest)) = live.split_first() else {
                continue;
            };
            // Copies for later targets are taken before the first target
            // takes the originals.
            let copies: Vec<Vec<Message>> = rest.iter().map(|_| messages.clone()).collect();
            for msg in messages {
                deliveries.push((Arc::clone(first), msg));
            }
            for (target, copies) in rest.iter().zip(copies) {
                for msg in copies {
                    deliveries.push((Arc::clone(target), msg));
                }
            }
        }

        for (target, msg) in deliveries {
            target.receive(msg);
        }
    }

    /// Deliver a message to this node's input handlers
    pub fn receive(&self, mut msg: Message) {
        msg.ensure_msg_id();
        let handlers: Vec<Arc<InputHandler>> = self.input_handlers.read().clone();
        let Some((last, rest)) = handlers.split_last() else {
            return;
        };
        for handler in rest {
            self.run_handler(handler, msg.clone());
        }
        self.run_handler(last, msg);
    }

    fn run_handler(&self, handler: &InputHandler, msg: Message) {
        match handler(self, msg) {
            Ok(()) => {}
            Err(FlowError::Handler { reason, msg }) => self.error(&reason, msg.as_deref()),
            Err(other) => self.error(&other.to_string(), None),
        }
    }

    /// Replace this node's output wiring
    pub fn update_wires(&self, wires: Wires) {
        let hook = self.rewire_hook.read().clone();
        match hook {
            Some(hook) => hook.update_wires(self, wires),
            None => self.apply_wires(wires),
        }
    }

    /// Set the wiring directly, bypassing any rewire hook
    pub(crate) fn apply_wires(&self, wires: Wires) {
        *self.wiring.write() = Wiring::new(wires);
    }

    /// Run every close hook and release this node's context
    ///
    /// Immediate hooks run now; the returned future completes once every
    /// deferred hook has finished.
    pub fn close(&self) -> BoxFuture<'static, ()> {
        self.input_handlers.write().clear();
        let hooks = std::mem::take(&mut *self.close_hooks.lock());
        let mut pending = Vec::new();
        for hook in hooks {
            match hook {
                CloseHook::Immediate(hook) => {
                    if let Err(e) = hook(self) {
                        self.error(&e.to_string(), None);
                    }
                }
                CloseHook::Deferred(hook) => pending.push(hook(self)),
            }
        }
        let context = Arc::clone(&self.env.context);
        let scope = self.context_scope();
        async move {
            join_all(pending).await;
            context.delete(&scope);
        }
        .boxed()
    }

    // =========================================================================
    // Supervision and logging
    // =========================================================================

    /// Report a status change
    pub fn status(&self, status: StatusPayload) {
        if let Some(router) = self.router() {
            router.handle_status(&self.node_ref(), &status);
        }
    }

    /// Report an error, optionally with the message being processed
    pub fn error(&self, reason: &str, msg: Option<&Message>) {
        log::error!("{} {}", self.log_prefix(), reason);
        if let Some(router) = self.router() {
            router.handle_error(&self.node_ref(), reason, msg);
        }
    }

    pub fn log(&self, text: &str) {
        log::info!("{} {}", self.log_prefix(), text);
    }

    pub fn warn(&self, text: &str) {
        log::warn!("{} {}", self.log_prefix(), text);
    }

    pub fn debug(&self, text: &str) {
        log::debug!("{} {}", self.log_prefix(), text);
    }

    pub fn trace(&self, text: &str) {
        log::trace!("{} {}", self.log_prefix(), text);
    }

    fn log_prefix(&self) -> String {
        format!(
            "[{}:{}]",
            self.node_type,
            self.name.as_deref().unwrap_or(&self.id)
        )
    }

    // =========================================================================
    // Context and credentials
    // =========================================================================

    fn context_id(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }

    fn context_scope(&self) -> String {
        node_scope(self.context_id(), self.z.as_deref())
    }

    /// This node's own context
    pub fn context(&self) -> ContextHandle {
        ContextHandle::new(Arc::clone(&self.env.context), self.context_scope())
    }

    /// Context shared by the nodes of this node's flow
    pub fn flow_context(&self) -> ContextHandle {
        let scope = self.z.as_deref().unwrap_or(GLOBAL_CONTEXT);
        ContextHandle::new(Arc::clone(&self.env.context), scope)
    }

    pub fn global_context(&self) -> ContextHandle {
        ContextHandle::new(Arc::clone(&self.env.context), GLOBAL_CONTEXT)
    }

    /// Stored credentials of this node (template credentials inside subflows)
    pub fn credentials(&self) -> Option<Value> {
        self.env.credentials.as_ref()?.get(self.context_id())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("type", &self.node_type)
            .field("z", &self.z)
            .field("alias", &self.alias)
            .field("wires", &self.wiring.read().wires)
            .finish()
    }
}
