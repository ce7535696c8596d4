//! Flow Runtime - execution and reconciliation engine for dataflow graphs
//!
//! This crate turns a flat, declarative flow configuration into running
//! nodes and keeps them in step with redeploys. It supports:
//!
//! - Tabs, global config nodes and nested subflow templates
//! - Incremental redeploys driven by a node-level configuration diff
//! - Message routing with per-target cloning and `_msgid` correlation
//! - Catch and status handlers found by walking enclosing scopes
//!
//! # Architecture
//!
//! - [`parse_config`] / [`diff_configs`]: pure functions over configurations
//! - [`Node`]: live node wrapper; behavior comes from a [`NodeFactory`]
//! - [`Flow`]: the running nodes of one tab (or the global scope)
//! - [`FlowRegistry`]: owns every flow, persists deploys, routes messages
//!
//! Storage, credentials, context and events are collaborator traits with
//! in-memory and file-backed defaults.
//!
//! # Example
//!
//! ```ignore
//! use flow_runtime::{DeployType, FlowConfigBuilder, FlowRegistry, MemoryFlowStorage,
//!     NodeTypeRegistry, RuntimeServices};
//!
//! let types = Arc::new(NodeTypeRegistry::new());
//! let registry = FlowRegistry::new(RuntimeServices::new(types, Arc::new(MemoryFlowStorage::new())));
//! let config = FlowConfigBuilder::new().add_tab("t1", "Main").build();
//! registry.set_flows(config, DeployType::Full, false).await?;
//! registry.start_flows().await;
//! ```

pub mod builder;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod events;
pub mod flow;
pub mod flows;
pub mod message;
pub mod node;
pub mod registry;
pub mod settings;
pub mod storage;
mod subflow;
pub mod types;
pub mod util;

// Re-export key types
pub use builder::FlowConfigBuilder;
pub use config::{diff_configs, parse_config, DiffResult, ParsedFlowGraph};
pub use context::{ContextHandle, ContextStore, MemoryContextStore};
pub use credentials::{CredentialStore, StorageCredentials};
pub use error::{FlowError, Result};
pub use events::{EventSink, NullEventSink, RuntimeEvent, VecEventSink};
pub use flow::Flow;
pub use flows::{FlowDefinition, FlowRegistry, RuntimeServices, SubflowDefinition};
pub use message::Message;
pub use node::{Node, NodeEnv, NodeRouter, SendPayload};
pub use registry::{NodeFactory, NodeTypeRegistry};
pub use settings::RuntimeSettings;
pub use storage::{FileFlowStorage, FlowSet, FlowStorage, MemoryFlowStorage};
pub use types::{DeployType, NodeConfig, NodeId, NodeRef, StatusPayload, Wires};
