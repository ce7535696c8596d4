//! Flow configuration parsing and diffing
//!
//! - [`parse_config`] turns the flat deployed configuration into a
//!   [`ParsedFlowGraph`]: per-tab node maps, subflow templates, global
//!   config nodes and the list of node types nobody has registered.
//! - [`diff_configs`] compares two parsed graphs and classifies every
//!   node for an incremental redeploy.

mod diff;
mod parse;

pub use diff::{diff_configs, DiffResult};
pub use parse::{
    parse_config, FlowDescriptor, ParsedFlowGraph, PortWire, SubflowPort, SubflowTemplate,
};
