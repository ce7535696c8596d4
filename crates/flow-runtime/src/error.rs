//! Error types for the flow runtime

use thiserror::Error;

use crate::message::Message;

/// Result type alias using FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur in the flow runtime
#[derive(Debug, Error)]
pub enum FlowError {
    /// `init()` was called while flows are running
    #[error("Cannot init without a stop")]
    AlreadyStarted,

    /// A node id is already part of the deployed configuration
    #[error("Duplicate node id: {0}")]
    DuplicateId(String),

    /// A node of this type is not allowed in the given slot (e.g. a tab inside a flow)
    #[error("Invalid node type: {0}")]
    InvalidNodeType(String),

    /// No flow with the given id is deployed
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// The global flow cannot be removed
    #[error("Not allowed to remove the global flow")]
    RemoveGlobalFlow,

    /// No module with the given id is registered
    #[error("Unrecognised module id: {0}")]
    UnknownModule(String),

    /// A module's types are still used by deployed nodes
    #[error("Type in use: {0}")]
    TypeInUse(String),

    /// A subflow instance references a template that does not exist
    #[error("Unknown subflow template: {0}")]
    UnknownSubflow(String),

    /// A node configuration entry is malformed
    #[error("Invalid node configuration: {0}")]
    InvalidConfig(String),

    /// A node constructor failed
    #[error("Node construction failed: {0}")]
    Construction(String),

    /// An input handler failed while processing a message
    #[error("{reason}")]
    Handler {
        reason: String,
        msg: Option<Box<Message>>,
    },

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a construction error with a message
    pub fn construction(reason: impl Into<String>) -> Self {
        Self::Construction(reason.into())
    }

    /// Create an input handler error, optionally carrying the message being processed
    ///
    /// The carried message is what catch handlers receive as context.
    pub fn handler(reason: impl Into<String>, msg: Option<Message>) -> Self {
        Self::Handler {
            reason: reason.into(),
            msg: msg.map(Box::new),
        }
    }

    /// Stable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyStarted => "already_started",
            Self::DuplicateId(_) => "duplicate_id",
            Self::InvalidNodeType(_) => "invalid_type",
            Self::FlowNotFound(_) => "not_found",
            Self::RemoveGlobalFlow => "not_allowed",
            Self::UnknownModule(_) => "unknown_module",
            Self::TypeInUse(_) => "type_in_use",
            Self::UnknownSubflow(_) => "unknown_subflow",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Construction(_) => "construction_failed",
            Self::Handler { .. } => "handler_failed",
            Self::Storage(_) => "storage_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
        }
    }
}
