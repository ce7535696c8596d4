//! Runtime events
//!
//! Events are sent from the runtime to the editor comms channel (or any
//! consumer) to report node status and runtime state changes.

use serde::{Deserialize, Serialize};

use crate::types::StatusPayload;

/// Id of the event emitted once every flow has been started
pub const NODES_STARTED: &str = "nodes-started";
/// Id of the event emitted once every flow has been stopped
pub const NODES_STOPPED: &str = "nodes-stopped";
/// Id of the event describing why flows are (not) running
pub const RUNTIME_STATE: &str = "runtime-state";

/// Trait for sending runtime events
///
/// This abstracts over the transport mechanism (websocket comms, mpsc, etc.)
/// allowing the runtime to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the listener could not accept the event
    fn send(&self, event: RuntimeEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

/// Events emitted by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuntimeEvent {
    /// A node reported a status change
    NodeStatus { id: String, status: StatusPayload },

    /// A runtime lifecycle notification
    RuntimeEvent {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        /// Whether late subscribers should still receive this event
        retain: bool,
    },
}

impl RuntimeEvent {
    /// Create a node status event
    pub fn node_status(id: &str, status: StatusPayload) -> Self {
        Self::NodeStatus {
            id: id.to_string(),
            status,
        }
    }

    /// Create a runtime lifecycle event
    pub fn runtime(id: &str, payload: Option<serde_json::Value>, retain: bool) -> Self {
        Self::RuntimeEvent {
            id: id.to_string(),
            payload,
            retain,
        }
    }

    /// Id of a runtime lifecycle event
    pub fn runtime_id(&self) -> Option<&str> {
        match self {
            Self::RuntimeEvent { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: RuntimeEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<RuntimeEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().clone()
    }

    /// Ids of the collected runtime lifecycle events, in order
    pub fn runtime_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.runtime_id().map(str::to_string))
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: RuntimeEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();

        sink.send(RuntimeEvent::node_status("n1", StatusPayload::text("connected")))
            .unwrap();
        sink.send(RuntimeEvent::runtime(NODES_STARTED, None, false))
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);

        match &events[0] {
            RuntimeEvent::NodeStatus { id, status } => {
                assert_eq!(id, "n1");
                assert_eq!(status.text.as_deref(), Some("connected"));
            }
            _ => panic!("Expected NodeStatus event"),
        }
        assert_eq!(sink.runtime_ids(), vec![NODES_STARTED.to_string()]);
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        // Should not panic
        sink.send(RuntimeEvent::runtime(RUNTIME_STATE, None, true))
            .unwrap();
    }

    #[test]
    fn test_event_serialization() {
        let event = RuntimeEvent::node_status("n1", StatusPayload::text("ok").with_fill("green"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node-status");
        assert_eq!(json["status"]["fill"], "green");
    }
}
