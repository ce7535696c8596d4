//! In-flight messages
//!
//! A message is a JSON object plus two opaque host handles (`req`/`res`)
//! that belong to whatever transport produced the message. Cloning deep
//! copies the body but shares the handles, so every copy of an HTTP
//! request message can still answer the same response.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::util::generate_id;

/// Property holding the message correlation id
pub const MSG_ID_KEY: &str = "_msgid";

/// Opaque host object carried alongside a message, never cloned
pub type MessageHandle = Arc<dyn Any + Send + Sync>;

/// A message routed between nodes
#[derive(Clone, Default)]
pub struct Message {
    body: Map<String, Value>,
    req: Option<MessageHandle>,
    res: Option<MessageHandle>,
}

impl Message {
    /// Create an empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message with only a `payload` property
    pub fn with_payload(payload: impl Into<Value>) -> Self {
        let mut msg = Self::new();
        msg.set("payload", payload);
        msg
    }

    /// Build a message from a JSON value
    ///
    /// Objects become the message body; any other value becomes its payload.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(body) => Self {
                body,
                req: None,
                res: None,
            },
            other => Self::with_payload(other),
        }
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.body.get(MSG_ID_KEY).and_then(Value::as_str)
    }

    pub fn set_msg_id(&mut self, id: impl Into<String>) {
        self.body
            .insert(MSG_ID_KEY.to_string(), Value::String(id.into()));
    }

    /// Return the message id, generating one first if it is missing
    pub fn ensure_msg_id(&mut self) -> String {
        if let Some(id) = self.msg_id() {
            return id.to_string();
        }
        let id = generate_id();
        self.set_msg_id(id.clone());
        id
    }

    pub fn payload(&self) -> Option<&Value> {
        self.body.get("payload")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.body.get_mut(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.body.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.body.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.body.contains_key(key)
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Message body as JSON (host handles are not included)
    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    pub fn req(&self) -> Option<&MessageHandle> {
        self.req.as_ref()
    }

    pub fn set_req(&mut self, handle: MessageHandle) {
        self.req = Some(handle);
    }

    pub fn res(&self) -> Option<&MessageHandle> {
        self.res.as_ref()
    }

    pub fn set_res(&mut self, handle: MessageHandle) {
        self.res = Some(handle);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("body", &self.body)
            .field("req", &self.req.is_some())
            .field("res", &self.res.is_some())
            .finish()
    }
}

impl PartialEq for Message {
    /// Structural equality of the bodies; handles are compared by identity
    fn eq(&self, other: &Self) -> bool {
        fn same(a: &Option<MessageHandle>, b: &Option<MessageHandle>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }
        self.body == other.body && same(&self.req, &other.req) && same(&self.res, &other.res)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clone_is_deep_for_body() {
        let mut original = Message::from_value(json!({"payload": {"n": 1}}));
        let mut copy = original.clone();
        copy.get_mut("payload").unwrap()["n"] = json!(2);

        assert_eq!(original.payload(), Some(&json!({"n": 1})));
        original.set("topic", "t");
        assert!(!copy.contains_key("topic"));
    }

    #[test]
    fn test_clone_shares_handles() {
        let mut msg = Message::with_payload("x");
        msg.set_res(Arc::new(String::from("response")));
        let copy = msg.clone();

        assert!(Arc::ptr_eq(msg.res().unwrap(), copy.res().unwrap()));
        assert_eq!(msg, copy);
    }

    #[test]
    fn test_ensure_msg_id_is_stable() {
        let mut msg = Message::new();
        let id = msg.ensure_msg_id();
        assert_eq!(msg.ensure_msg_id(), id);
        assert_eq!(msg.msg_id(), Some(id.as_str()));
    }

    #[test]
    fn test_non_object_becomes_payload() {
        let msg = Message::from_value(json!(42));
        assert_eq!(msg.payload(), Some(&json!(42)));
    }
}
