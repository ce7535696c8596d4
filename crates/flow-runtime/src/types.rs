//! Core types for flow configurations
//!
//! A deployed configuration is one flat, ordered array of node
//! configurations. Tabs, subflow templates, interior nodes, plain nodes
//! and config nodes are all mixed together and told apart by `type` and
//! by the presence of layout coordinates.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};

/// Unique identifier for a node
pub type NodeId = String;

/// Ordered output ports, each an ordered list of target node ids
pub type Wires = Vec<Vec<NodeId>>;

/// Node type of a flow tab
pub const TAB_TYPE: &str = "tab";
/// Node type of a subflow template
pub const SUBFLOW_TYPE: &str = "subflow";
/// Prefix of a subflow instance type (`subflow:<templateId>`)
pub const SUBFLOW_INSTANCE_PREFIX: &str = "subflow:";
/// Error handler node type
pub const CATCH_TYPE: &str = "catch";
/// Status handler node type
pub const STATUS_TYPE: &str = "status";
/// Virtual wire receiver node type
pub const LINK_IN_TYPE: &str = "link in";
/// Virtual wire sender node type
pub const LINK_OUT_TYPE: &str = "link out";
/// Id of the container holding globally scoped config nodes
pub const GLOBAL_FLOW_ID: &str = "global";

/// One entry of a flat flow configuration
///
/// Stored as the raw JSON object so that every property, including the
/// ones the engine knows nothing about, round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig(Map<String, Value>);

impl NodeConfig {
    /// Create a config with the given id and type
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(id.into()));
        map.insert("type".to_string(), Value::String(node_type.into()));
        Self(map)
    }

    /// Build a config from a JSON value, which must be an object with a string `id`
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                if !map.get("id").map_or(false, Value::is_string) {
                    return Err(FlowError::InvalidConfig(
                        "node is missing a string 'id'".to_string(),
                    ));
                }
                Ok(Self(map))
            }
            other => Err(FlowError::InvalidConfig(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Parse a whole flat configuration array
    pub fn list_from_value(value: Value) -> Result<Vec<Self>> {
        match value {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            other => Err(FlowError::InvalidConfig(format!(
                "expected an array of nodes, got {}",
                other
            ))),
        }
    }

    pub fn id(&self) -> &str {
        self.str_prop("id").unwrap_or_default()
    }

    pub fn node_type(&self) -> &str {
        self.str_prop("type").unwrap_or_default()
    }

    /// Owning tab or subflow template id
    pub fn z(&self) -> Option<&str> {
        self.str_prop("z").filter(|z| !z.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.str_prop("name")
    }

    /// Template id when this node is a `subflow:<id>` instance
    pub fn subflow_template_id(&self) -> Option<&str> {
        self.node_type().strip_prefix(SUBFLOW_INSTANCE_PREFIX)
    }

    /// Whether this node carries layout coordinates (visual/runtime node)
    pub fn has_position(&self) -> bool {
        self.0.contains_key("x") && self.0.contains_key("y")
    }

    /// Output wiring; missing or malformed entries read as unwired
    pub fn wires(&self) -> Wires {
        self.0.get("wires").map(wires_from_value).unwrap_or_default()
    }

    pub fn has_wires(&self) -> bool {
        matches!(self.0.get("wires"), Some(Value::Array(_)))
    }

    pub fn set_wires(&mut self, wires: &Wires) {
        self.0.insert("wires".to_string(), wires_to_value(wires));
    }

    /// String list property (e.g. `scope`, `links`)
    pub fn str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Iterate properties in authoring order
    pub fn properties(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub(crate) fn properties_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.0.iter_mut()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for NodeConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn wires_from_value(value: &Value) -> Wires {
    match value {
        Value::Array(outputs) => outputs
            .iter()
            .map(|output| match output {
                Value::Array(targets) => targets
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn wires_to_value(wires: &Wires) -> Value {
    Value::Array(
        wires
            .iter()
            .map(|output| Value::Array(output.iter().cloned().map(Value::String).collect()))
            .collect(),
    )
}

/// Insertion-ordered map keyed by node id
///
/// Container start order and handler registration order both follow the
/// order nodes appear in the configuration. Remove with `shift_remove` to
/// keep that order.
pub type IdMap<V> = IndexMap<NodeId, V>;

/// How a new configuration is applied to running flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployType {
    /// Stop everything, start everything
    Full,
    /// Restart only changed and removed nodes
    Nodes,
    /// Restart changed, removed and linked nodes
    Flows,
    /// Reload from storage (full restart, nothing is saved)
    Load,
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Full => "full",
            Self::Nodes => "nodes",
            Self::Flows => "flows",
            Self::Load => "load",
        };
        f.write_str(s)
    }
}

impl FromStr for DeployType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "nodes" => Ok(Self::Nodes),
            "flows" => Ok(Self::Flows),
            "load" => Ok(Self::Load),
            other => Err(FlowError::InvalidConfig(format!(
                "unknown deploy type '{}'",
                other
            ))),
        }
    }
}

/// Status reported by a node (shown under it in the editor)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl StatusPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_fill(mut self, fill: impl Into<String>) -> Self {
        self.fill = Some(fill.into());
        self
    }

    pub fn with_shape(mut self, shape: impl Into<String>) -> Self {
        self.shape = Some(shape.into());
        self
    }
}

/// Identity of a node as seen by the supervisory channel
///
/// Error and status walks only need these four fields, and sometimes run
/// on behalf of nodes that are not live (users of a global config node).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub node_type: String,
    pub z: Option<NodeId>,
    pub name: Option<String>,
}

impl From<&NodeConfig> for NodeRef {
    fn from(config: &NodeConfig) -> Self {
        Self {
            id: config.id().to_string(),
            node_type: config.node_type().to_string(),
            z: config.z().map(str::to_string),
            name: config.name().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_config_accessors() {
        let config = NodeConfig::from_value(json!({
            "id": "n1",
            "type": "subflow:sf1",
            "z": "t1",
            "x": 10, "y": 20,
            "wires": [["a", "b"], [], ["c"]]
        }))
        .unwrap();

        assert_eq!(config.id(), "n1");
        assert_eq!(config.subflow_template_id(), Some("sf1"));
        assert_eq!(config.z(), Some("t1"));
        assert!(config.has_position());
        assert_eq!(
            config.wires(),
            vec![vec!["a".to_string(), "b".to_string()], vec![], vec!["c".to_string()]]
        );
    }

    #[test]
    fn test_node_config_rejects_missing_id() {
        assert!(NodeConfig::from_value(json!({"type": "tab"})).is_err());
        assert!(NodeConfig::from_value(json!("tab")).is_err());
    }

    #[test]
    fn test_property_order_round_trips() {
        let raw = json!({"id": "n1", "zeta": 1, "type": "t", "alpha": 2});
        let config = NodeConfig::from_value(raw.clone()).unwrap();
        assert_eq!(
            serde_json::to_string(&config).unwrap(),
            serde_json::to_string(&raw).unwrap()
        );
    }

    #[test]
    fn test_id_map_keeps_insertion_order() {
        let mut map: IdMap<i32> = IdMap::new();
        map.insert("c".to_string(), 1);
        map.insert("a".to_string(), 2);
        map.insert("b".to_string(), 3);
        map.insert("a".to_string(), 4);
        map.shift_remove("c");

        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(map.get("a"), Some(&4));
    }

    #[test]
    fn test_deploy_type_parse() {
        assert_eq!("nodes".parse::<DeployType>().unwrap(), DeployType::Nodes);
        assert_eq!(DeployType::Flows.to_string(), "flows");
        assert!("partial".parse::<DeployType>().is_err());
    }
}
