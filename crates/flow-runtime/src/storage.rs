//! Flow and credential persistence
//!
//! Flows are persisted as one ordered array of flat node configurations.
//! Credentials are persisted separately as a map keyed by node id, so they
//! never appear in the flow file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::fs;

use crate::error::{FlowError, Result};
use crate::settings::RuntimeSettings;
use crate::types::NodeConfig;
use crate::util::revision_of;

/// Credentials keyed by node id
pub type CredentialMap = Map<String, Value>;

/// A stored flow configuration and its revision
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowSet {
    pub flows: Vec<NodeConfig>,
    pub rev: String,
}

/// Storage backend for flows and credentials
#[async_trait]
pub trait FlowStorage: Send + Sync {
    /// Load the stored flows; an empty store yields an empty configuration
    async fn get_flows(&self) -> Result<FlowSet>;

    /// Persist the flows and return the new revision
    async fn save_flows(&self, flows: &[NodeConfig]) -> Result<String>;

    async fn get_credentials(&self) -> Result<CredentialMap>;

    async fn save_credentials(&self, credentials: &CredentialMap) -> Result<()>;
}

/// Revision of a flow configuration
pub fn flows_revision(flows: &[NodeConfig]) -> Result<String> {
    let bytes = serde_json::to_vec(flows)?;
    Ok(revision_of(&bytes))
}

/// In-memory storage, used by tests and embedded hosts
#[derive(Default)]
pub struct MemoryFlowStorage {
    flows: RwLock<Vec<NodeConfig>>,
    credentials: RwLock<CredentialMap>,
}

impl MemoryFlowStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with flows
    pub fn with_flows(flows: Vec<NodeConfig>) -> Self {
        Self {
            flows: RwLock::new(flows),
            credentials: RwLock::new(Map::new()),
        }
    }

    /// Snapshot of the stored credentials
    pub fn credentials(&self) -> CredentialMap {
        self.credentials.read().clone()
    }
}

#[async_trait]
impl FlowStorage for MemoryFlowStorage {
    async fn get_flows(&self) -> Result<FlowSet> {
        let flows = self.flows.read().clone();
        let rev = flows_revision(&flows)?;
        Ok(FlowSet { flows, rev })
    }

    async fn save_flows(&self, flows: &[NodeConfig]) -> Result<String> {
        *self.flows.write() = flows.to_vec();
        flows_revision(flows)
    }

    async fn get_credentials(&self) -> Result<CredentialMap> {
        Ok(self.credentials.read().clone())
    }

    async fn save_credentials(&self, credentials: &CredentialMap) -> Result<()> {
        *self.credentials.write() = credentials.clone();
        Ok(())
    }
}

/// JSON file storage
///
/// # Example
///
/// ```ignore
/// let settings = RuntimeSettings::default().with_user_dir("/var/lib/flows");
/// let storage = FileFlowStorage::from_settings(&settings);
/// let FlowSet { flows, rev } = storage.get_flows().await?;
/// ```
#[derive(Debug, Clone)]
pub struct FileFlowStorage {
    flow_path: PathBuf,
    credentials_path: PathBuf,
}

impl FileFlowStorage {
    pub fn new(flow_path: impl Into<PathBuf>, credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            flow_path: flow_path.into(),
            credentials_path: credentials_path.into(),
        }
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(settings.flow_path(), settings.credentials_path())
    }

    pub fn flow_path(&self) -> &Path {
        &self.flow_path
    }

    async fn read_json(path: &Path) -> Result<Option<Value>> {
        if !fs::try_exists(path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn write_json(path: &Path, value: &Value) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(value)?;
        fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl FlowStorage for FileFlowStorage {
    async fn get_flows(&self) -> Result<FlowSet> {
        let flows = match Self::read_json(&self.flow_path).await? {
            Some(value) => NodeConfig::list_from_value(value)?,
            None => {
                log::info!("Flow file {:?} not found, starting empty", self.flow_path);
                Vec::new()
            }
        };
        let rev = flows_revision(&flows)?;
        log::debug!(
            "Loaded {} nodes from {:?} (rev {})",
            flows.len(),
            self.flow_path,
            rev
        );
        Ok(FlowSet { flows, rev })
    }

    async fn save_flows(&self, flows: &[NodeConfig]) -> Result<String> {
        let value = serde_json::to_value(flows)?;
        Self::write_json(&self.flow_path, &value).await?;
        log::debug!("Saved {} nodes to {:?}", flows.len(), self.flow_path);
        flows_revision(flows)
    }

    async fn get_credentials(&self) -> Result<CredentialMap> {
        match Self::read_json(&self.credentials_path).await? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(FlowError::Storage(format!(
                "credential file {:?} is not an object",
                self.credentials_path
            ))),
            None => Ok(Map::new()),
        }
    }

    async fn save_credentials(&self, credentials: &CredentialMap) -> Result<()> {
        Self::write_json(&self.credentials_path, &Value::Object(credentials.clone())).await?;
        log::debug!("Saved credentials to {:?}", self.credentials_path);
        Ok(())
    }
}
