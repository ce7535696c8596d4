//! Runtime settings
//!
//! Handles where flows and credentials are stored and how node
//! configurations are prepared before construction.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;

/// Settings for the flow runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Directory holding the flow and credential files
    pub user_dir: PathBuf,
    /// Flow file name, relative to `user_dir`
    pub flow_file: String,
    /// Credential file name; derived from `flow_file` when unset
    pub credentials_file: Option<String>,
    /// Replace `$(NAME)` string properties with environment variables
    pub env_substitution: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            user_dir: PathBuf::from("."),
            flow_file: "flows.json".to_string(),
            credentials_file: None,
            env_substitution: true,
        }
    }
}

impl RuntimeSettings {
    /// Load settings from a JSON file; a missing file yields the defaults
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).await?;
        let settings = serde_json::from_str(&contents)?;
        log::debug!("Loaded runtime settings from {:?}", path);
        Ok(settings)
    }

    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = dir.into();
        self
    }

    pub fn with_flow_file(mut self, name: impl Into<String>) -> Self {
        self.flow_file = name.into();
        self
    }

    pub fn with_credentials_file(mut self, name: impl Into<String>) -> Self {
        self.credentials_file = Some(name.into());
        self
    }

    pub fn with_env_substitution(mut self, enabled: bool) -> Self {
        self.env_substitution = enabled;
        self
    }

    /// Full path of the flow file
    pub fn flow_path(&self) -> PathBuf {
        self.user_dir.join(&self.flow_file)
    }

    /// Full path of the credential file (`flows.json` -> `flows_cred.json`)
    pub fn credentials_path(&self) -> PathBuf {
        let name = match &self.credentials_file {
            Some(name) => name.clone(),
            None => {
                let stem = self
                    .flow_file
                    .strip_suffix(".json")
                    .unwrap_or(&self.flow_file);
                format!("{}_cred.json", stem)
            }
        };
        self.user_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        let settings = RuntimeSettings::default().with_user_dir("/data");
        assert_eq!(settings.flow_path(), PathBuf::from("/data/flows.json"));
        assert_eq!(
            settings.credentials_path(),
            PathBuf::from("/data/flows_cred.json")
        );
    }

    #[test]
    fn test_explicit_credentials_file() {
        let settings = RuntimeSettings::default()
            .with_user_dir("/data")
            .with_flow_file("home.json")
            .with_credentials_file("secrets.json");
        assert_eq!(settings.flow_path(), PathBuf::from("/data/home.json"));
        assert_eq!(
            settings.credentials_path(),
            PathBuf::from("/data/secrets.json")
        );
    }

    #[tokio::test]
    async fn test_from_file_partial() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        tokio::fs::write(&path, r#"{"flowFile": "lab.json", "envSubstitution": false}"#)
            .await
            .unwrap();

        let settings = RuntimeSettings::from_file(&path).await.unwrap();
        assert_eq!(settings.flow_file, "lab.json");
        assert!(!settings.env_substitution);
        assert_eq!(settings.user_dir, PathBuf::from("."));
    }

    #[tokio::test]
    async fn test_from_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let settings = RuntimeSettings::from_file(temp_dir.path().join("none.json"))
            .await
            .unwrap();
        assert_eq!(settings, RuntimeSettings::default());
    }
}
