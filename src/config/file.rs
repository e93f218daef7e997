// src/config/file.rs
// On-disk configuration document: ~/.tool-hub-mcp.json

use crate::config::naming::{camel_case_name, is_self_reference, upper_snake_key};
use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the configuration document under the home directory.
const CONFIG_FILE_NAME: &str = ".tool-hub-mcp.json";

/// Cached discovery results for a server, refreshed when
/// `cacheToolMetadata` is enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// One registered child MCP server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ServerMetadata>,
}

/// Gateway tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    pub cache_tool_metadata: bool,
    pub process_pool_size: u32,
    pub timeout_seconds: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            cache_tool_metadata: true,
            process_pool_size: 3,
            timeout_seconds: 30,
        }
    }
}

/// The full configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub servers: BTreeMap<String, ServerConfig>,
    pub settings: HubSettings,
}

impl HubConfig {
    /// Path of the configuration document: `~/.tool-hub-mcp.json`.
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| {
                warn!("home directory not set, using current directory for config");
                PathBuf::from(".")
            })
            .join(CONFIG_FILE_NAME)
    }

    /// Load the configuration from `path`.
    ///
    /// A missing file is an empty configuration; unreadable or malformed
    /// files produce an error whose text names the path and a remedy.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, starting empty");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(HubError::Config(format!(
                    "cannot read {}: {} ({})",
                    path.display(),
                    e,
                    read_permission_hint()
                )));
            }
        };

        let config: HubConfig = serde_json::from_str(&contents).map_err(|e| {
            HubError::Config(format!(
                "{} is not valid gateway configuration: {} (fix the JSON or delete the file to start over)",
                path.display(),
                e
            ))
        })?;

        Ok(config)
    }

    /// Load for the serve path: any failure degrades to an empty
    /// configuration so the gateway keeps answering.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "starting with empty configuration");
                Self::default()
            }
        }
    }

    /// Validate the document before persisting it.
    pub fn validate(&self) -> Result<()> {
        for (name, server) in &self.servers {
            if server.command.trim().is_empty() {
                return Err(HubError::Config(format!(
                    "invalid configuration: server '{}' has an empty command",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Persist the document atomically.
    ///
    /// marshal -> parse-back validation -> sibling temp file -> rename,
    /// keeping the previous content in a `.bak` sibling.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let text = serde_json::to_string_pretty(self)?;

        // Parse-back check: what lands on disk must load to the same document.
        let reparsed: HubConfig = serde_json::from_str(&text)
            .map_err(|e| HubError::Config(format!("configuration failed round-trip: {}", e)))?;
        if reparsed != *self {
            return Err(HubError::Config(
                "configuration failed round-trip: reparsed document differs".to_string(),
            ));
        }

        let tmp_path = sibling_path(path, ".tmp");
        std::fs::write(&tmp_path, &text).map_err(|e| {
            HubError::Config(format!(
                "cannot write {}: {} ({})",
                tmp_path.display(),
                e,
                write_permission_hint()
            ))
        })?;

        if path.exists() {
            let bak_path = sibling_path(path, ".bak");
            if let Err(e) = std::fs::copy(path, &bak_path) {
                warn!(path = %bak_path.display(), error = %e, "failed to write config backup");
            }
        }

        std::fs::rename(&tmp_path, path).map_err(|e| {
            HubError::Config(format!(
                "cannot replace {}: {} ({})",
                path.display(),
                e,
                write_permission_hint()
            ))
        })?;

        debug!(path = %path.display(), servers = self.servers.len(), "configuration saved");
        Ok(())
    }

    /// Insert a server under its normalized name, normalizing env keys
    /// and rejecting self-referential descriptors. Returns the stored name.
    pub fn insert_server(&mut self, raw_name: &str, mut server: ServerConfig) -> Result<String> {
        let name = camel_case_name(raw_name);
        if name.is_empty() {
            return Err(HubError::Config(format!(
                "server name '{}' normalizes to nothing",
                raw_name
            )));
        }
        if server.command.trim().is_empty() {
            return Err(HubError::Config(format!(
                "invalid configuration: server '{}' has an empty command",
                name
            )));
        }
        if is_self_reference(&server.command, &server.args) {
            return Err(HubError::Config(format!(
                "server '{}' would launch the gateway itself",
                name
            )));
        }

        server.env = server
            .env
            .into_iter()
            .map(|(k, v)| (upper_snake_key(&k), v))
            .collect();

        self.servers.insert(name.clone(), server);
        Ok(name)
    }

    /// Registered server names in stable (sorted) order.
    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(unix)]
fn read_permission_hint() -> &'static str {
    "check permissions, e.g. chmod u+r ~/.tool-hub-mcp.json"
}

#[cfg(not(unix))]
fn read_permission_hint() -> &'static str {
    "check that your user can read the file in its Properties > Security tab"
}

#[cfg(unix)]
fn write_permission_hint() -> &'static str {
    "check permissions, e.g. chmod u+w ~/.tool-hub-mcp.json"
}

#[cfg(not(unix))]
fn write_permission_hint() -> &'static str {
    "check that your user can write the file in its Properties > Security tab"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> HubConfig {
        let mut config = HubConfig::default();
        config
            .insert_server(
                "jira",
                ServerConfig {
                    command: "npx".to_string(),
                    args: vec!["-y".to_string(), "@acme/jira-mcp".to_string()],
                    env: BTreeMap::from([("apiToken".to_string(), "secret".to_string())]),
                    source: "manual".to_string(),
                    metadata: None,
                },
            )
            .unwrap();
        config
    }

    #[test]
    fn test_defaults() {
        let settings = HubSettings::default();
        assert!(settings.cache_tool_metadata);
        assert_eq!(settings.process_pool_size, 3);
        assert_eq!(settings.timeout_seconds, 30);
    }

    #[test]
    fn test_insert_normalizes_name_and_env() {
        let config = sample_config();
        let server = config.servers.get("jira").unwrap();
        assert!(server.env.contains_key("API_TOKEN"));
        assert!(!server.env.contains_key("apiToken"));
    }

    #[test]
    fn test_insert_rejects_self_reference() {
        let mut config = HubConfig::default();
        let err = config
            .insert_server(
                "hub",
                ServerConfig {
                    command: "npx".to_string(),
                    args: vec!["tool-hub-mcp".to_string()],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("gateway itself"));
    }

    #[test]
    fn test_insert_rejects_empty_command() {
        let mut config = HubConfig::default();
        assert!(config
            .insert_server("x", ServerConfig::default())
            .is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = sample_config();
        config.save(&path).unwrap();

        let loaded = HubConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_writes_backup_of_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let first = sample_config();
        first.save(&path).unwrap();

        let mut second = first.clone();
        second.settings.timeout_seconds = 5;
        second.save(&path).unwrap();

        let bak = dir.path().join("config.json.bak");
        let backed_up: HubConfig =
            serde_json::from_str(&std::fs::read_to_string(bak).unwrap()).unwrap();
        assert_eq!(backed_up, first);
    }

    #[test]
    fn test_save_rejects_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = HubConfig::default();
        config
            .servers
            .insert("broken".to_string(), ServerConfig::default());

        let err = config.save(&path).unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::load(&dir.path().join("nope.json")).unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.settings, HubSettings::default());
    }

    #[test]
    fn test_load_malformed_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = HubConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let config = sample_config();
        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"cacheToolMetadata\""));
        assert!(text.contains("\"processPoolSize\""));
        assert!(text.contains("\"timeoutSeconds\""));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let json = r#"{"servers": {}, "settings": {"timeoutSeconds": 9, "futureKnob": true}}"#;
        let config: HubConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.settings.timeout_seconds, 9);
    }
}
