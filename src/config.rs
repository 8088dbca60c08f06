//! Tool server configuration.
//!
//! Follows the `mcpServers` JSON layout used by MCP-enabled clients:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "calculator": { "type": "http", "url": "http://localhost:8931/mcp" },
//!     "filesystem": { "type": "stdio", "command": "npx", "args": ["mcp-fs"] }
//!   }
//! }
//! ```
//!
//! A malformed entry is logged and skipped so one bad server cannot take
//! the rest of the bridge down with it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Connection settings for one remote tool server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerConfig {
    /// Streamable-HTTP MCP endpoint.
    Http { url: String },
    /// Local subprocess speaking MCP over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Named tool server entries loaded from a config file.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub servers: BTreeMap<String, ServerConfig>,
}

impl BridgeConfig {
    /// Load configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse configuration from a JSON string.
    ///
    /// A missing `mcpServers` section yields an empty config; entries with
    /// an unknown connection kind or missing fields are skipped with a
    /// warning.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|err| Error::Config(format!("malformed config: {err}")))?;

        let Some(entries) = value.get("mcpServers").and_then(|v| v.as_object()) else {
            debug!("config has no mcpServers section");
            return Ok(Self::default());
        };

        let mut servers = BTreeMap::new();
        for (name, entry) in entries {
            match serde_json::from_value::<ServerConfig>(entry.clone()) {
                Ok(server) => {
                    servers.insert(name.clone(), server);
                }
                Err(err) => warn!(server = %name, %err, "skipping misconfigured tool server entry"),
            }
        }

        Ok(Self { servers })
    }

    /// Whether any server entries were loaded.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_both_kinds() {
        let config = BridgeConfig::from_json(
            r#"{
                "mcpServers": {
                    "calc": { "type": "http", "url": "http://localhost:8931/mcp" },
                    "fs": { "type": "stdio", "command": "npx", "args": ["-y", "mcp-fs"] }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 2);
        assert_eq!(
            config.servers["calc"],
            ServerConfig::Http {
                url: "http://localhost:8931/mcp".to_string()
            }
        );
        assert_eq!(
            config.servers["fs"],
            ServerConfig::Stdio {
                command: "npx".to_string(),
                args: vec!["-y".to_string(), "mcp-fs".to_string()],
            }
        );
    }

    #[test]
    fn test_args_default_to_empty() {
        let config = BridgeConfig::from_json(
            r#"{ "mcpServers": { "fs": { "type": "stdio", "command": "mcp-fs" } } }"#,
        )
        .unwrap();

        assert_eq!(
            config.servers["fs"],
            ServerConfig::Stdio {
                command: "mcp-fs".to_string(),
                args: Vec::new(),
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_skipped() {
        let config = BridgeConfig::from_json(
            r#"{
                "mcpServers": {
                    "good": { "type": "http", "url": "http://localhost:1234" },
                    "bad": { "type": "websocket", "url": "ws://localhost:1234" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 1);
        assert!(config.servers.contains_key("good"));
    }

    #[test]
    fn test_missing_section_is_empty() {
        let config = BridgeConfig::from_json("{}").unwrap();
        assert!(config.is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let result = BridgeConfig::from_json("{ not json");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "mcpServers": {{ "calc": {{ "type": "http", "url": "http://localhost:8931" }} }} }}"#
        )
        .unwrap();

        let config = BridgeConfig::from_path(file.path()).unwrap();
        assert_eq!(config.servers.len(), 1);
    }
}
