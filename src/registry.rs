//! Tool server connections, discovery, and invocation.
//!
//! A [`ToolSource`] is one live MCP session, established from a
//! [`ServerConfig`]. The [`ToolRegistry`] owns every source for the life of
//! the process; executions see the tools through a [`RegistryCatalog`],
//! which re-queries each source on every call so catalog changes on the
//! remote side show up without a restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParam, CallToolResult, JsonObject, Tool};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, ServerConfig};
use crate::error::{Error, Result};

/// How long a server may take to complete the MCP handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An opaque remote capability: a name plus an invocation operation.
///
/// Implementations are shared read-only across in-flight executions; the
/// executor borrows handles for the duration of one run and never keeps
/// them across calls.
#[async_trait]
pub trait ToolHandle: Send + Sync {
    /// The tool's name as published by its server.
    fn name(&self) -> &str;

    /// Forward `arguments` verbatim to the remote tool and return its
    /// decoded result.
    async fn invoke(&self, arguments: JsonObject) -> Result<Value>;
}

/// A provider of the current tool list, queried fresh before every
/// execution.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn tools(&self) -> Vec<Arc<dyn ToolHandle>>;
}

/// One live connection to a remote tool server.
pub struct ToolSource {
    name: String,
    service: RunningService<RoleClient, ()>,
}

impl ToolSource {
    /// Connect to a server and validate the session by fetching its tool
    /// list once.
    pub async fn connect(name: &str, config: &ServerConfig) -> Result<Self> {
        let connect = async {
            match config {
                ServerConfig::Http { url } => ()
                    .serve(StreamableHttpClientTransport::from_uri(url.as_str()))
                    .await
                    .map_err(|err| connection_error(name, err)),
                ServerConfig::Stdio { command, args } => {
                    let transport = TokioChildProcess::new(Command::new(command).configure(
                        |cmd| {
                            for arg in args {
                                cmd.arg(arg);
                            }
                        },
                    ))
                    .map_err(|err| connection_error(name, err))?;
                    ().serve(transport)
                        .await
                        .map_err(|err| connection_error(name, err))
                }
            }
        };

        let service = timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| Error::Connection {
                server: name.to_string(),
                detail: format!("handshake timed out after {CONNECT_TIMEOUT:?}"),
            })??;

        let source = Self {
            name: name.to_string(),
            service,
        };

        let tools = match source.tools().await {
            Ok(tools) => tools,
            Err(err) => {
                if let Err(close_err) = source.close().await {
                    debug!(server = %name, %close_err, "error closing failed connection");
                }
                return Err(err);
            }
        };
        let tool_names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        info!(server = %name, tools = ?tool_names, "tool server connected");

        Ok(source)
    }

    /// The configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the server's current tool list.
    pub async fn tools(&self) -> Result<Vec<Tool>> {
        self.service
            .list_all_tools()
            .await
            .map_err(|err| Error::Discovery(format!("{}: {err}", self.name)))
    }

    fn peer(&self) -> Peer<RoleClient> {
        self.service.peer().clone()
    }

    /// Release the connection (and, for stdio servers, the subprocess).
    pub async fn close(self) -> Result<()> {
        let Self { name, service } = self;
        service
            .cancel()
            .await
            .map(|_| ())
            .map_err(|err| connection_error(&name, err))
    }
}

fn connection_error(server: &str, err: impl std::fmt::Display) -> Error {
    Error::Connection {
        server: server.to_string(),
        detail: err.to_string(),
    }
}

/// Owns every configured tool server connection for the process lifetime.
pub struct ToolRegistry {
    sources: Vec<ToolSource>,
    filter: Option<Vec<String>>,
}

impl ToolRegistry {
    /// Connect to every configured server concurrently.
    ///
    /// A server that cannot be reached is logged and skipped; the registry
    /// itself always comes up, possibly empty.
    pub async fn connect(config: &BridgeConfig) -> Self {
        let connects = config.servers.iter().map(|(name, server)| async move {
            match ToolSource::connect(name, server).await {
                Ok(source) => Some(source),
                Err(err) => {
                    warn!(server = %name, %err, "skipping tool server");
                    None
                }
            }
        });

        let sources = join_all(connects).await.into_iter().flatten().collect();
        Self {
            sources,
            filter: None,
        }
    }

    /// Restrict the bridged tools to the given names.
    pub fn with_tool_filter(mut self, filter: Vec<String>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Whether any server connection is live.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of live server connections.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// A cheap view of the registry for per-execution tool discovery.
    pub fn catalog(&self) -> RegistryCatalog {
        RegistryCatalog {
            sources: self
                .sources
                .iter()
                .map(|source| CatalogSource {
                    server: source.name.clone(),
                    peer: source.peer(),
                })
                .collect(),
            filter: self.filter.clone(),
        }
    }

    /// Release every live connection.
    ///
    /// Teardown errors are logged and do not block shutdown of the
    /// remaining connections.
    pub async fn shutdown(self) {
        for source in self.sources {
            let server = source.name().to_string();
            if let Err(err) = source.close().await {
                warn!(server = %server, %err, "error closing tool server connection");
            }
        }
    }
}

#[derive(Clone)]
struct CatalogSource {
    server: String,
    peer: Peer<RoleClient>,
}

/// Peer-holding view of a [`ToolRegistry`], safe to share with executors
/// while the registry retains ownership of the connections.
#[derive(Clone)]
pub struct RegistryCatalog {
    sources: Vec<CatalogSource>,
    filter: Option<Vec<String>>,
}

#[async_trait]
impl ToolCatalog for RegistryCatalog {
    async fn tools(&self) -> Vec<Arc<dyn ToolHandle>> {
        let mut handles: Vec<Arc<dyn ToolHandle>> = Vec::new();
        for source in &self.sources {
            let listed = match source.peer.list_all_tools().await {
                Ok(tools) => tools,
                Err(err) => {
                    warn!(server = %source.server, %err, "could not fetch tools; skipping server for this execution");
                    continue;
                }
            };
            for tool in listed {
                if let Some(filter) = &self.filter
                    && !filter.iter().any(|allowed| allowed == tool.name.as_ref())
                {
                    continue;
                }
                handles.push(Arc::new(McpTool {
                    peer: source.peer.clone(),
                    tool,
                }));
            }
        }
        handles
    }
}

/// A [`ToolHandle`] backed by one tool on one MCP server.
struct McpTool {
    tool: Tool,
    peer: Peer<RoleClient>,
}

impl McpTool {
    fn validate_arguments(&self, arguments: &JsonObject) -> Result<()> {
        let schema = Value::Object(self.tool.input_schema.as_ref().clone());
        let validator = match jsonschema::validator_for(&schema) {
            Ok(validator) => validator,
            Err(err) => {
                debug!(tool = %self.tool.name, %err, "input schema does not compile; skipping validation");
                return Ok(());
            }
        };

        let instance = Value::Object(arguments.clone());
        if let Err(err) = validator.validate(&instance) {
            return Err(Error::InvalidArguments {
                tool: self.tool.name.to_string(),
                detail: err.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ToolHandle for McpTool {
    fn name(&self) -> &str {
        self.tool.name.as_ref()
    }

    async fn invoke(&self, arguments: JsonObject) -> Result<Value> {
        self.validate_arguments(&arguments)?;

        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: self.tool.name.clone(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|err| Error::Invocation {
                tool: self.tool.name.to_string(),
                detail: err.to_string(),
            })?;

        decode_result(self.tool.name.as_ref(), result)
    }
}

/// Decode an MCP call result into a plain JSON value.
///
/// Structured content wins when present; otherwise the text content is
/// parsed as JSON when it parses (so numeric tool output stays usable in
/// script arithmetic) and kept as a string when it does not.
fn decode_result(tool: &str, result: CallToolResult) -> Result<Value> {
    if result.is_error.unwrap_or(false) {
        return Err(Error::Invocation {
            tool: tool.to_string(),
            detail: text_content(&result),
        });
    }

    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }

    let text = text_content(&result);
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn text_content(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|content| content.as_text().map(|text| text.text.clone()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;

    #[test]
    fn test_decode_numeric_text() {
        let result = CallToolResult::success(vec![Content::text("12")]);
        let value = decode_result("add_numbers", result).unwrap();
        assert_eq!(value, Value::from(12));
    }

    #[test]
    fn test_decode_plain_text() {
        let result = CallToolResult::success(vec![Content::text("sunny, 22C")]);
        let value = decode_result("get_weather", result).unwrap();
        assert_eq!(value, Value::String("sunny, 22C".to_string()));
    }

    #[test]
    fn test_decode_prefers_structured_content() {
        let mut result = CallToolResult::success(vec![Content::text("ignored")]);
        result.structured_content = Some(serde_json::json!({ "sum": 12 }));

        let value = decode_result("add_numbers", result).unwrap();
        assert_eq!(value, serde_json::json!({ "sum": 12 }));
    }

    #[test]
    fn test_decode_error_result() {
        let mut result = CallToolResult::success(vec![Content::text("division by zero")]);
        result.is_error = Some(true);

        let err = decode_result("divide", result).unwrap_err();
        assert!(matches!(err, Error::Invocation { .. }));
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    #[ignore] // Requires a reachable MCP server on stdio
    async fn test_source_connect() {
        let config = ServerConfig::Stdio {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "@modelcontextprotocol/server-everything".to_string()],
        };

        let source = ToolSource::connect("everything", &config).await.unwrap();
        assert!(!source.tools().await.unwrap().is_empty());
        source.close().await.unwrap();
    }
}
