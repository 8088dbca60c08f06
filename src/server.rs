//! MCP server surface exposing the executor as a single `run_code` tool.
//!
//! Any MCP-speaking orchestration runtime can mount this server and hand
//! scripts to the executor alongside the dynamically discovered remote
//! tools. Script-level failures come back as the tool's text result, never
//! as a protocol error, so the calling agent can read the report and retry.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::{Value, json};
use tracing::debug;

use crate::executor::Executor;

/// Name of the exposed tool.
pub const RUN_CODE_TOOL: &str = "run_code";

const RUN_CODE_DESCRIPTION: &str = "Execute a Rhai script with every bridged remote tool \
    available as a local function. Call tools with an object map of named arguments, e.g. \
    `add_numbers(#{ a: 5, b: 7 })`. The script MUST end with an expression or a top-level \
    `return` statement producing the result; the result comes back as a string, as do all \
    execution errors.";

const INSTRUCTIONS: &str = "Use run_code to chain bridged tools, perform logic or math, or \
    reshape data. Bridged tools are available inside the script as local functions taking an \
    object map of named arguments. Always end the script with a value summarizing what was \
    done; if the result reports an error, fix the script and try again.";

/// Serves [`Executor::execute`] as the `run_code` MCP tool.
#[derive(Clone)]
pub struct RunCodeServer {
    executor: Executor,
}

impl RunCodeServer {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    fn tool() -> Tool {
        Tool::new(
            RUN_CODE_TOOL,
            RUN_CODE_DESCRIPTION,
            Arc::new(run_code_schema()),
        )
    }
}

/// Input schema for the `run_code` tool.
fn run_code_schema() -> JsonObject {
    let schema = json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": "Rhai script. Must end with an expression or `return` statement producing the result."
            }
        },
        "required": ["code"]
    });
    match schema {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

impl ServerHandler for RunCodeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: vec![Self::tool()],
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if request.name != RUN_CODE_TOOL {
            return Err(McpError::invalid_params(
                format!("unknown tool '{}'", request.name),
                None,
            ));
        }

        let arguments = request.arguments.unwrap_or_default();
        let code = arguments
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing required argument 'code'", None))?;

        debug!(chars = code.len(), "run_code request");
        let output = self.executor.execute(code).await;
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_code_schema_compiles() {
        let schema = Value::Object(run_code_schema());
        let validator = jsonschema::validator_for(&schema).unwrap();

        assert!(validator.validate(&json!({ "code": "2 + 2" })).is_ok());
        assert!(validator.validate(&json!({})).is_err());
    }

    #[test]
    fn test_tool_declares_required_code_argument() {
        let tool = RunCodeServer::tool();
        assert_eq!(tool.name, RUN_CODE_TOOL);

        let required = tool.input_schema.get("required").cloned();
        assert_eq!(required, Some(json!(["code"])));
    }
}
