//! The tool-bridge executor.
//!
//! Runs an agent-authored Rhai script with every currently available
//! remote tool bound into the scope as a local function. The outcome is
//! always a single string: the stringified result value, a fixed
//! "no result" diagnostic, or a failure report the calling agent can read
//! and retry from. Nothing escapes [`Executor::execute`] as an error.
//!
//! Tools take their arguments as an object map, the script-side equivalent
//! of keyword arguments:
//!
//! ```rhai
//! let sum = add_numbers(#{ a: 5, b: 7 });
//! return sum * 2;
//! ```
//!
//! Each execution builds a fresh engine and scope. Nothing persists
//! between calls, and the script has no access to the host's own bindings.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope};
use rmcp::model::JsonObject;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task;
use tracing::{debug, trace, warn};

use crate::events::{ExecutorCallbacks, ExecutorEvent, verbose_callbacks};
use crate::registry::{ToolCatalog, ToolHandle};

/// Returned when a script completes without producing a value.
pub const NO_RESULT_NOTICE: &str = "Execution succeeded, but the script produced no value. \
    Did you forget to end with an expression or a `return` statement? \
    Rewrite the script so it ends with a value summarizing the result.";

/// Prefix for failure reports returned to the caller.
pub const EXECUTION_ERROR_PREFIX: &str = "Script execution error:";

/// Executes agent-authored scripts against the current tool catalog.
#[derive(Clone)]
pub struct Executor {
    catalog: Arc<dyn ToolCatalog>,
    callbacks: ExecutorCallbacks,
    fence_regex: Regex,
}

impl Executor {
    /// Create an executor over the given tool catalog.
    pub fn new(catalog: Arc<dyn ToolCatalog>) -> Self {
        Self {
            catalog,
            callbacks: ExecutorCallbacks::default(),
            // Match a single fenced block spanning the whole input
            fence_regex: Regex::new(
                r"(?s)^\s*(?:<code>\s*(.*?)\s*</code>|```(?:rhai|rust)?[ \t]*\n(.*?)\n?\s*```)\s*$",
            )
            .unwrap(),
        }
    }

    /// Enable verbose logging to stderr.
    ///
    /// This prints each execution, tool call, and outcome.
    pub fn verbose(mut self, enabled: bool) -> Self {
        if enabled {
            self.callbacks = verbose_callbacks();
        }
        self
    }

    /// Set a callback for execution start events.
    pub fn on_execution_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutorEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_execution_start = Some(Arc::new(f));
        self
    }

    /// Set a callback for tool call events.
    pub fn on_tool_call<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutorEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_tool_call = Some(Arc::new(f));
        self
    }

    /// Set a callback for tool result events.
    pub fn on_tool_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutorEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_tool_result = Some(Arc::new(f));
        self
    }

    /// Set a callback for execution end events.
    pub fn on_execution_end<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutorEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_execution_end = Some(Arc::new(f));
        self
    }

    /// Set a catch-all callback for any event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutorEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_event = Some(Arc::new(f));
        self
    }

    /// Run a script and report the outcome as a string.
    ///
    /// The tool catalog is re-queried on every call, so tools added or
    /// removed on the remote side between executions are picked up here.
    /// Every failure mode collapses into the returned string; this method
    /// never raises across the boundary.
    pub async fn execute(&self, code: &str) -> String {
        let code = self.unwrap_fences(code);
        self.callbacks
            .emit(&ExecutorEvent::ExecutionStart { code: code.clone() });
        debug!(chars = code.len(), "executing script");

        let tools = self.catalog.tools().await;
        let bindings = bind_tools(tools);

        let callbacks = self.callbacks.clone();
        let handle = Handle::current();
        let script = code.clone();
        let outcome =
            task::spawn_blocking(move || run_script(&script, bindings, handle, &callbacks)).await;

        let (output, success) = match outcome {
            Ok(result) => result,
            Err(err) => (
                format!("{EXECUTION_ERROR_PREFIX}\nexecution worker failed: {err}"),
                false,
            ),
        };

        self.callbacks.emit(&ExecutorEvent::ExecutionEnd {
            output: output.clone(),
            success,
        });
        output
    }

    /// Unwrap code arriving inside a markdown fence or `<code>` tag.
    fn unwrap_fences(&self, code: &str) -> String {
        if let Some(caps) = self.fence_regex.captures(code)
            && let Some(inner) = caps.get(1).or_else(|| caps.get(2))
        {
            return inner.as_str().trim().to_string();
        }
        code.trim().to_string()
    }
}

/// One identifier-to-tool binding in the execution scope.
struct Binding {
    ident: String,
    tool: Arc<dyn ToolHandle>,
}

/// Assign a scope identifier to every tool.
///
/// Tool names are sanitized into valid identifiers; when two distinct
/// tools sanitize to the same identifier, the later one gets a numeric
/// suffix rather than silently shadowing the earlier binding.
fn bind_tools(tools: Vec<Arc<dyn ToolHandle>>) -> Vec<Binding> {
    let mut bindings = Vec::new();
    let mut taken: HashSet<String> = HashSet::new();

    for tool in tools {
        let base = sanitize_name(tool.name());
        let mut ident = base.clone();
        let mut n = 2;
        while !taken.insert(ident.clone()) {
            ident = format!("{base}_{n}");
            n += 1;
        }
        if n > 2 {
            warn!(tool = %tool.name(), %ident, "sanitized tool name collides with an earlier tool; binding under a suffixed name");
        }
        bindings.push(Binding { ident, tool });
    }

    bindings
}

/// Rewrite a tool name into a valid script identifier.
fn sanitize_name(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if ident.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// Evaluate the script on a blocking worker with a fresh engine and scope.
fn run_script(
    code: &str,
    bindings: Vec<Binding>,
    handle: Handle,
    callbacks: &ExecutorCallbacks,
) -> (String, bool) {
    let mut engine = Engine::new();
    engine.on_print(|text| debug!(target: "toolbridge::script", "{text}"));

    for binding in bindings {
        register_tool(&mut engine, binding, handle.clone(), callbacks.clone());
    }

    let mut scope = Scope::new();
    match engine.eval_with_scope::<Dynamic>(&mut scope, code) {
        Ok(value) if value.is_unit() => (NO_RESULT_NOTICE.to_string(), true),
        Ok(value) => (value.to_string(), true),
        Err(err) => (format!("{EXECUTION_ERROR_PREFIX}\n{err}"), false),
    }
}

/// Register one tool under its scope identifier, callable with an object
/// map of named arguments or with no arguments at all.
fn register_tool(engine: &mut Engine, binding: Binding, handle: Handle, callbacks: ExecutorCallbacks) {
    let Binding { ident, tool } = binding;

    let call = {
        let tool = tool.clone();
        let handle = handle.clone();
        let callbacks = callbacks.clone();
        move |args: Map| -> std::result::Result<Dynamic, Box<EvalAltResult>> {
            let mut arguments = JsonObject::new();
            for (key, value) in &args {
                arguments.insert(key.to_string(), from_dynamic(value)?);
            }
            dispatch(&tool, arguments, &handle, &callbacks)
        }
    };
    engine.register_fn(ident.as_str(), call);

    let call_no_args = move || -> std::result::Result<Dynamic, Box<EvalAltResult>> {
        dispatch(&tool, JsonObject::new(), &handle, &callbacks)
    };
    engine.register_fn(ident.as_str(), call_no_args);
}

/// Hand a tool call back to the async runtime and wait for the result.
fn dispatch(
    tool: &Arc<dyn ToolHandle>,
    arguments: JsonObject,
    handle: &Handle,
    callbacks: &ExecutorCallbacks,
) -> std::result::Result<Dynamic, Box<EvalAltResult>> {
    callbacks.emit(&ExecutorEvent::ToolCall {
        name: tool.name().to_string(),
        args: Value::Object(arguments.clone()),
    });
    trace!(tool = %tool.name(), "invoking bridged tool");

    let result = handle
        .block_on(tool.invoke(arguments))
        .map_err(|err| runtime_error(err.to_string()))?;

    callbacks.emit(&ExecutorEvent::ToolResult {
        name: tool.name().to_string(),
        result: result.clone(),
    });
    to_dynamic(&result)
}

fn runtime_error(detail: String) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(detail.into(), Position::NONE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct StaticCatalog {
        tools: Vec<Arc<dyn ToolHandle>>,
    }

    #[async_trait]
    impl ToolCatalog for StaticCatalog {
        async fn tools(&self) -> Vec<Arc<dyn ToolHandle>> {
            self.tools.clone()
        }
    }

    struct MutableCatalog {
        tools: Mutex<Vec<Arc<dyn ToolHandle>>>,
    }

    #[async_trait]
    impl ToolCatalog for MutableCatalog {
        async fn tools(&self) -> Vec<Arc<dyn ToolHandle>> {
            self.tools.lock().unwrap().clone()
        }
    }

    struct AddNumbers;

    #[async_trait]
    impl ToolHandle for AddNumbers {
        fn name(&self) -> &str {
            "add_numbers"
        }

        async fn invoke(&self, arguments: JsonObject) -> Result<Value> {
            let a = arguments.get("a").and_then(Value::as_i64).ok_or_else(|| {
                Error::InvalidArguments {
                    tool: "add_numbers".to_string(),
                    detail: "missing argument 'a'".to_string(),
                }
            })?;
            let b = arguments.get("b").and_then(Value::as_i64).ok_or_else(|| {
                Error::InvalidArguments {
                    tool: "add_numbers".to_string(),
                    detail: "missing argument 'b'".to_string(),
                }
            })?;
            Ok(json!(a + b))
        }
    }

    /// Same sanitized identifier as `add_numbers`, different behavior.
    struct DashedAdd;

    #[async_trait]
    impl ToolHandle for DashedAdd {
        fn name(&self) -> &str {
            "add-numbers"
        }

        async fn invoke(&self, _arguments: JsonObject) -> Result<Value> {
            Ok(json!("dashed"))
        }
    }

    struct Ping;

    #[async_trait]
    impl ToolHandle for Ping {
        fn name(&self) -> &str {
            "ping"
        }

        async fn invoke(&self, _arguments: JsonObject) -> Result<Value> {
            Ok(json!("pong"))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandle for Failing {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(&self, _arguments: JsonObject) -> Result<Value> {
            Err(Error::Invocation {
                tool: "flaky".to_string(),
                detail: "remote server went away".to_string(),
            })
        }
    }

    fn executor_with(tools: Vec<Arc<dyn ToolHandle>>) -> Executor {
        Executor::new(Arc::new(StaticCatalog { tools }))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_returns_value() {
        let executor = executor_with(Vec::new());
        assert_eq!(executor.execute("2 + 2").await, "4");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_top_level_return() {
        let executor = executor_with(Vec::new());
        assert_eq!(executor.execute("return 2 + 2;").await, "4");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_no_result() {
        let executor = executor_with(Vec::new());
        assert_eq!(executor.execute("let x = 1;").await, NO_RESULT_NOTICE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_syntax_error() {
        let executor = executor_with(Vec::new());
        let output = executor.execute("let = ;").await;
        assert!(output.starts_with(EXECUTION_ERROR_PREFIX));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_unknown_function() {
        let executor = executor_with(Vec::new());
        let output = executor.execute("mystery(#{ x: 1 })").await;
        assert!(output.starts_with(EXECUTION_ERROR_PREFIX));
        assert!(output.contains("mystery"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tool_call() {
        let executor = executor_with(vec![Arc::new(AddNumbers)]);
        let output = executor
            .execute("let sum = add_numbers(#{ a: 5, b: 7 }); return sum;")
            .await;
        assert_eq!(output, "12");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tool_result_chains_through_arithmetic() {
        // add 5 and 7, double the sum, subtract 4, divide by 5
        let executor = executor_with(vec![Arc::new(AddNumbers)]);
        let output = executor
            .execute(
                "let sum = add_numbers(#{ a: 5, b: 7 });\n\
                 let product = sum * 2;\n\
                 let difference = product - 4;\n\
                 return difference / 5;",
            )
            .await;
        assert_eq!(output, "4");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_arg_tool() {
        let executor = executor_with(vec![Arc::new(Ping)]);
        assert_eq!(executor.execute("ping()").await, "pong");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tool_error_reported_as_string() {
        let executor = executor_with(vec![Arc::new(Failing)]);
        let output = executor.execute("flaky(#{ x: 1 })").await;
        assert!(output.starts_with(EXECUTION_ERROR_PREFIX));
        assert!(output.contains("remote server went away"));

        // the executor keeps serving after a failed run
        assert_eq!(executor.execute("return 1 + 1;").await, "2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_collision_gets_suffixed_binding() {
        let executor = executor_with(vec![Arc::new(DashedAdd), Arc::new(AddNumbers)]);

        // first tool in catalog order keeps the plain identifier
        assert_eq!(executor.execute("add_numbers(#{ a: 1, b: 2 })").await, "dashed");
        // the later tool stays callable under the suffixed name
        assert_eq!(executor.execute("add_numbers_2(#{ a: 1, b: 2 })").await, "3");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discovery_is_rerun_per_execution() {
        let catalog = Arc::new(MutableCatalog {
            tools: Mutex::new(Vec::new()),
        });
        let executor = Executor::new(catalog.clone());

        let before = executor.execute("ping()").await;
        assert!(before.starts_with(EXECUTION_ERROR_PREFIX));

        catalog.tools.lock().unwrap().push(Arc::new(Ping));
        assert_eq!(executor.execute("ping()").await, "pong");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fenced_code_is_unwrapped() {
        let executor = executor_with(Vec::new());
        assert_eq!(executor.execute("```rhai\nreturn 2 + 2;\n```").await, "4");
        assert_eq!(executor.execute("<code>2 + 2</code>").await, "4");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("add_numbers"), "add_numbers");
        assert_eq!(sanitize_name("add-numbers"), "add_numbers");
        assert_eq!(sanitize_name("fs.read"), "fs_read");
        assert_eq!(sanitize_name("2fast"), "_2fast");
    }

    #[test]
    fn test_bind_tools_disambiguates() {
        let tools: Vec<Arc<dyn ToolHandle>> = vec![Arc::new(DashedAdd), Arc::new(AddNumbers)];
        let bindings = bind_tools(tools);

        assert_eq!(bindings[0].ident, "add_numbers");
        assert_eq!(bindings[1].ident, "add_numbers_2");
    }
}
