//! Execution events and callbacks for observability.

use std::sync::Arc;

use serde_json::Value;

/// Events emitted while a script runs.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    /// A script is about to run
    ExecutionStart { code: String },
    /// A bridged tool was called
    ToolCall { name: String, args: Value },
    /// A bridged tool returned a result
    ToolResult { name: String, result: Value },
    /// A script finished
    ExecutionEnd { output: String, success: bool },
}

/// Type alias for event callbacks
pub type EventCallback = Arc<dyn Fn(&ExecutorEvent) + Send + Sync>;

/// Storage for executor callbacks
#[derive(Default, Clone)]
pub struct ExecutorCallbacks {
    pub on_execution_start: Option<EventCallback>,
    pub on_tool_call: Option<EventCallback>,
    pub on_tool_result: Option<EventCallback>,
    pub on_execution_end: Option<EventCallback>,
    /// Catch-all callback for any event
    pub on_event: Option<EventCallback>,
}

impl ExecutorCallbacks {
    /// Emit an event to the appropriate callback(s)
    pub fn emit(&self, event: &ExecutorEvent) {
        let specific = match event {
            ExecutorEvent::ExecutionStart { .. } => &self.on_execution_start,
            ExecutorEvent::ToolCall { .. } => &self.on_tool_call,
            ExecutorEvent::ToolResult { .. } => &self.on_tool_result,
            ExecutorEvent::ExecutionEnd { .. } => &self.on_execution_end,
        };

        if let Some(cb) = specific {
            cb(event);
        }

        // Call catch-all callback
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }
}

/// Create verbose logging callbacks
pub fn verbose_callbacks() -> ExecutorCallbacks {
    ExecutorCallbacks {
        on_execution_start: Some(Arc::new(|e| {
            if let ExecutorEvent::ExecutionStart { code } = e {
                let lines: Vec<&str> = code.lines().take(3).collect();
                let preview = lines.join("\\n");
                let suffix = if code.lines().count() > 3 { "..." } else { "" };
                eprintln!("[toolbridge] Executing: {}{}", preview, suffix);
            }
        })),
        on_tool_call: Some(Arc::new(|e| {
            if let ExecutorEvent::ToolCall { name, args } = e {
                eprintln!("[toolbridge] Tool: {}({})", name, args);
            }
        })),
        on_tool_result: Some(Arc::new(|e| {
            if let ExecutorEvent::ToolResult { name, result } = e {
                let preview: String = result.to_string().chars().take(80).collect();
                eprintln!("[toolbridge] Tool {} -> {}", name, preview);
            }
        })),
        on_execution_end: Some(Arc::new(|e| {
            if let ExecutorEvent::ExecutionEnd { output, success } = e {
                let status = if *success { "✓" } else { "✗" };
                let preview: String = output.chars().take(80).collect();
                let suffix = if output.len() > 80 { "..." } else { "" };
                eprintln!(
                    "[toolbridge] {} {}{}",
                    status,
                    preview.replace('\n', "\\n"),
                    suffix
                );
            }
        })),
        ..Default::default()
    }
}
