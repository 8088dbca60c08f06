//! Toolbridge - programmatic tool execution for agents
//!
//! Toolbridge lets an LLM orchestration runtime hand over a string of Rhai
//! code that runs with live access to every tool currently published by a
//! set of remote MCP servers, each tool bound into the script scope as a
//! local function. The outcome is always a single string: the result
//! value, a fixed "no result" diagnostic, or a failure report the agent
//! can read and retry from.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use toolbridge::{BridgeConfig, Executor, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BridgeConfig::from_path("config.json").unwrap();
//!     let registry = ToolRegistry::connect(&config).await;
//!
//!     let executor = Executor::new(Arc::new(registry.catalog()));
//!     let result = executor
//!         .execute("let sum = add_numbers(#{ a: 5, b: 7 }); return sum * 2;")
//!         .await;
//!     println!("{}", result); // "24"
//!
//!     registry.shutdown().await;
//! }
//! ```

mod config;
mod error;
mod events;
mod executor;
mod registry;
mod server;

pub use config::{BridgeConfig, ServerConfig};
pub use error::{Error, Result};
pub use events::{EventCallback, ExecutorCallbacks, ExecutorEvent};
pub use executor::{EXECUTION_ERROR_PREFIX, Executor, NO_RESULT_NOTICE};
pub use registry::{RegistryCatalog, ToolCatalog, ToolHandle, ToolRegistry, ToolSource};
pub use server::{RUN_CODE_TOOL, RunCodeServer};

// Re-export the argument map type tool handles receive
pub use rmcp::model::JsonObject;
