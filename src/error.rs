//! Error types for the tool bridge.

use thiserror::Error;

/// Errors raised while loading configuration, talking to tool servers,
/// or invoking bridged tools.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be parsed
    #[error("config error: {0}")]
    Config(String),

    /// A tool server could not be reached or initialized
    #[error("connection to tool server '{server}' failed: {detail}")]
    Connection { server: String, detail: String },

    /// A tool listing could not be fetched
    #[error("tool discovery failed: {0}")]
    Discovery(String),

    /// Arguments rejected by the tool's declared input schema
    #[error("invalid arguments for tool '{tool}': {detail}")]
    InvalidArguments { tool: String, detail: String },

    /// A remote tool invocation failed
    #[error("tool '{tool}' failed: {detail}")]
    Invocation { tool: String, detail: String },

    /// Underlying IO failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for toolbridge operations.
pub type Result<T> = std::result::Result<T, Error>;
