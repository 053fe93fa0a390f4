/// Errors raised by a terminal backend when the call itself faults
/// (as opposed to an [`ExecuteOutcome`](crate::backend::ExecuteOutcome) describing a failed command).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend session not found: {id}")]
    SessionNotFound { id: String },

    #[error("backend session closed: {id}")]
    SessionClosed { id: String },

    #[error("operation not supported by backend: {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the terminal service and its tools.
#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("no terminal provider configured for agent")]
    NoProviderConfigured,

    #[error("terminal provider not found: {name}")]
    ProviderNotFound { name: String },

    #[error("terminal session not found: {id}")]
    SessionNotFound { id: String },

    #[error("user did not approve command execution: {command}")]
    NotApproved { command: String },

    #[error("command is required")]
    EmptyCommand,

    #[error("invalid dangerous command pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown tool: {id}")]
    UnknownTool { id: String },

    #[error("invalid tool parameters: {message}")]
    InvalidParams { message: String },

    #[error("invalid terminal config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, TerminalError>;
