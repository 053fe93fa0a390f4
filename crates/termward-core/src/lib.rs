//! Terminal session lifecycle, adaptive output collection and command safety
//! classification for agent-driven shells.

pub mod agent;
pub mod backend;
pub mod collector;
pub mod commands;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod registry;
pub mod safety;
pub mod service;
pub mod session;
pub mod state;
pub mod tools;

pub use agent::{AgentContext, AgentHost, ApprovalRequest, SelectOption};
pub use backend::{
    BoxFuture, ExecuteOptions, ExecuteOutcome, InteractiveOutput, IsolationLevel, PollConfig,
    SessionStatus, TerminalBackend,
};
pub use collector::OutputCollector;
pub use config::{AgentDefaults, AgentTerminalConfig, BashOptions, TerminalConfig};
pub use error::{BackendError, TerminalError};
pub use registry::BackendRegistry;
pub use safety::{CommandClassifier, SafetyLevel, parse_compound_command};
pub use service::{TRUNCATION_MARKER, TerminalService, crop_output};
pub use session::{SessionRecord, SessionRegistry};
pub use state::{TerminalState, TerminalStateSnapshot};
pub use tools::{ToolCall, ToolDef, tool_definitions};
