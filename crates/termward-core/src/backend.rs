//! Capability contract implemented by terminal backends (local shell, sandbox, container).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::BackendError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Options for one-shot execution and for starting interactive sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Text written to the process stdin before it is closed.
    pub input: Option<String>,
    /// `None` or `Some(0)` means unbounded.
    pub timeout_seconds: Option<u64>,
    /// Environment overrides. A `None` value removes the variable.
    pub env: HashMap<String, Option<String>>,
    pub working_directory: Option<PathBuf>,
}

impl ExecuteOptions {
    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Effective timeout, treating zero as "no timeout".
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

/// Result of a one-shot execution. Expected failure modes are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Success { output: String },
    BadExitCode { output: String, exit_code: i32 },
    Timeout,
    UnknownError { error: String },
}

impl ExecuteOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Success { output } | Self::BadExitCode { output, .. } => output,
            Self::Timeout | Self::UnknownError { .. } => "",
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Success { .. } => Some(0),
            Self::BadExitCode { exit_code, .. } => Some(*exit_code),
            Self::Timeout | Self::UnknownError { .. } => None,
        }
    }
}

/// Adaptive polling parameters for interactive output collection, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval: f64,
    #[serde(default = "default_settle_interval")]
    pub settle_interval: f64,
    #[serde(default = "default_max_interval")]
    pub max_interval: f64,
}

fn default_min_interval() -> f64 {
    1.0
}

fn default_settle_interval() -> f64 {
    2.0
}

fn default_max_interval() -> f64 {
    30.0
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval: default_min_interval(),
            settle_interval: default_settle_interval(),
            max_interval: default_max_interval(),
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn min(&self) -> Duration {
        secs(self.min_interval)
    }

    #[must_use]
    pub fn settle(&self) -> Duration {
        secs(self.settle_interval)
    }

    #[must_use]
    pub fn max(&self) -> Duration {
        secs(self.max_interval)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Output slice returned by [`TerminalBackend::collect_output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveOutput {
    pub output: String,
    pub new_position: usize,
    pub is_complete: bool,
    pub exit_code: Option<i32>,
}

/// Non-blocking snapshot of a backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub id: String,
    pub running: bool,
    pub start_time: SystemTime,
    pub output_length: usize,
    pub exit_code: Option<i32>,
}

/// Declared isolation of a backend. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    None,
    Sandbox,
    Container,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Sandbox => "sandbox",
            Self::Container => "container",
        })
    }
}

/// Backend that actually spawns processes or hosts interactive shells.
///
/// Methods return boxed futures so backends can live in a name-keyed registry
/// as `Arc<dyn TerminalBackend>`.
pub trait TerminalBackend: Send + Sync {
    fn execute_command<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<ExecuteOutcome, BackendError>>;

    fn run_script<'a>(
        &'a self,
        script: &'a str,
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<ExecuteOutcome, BackendError>>;

    /// Start an interactive session and return its opaque id.
    fn start_session<'a>(
        &'a self,
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<String, BackendError>>;

    fn send_input<'a>(
        &'a self,
        session_id: &'a str,
        input: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Authoritative fetch of everything produced since `from_position`.
    fn collect_output<'a>(
        &'a self,
        session_id: &'a str,
        from_position: usize,
        wait: &'a PollConfig,
    ) -> BoxFuture<'a, Result<InteractiveOutput, BackendError>>;

    fn terminate_session<'a>(&'a self, session_id: &'a str)
    -> BoxFuture<'a, Result<(), BackendError>>;

    /// Best-effort status query. Must not block. Default: unsupported.
    fn session_status(&self, _session_id: &str) -> Option<SessionStatus> {
        None
    }

    fn isolation_level(&self) -> IsolationLevel;
}
