//! Host capabilities and per-agent terminal state ownership.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::backend::BoxFuture;
use crate::state::TerminalState;

/// A yes/no confirmation request shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub message: String,
    /// Answer used when the prompt times out.
    pub default: Option<bool>,
    pub timeout: Option<Duration>,
}

impl ApprovalRequest {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            default: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: bool) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

/// Capabilities the embedding host provides to terminal operations.
pub trait AgentHost: Send + Sync {
    /// Ask the operator to confirm. Hosts resolve a timed-out prompt to `request.default`
    /// (or `false` when there is none).
    fn ask_approval<'a>(&'a self, request: &'a ApprovalRequest) -> BoxFuture<'a, bool>;

    /// Let the operator pick one of `options`. `None` means cancelled or unsupported.
    fn select<'a>(
        &'a self,
        _prompt: &'a str,
        _options: &'a [SelectOption],
        _current: Option<&'a str>,
    ) -> BoxFuture<'a, Option<String>> {
        Box::pin(std::future::ready(None))
    }

    fn info_message(&self, text: &str);

    fn error_message(&self, text: &str);

    fn chat_output(&self, text: &str);
}

/// One agent: its terminal state plus the host it talks to.
pub struct AgentContext {
    state: Mutex<TerminalState>,
    host: Arc<dyn AgentHost>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AgentContext {
    #[must_use]
    pub fn new(state: TerminalState, host: Arc<dyn AgentHost>) -> Self {
        Self {
            state: Mutex::new(state),
            host,
        }
    }

    #[must_use]
    pub fn host(&self) -> &dyn AgentHost {
        self.host.as_ref()
    }

    /// Read the state. The closure must not block.
    pub fn with_state<R>(&self, f: impl FnOnce(&TerminalState) -> R) -> R {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn mutate_state<R>(&self, f: impl FnOnce(&mut TerminalState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
