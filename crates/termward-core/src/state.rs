//! Per-agent terminal state and its persisted snapshot.

use serde::{Deserialize, Serialize};

use crate::backend::PollConfig;
use crate::config::{AgentDefaults, BashOptions};
use crate::session::SessionRegistry;

#[derive(Debug, Clone)]
pub struct TerminalState {
    pub provider_name: Option<String>,
    pub bash: BashOptions,
    pub interactive: PollConfig,
    pub sessions: SessionRegistry,
}

/// Fields that survive a restart. Live sessions are not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalStateSnapshot {
    pub provider_name: Option<String>,
    pub bash: BashOptions,
    pub interactive: PollConfig,
}

impl TerminalState {
    #[must_use]
    pub fn new(config: &AgentDefaults) -> Self {
        Self {
            provider_name: config.provider.clone(),
            bash: config.bash,
            interactive: config.interactive,
            sessions: SessionRegistry::new(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> TerminalStateSnapshot {
        TerminalStateSnapshot {
            provider_name: self.provider_name.clone(),
            bash: self.bash,
            interactive: self.interactive,
        }
    }

    /// Replace persisted fields from `snapshot`. Existing sessions are kept.
    pub fn restore(&mut self, snapshot: TerminalStateSnapshot) {
        self.provider_name = snapshot.provider_name;
        self.bash = snapshot.bash;
        self.interactive = snapshot.interactive;
    }

    /// Human-readable summary lines.
    #[must_use]
    pub fn show(&self) -> Vec<String> {
        vec![
            format!(
                "Provider: {}",
                self.provider_name.as_deref().unwrap_or("(none)")
            ),
            format!("Output Crop Limit: {} chars", self.bash.crop_output),
            format!("Active Sessions: {}", self.sessions.len()),
        ]
    }
}
