use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::backend::PollConfig;
use crate::error::TerminalError;

const SAFE_COMMANDS: &[&str] = &[
    "awk", "cat", "cd", "chdir", "diff", "echo", "find", "git", "grep", "head", "help", "hostname",
    "id", "ipconfig", "tee", "ls", "netstat", "ps", "pwd", "sort", "tail", "tree", "type", "uname",
    "uniq", "wc", "which", "touch", "mkdir", "npm", "yarn", "bun", "tsc", "node", "npx", "bunx",
    "vitest",
];

const DANGEROUS_COMMANDS: &[&str] = &[
    r"(^|\s)dd\s",
    r"(^|\s)rm.*-.*r",
    r"(^|\s)chmod.*-.*r",
    r"(^|\s)chown.*-.*r",
    r"(^|\s)rmdir\s",
    // find -delete, find -exec rm
    r"find.*-(delete|exec)",
    r"(^|\s)sudo\s",
    r"(^|\s)del\s",
    r"(^|\s)format\s",
    r"(^|\s)reboot",
    r"(^|\s)shutdown",
    r"git.*reset",
];

#[must_use]
pub fn default_safe_commands() -> Vec<String> {
    SAFE_COMMANDS.iter().map(|s| (*s).to_owned()).collect()
}

#[must_use]
pub fn default_dangerous_commands() -> Vec<String> {
    DANGEROUS_COMMANDS.iter().map(|s| (*s).to_owned()).collect()
}

fn default_crop_output() -> usize {
    10_000
}

fn default_bash_timeout() -> u64 {
    60
}

/// Top-level terminal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalConfig {
    #[serde(default)]
    pub agent_defaults: AgentDefaults,
    /// Backend-specific tables keyed by provider name.
    #[serde(default)]
    pub providers: HashMap<String, toml::Value>,
    #[serde(default = "default_safe_commands")]
    pub safe_commands: Vec<String>,
    #[serde(default = "default_dangerous_commands")]
    pub dangerous_commands: Vec<String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            agent_defaults: AgentDefaults::default(),
            providers: HashMap::new(),
            safe_commands: default_safe_commands(),
            dangerous_commands: default_dangerous_commands(),
        }
    }
}

/// Settings every agent starts from before its own overrides are merged in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub bash: BashOptions,
    #[serde(default)]
    pub interactive: PollConfig,
}

/// One-shot `bash` tool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashOptions {
    #[serde(default = "default_crop_output")]
    pub crop_output: usize,
    #[serde(default = "default_bash_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BashOptions {
    fn default() -> Self {
        Self {
            crop_output: default_crop_output(),
            timeout_seconds: default_bash_timeout(),
        }
    }
}

/// Per-agent overrides. Every leaf is optional; provided leaves replace the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentTerminalConfig {
    pub provider: Option<String>,
    pub bash: Option<BashOverrides>,
    pub interactive: Option<PollOverrides>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BashOverrides {
    pub crop_output: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollOverrides {
    pub min_interval: Option<f64>,
    pub settle_interval: Option<f64>,
    pub max_interval: Option<f64>,
}

impl AgentDefaults {
    /// Deep-merge agent overrides over these defaults.
    #[must_use]
    pub fn merged(&self, overrides: &AgentTerminalConfig) -> Self {
        let mut out = self.clone();
        if let Some(provider) = &overrides.provider {
            out.provider = Some(provider.clone());
        }
        if let Some(bash) = overrides.bash {
            if let Some(crop) = bash.crop_output {
                out.bash.crop_output = crop;
            }
            if let Some(timeout) = bash.timeout_seconds {
                out.bash.timeout_seconds = timeout;
            }
        }
        if let Some(poll) = overrides.interactive {
            if let Some(v) = poll.min_interval {
                out.interactive.min_interval = v;
            }
            if let Some(v) = poll.settle_interval {
                out.interactive.settle_interval = v;
            }
            if let Some(v) = poll.max_interval {
                out.interactive.max_interval = v;
            }
        }
        out
    }
}

impl TerminalConfig {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        let defaults = &mut self.agent_defaults;
        if let Ok(v) = std::env::var("TERMWARD_PROVIDER") {
            defaults.provider = Some(v);
        }
        if let Ok(v) = std::env::var("TERMWARD_BASH_CROP_OUTPUT") {
            match v.parse::<usize>() {
                Ok(n) => defaults.bash.crop_output = n,
                Err(_) => tracing::warn!("ignoring invalid TERMWARD_BASH_CROP_OUTPUT value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("TERMWARD_BASH_TIMEOUT") {
            match v.parse::<u64>() {
                Ok(secs) => defaults.bash.timeout_seconds = secs,
                Err(_) => tracing::warn!("ignoring invalid TERMWARD_BASH_TIMEOUT value: {v}"),
            }
        }
        for (key, slot) in [
            (
                "TERMWARD_INTERACTIVE_MIN_INTERVAL",
                &mut defaults.interactive.min_interval,
            ),
            (
                "TERMWARD_INTERACTIVE_SETTLE_INTERVAL",
                &mut defaults.interactive.settle_interval,
            ),
            (
                "TERMWARD_INTERACTIVE_MAX_INTERVAL",
                &mut defaults.interactive.max_interval,
            ),
        ] {
            if let Ok(v) = std::env::var(key) {
                match v.parse::<f64>() {
                    Ok(secs) => *slot = secs,
                    Err(_) => tracing::warn!("ignoring invalid {key} value: {v}"),
                }
            }
        }
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `TerminalError::InvalidConfig` describing the first offending field.
    pub fn validate(&self) -> Result<(), TerminalError> {
        let defaults = &self.agent_defaults;
        if defaults
            .provider
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(TerminalError::InvalidConfig(
                "agent_defaults.provider must not be empty".into(),
            ));
        }
        if defaults.bash.crop_output == 0 {
            return Err(TerminalError::InvalidConfig(
                "agent_defaults.bash.crop_output must be greater than 0".into(),
            ));
        }
        let poll = &defaults.interactive;
        for (name, value) in [
            ("min_interval", poll.min_interval),
            ("settle_interval", poll.settle_interval),
            ("max_interval", poll.max_interval),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TerminalError::InvalidConfig(format!(
                    "agent_defaults.interactive.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if poll.min_interval > poll.max_interval {
            return Err(TerminalError::InvalidConfig(
                "agent_defaults.interactive.min_interval must not exceed max_interval".into(),
            ));
        }
        Ok(())
    }

    /// Backend-specific table for `name`, if configured.
    #[must_use]
    pub fn provider_table(&self, name: &str) -> Option<&toml::Value> {
        self.providers.get(name)
    }
}
