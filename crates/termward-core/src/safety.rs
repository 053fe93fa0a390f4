//! Command safety classification: dangerous regex patterns plus safe command-name prefixes.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::TerminalError;

/// Separators applied in order when splitting a compound command line.
const SEPARATORS: [&str; 4] = ["&&", "||", ";", "|"];

/// Verdict for a shell command line. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Unknown,
    Dangerous,
}

impl SafetyLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Unknown => "unknown",
            Self::Dangerous => "dangerous",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless classifier built once from the configured rule sets.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    dangerous: Vec<Regex>,
    safe_prefixes: Vec<String>,
}

impl CommandClassifier {
    /// Compile dangerous patterns case-insensitively with `.` matching newlines.
    ///
    /// # Errors
    ///
    /// Returns `TerminalError::InvalidPattern` for the first pattern that fails to compile.
    pub fn new(
        dangerous_patterns: &[String],
        safe_prefixes: &[String],
    ) -> Result<Self, TerminalError> {
        let dangerous = dangerous_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .dot_matches_new_line(true)
                    .build()
                    .map_err(|source| TerminalError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dangerous,
            safe_prefixes: safe_prefixes.to_vec(),
        })
    }

    /// Classify a command line. `Dangerous` dominates `Unknown`, which dominates `Safe`.
    ///
    /// An empty or whitespace-only line has no sub-commands and is therefore `Safe`;
    /// callers reject empty commands before they get here.
    #[must_use]
    pub fn classify(&self, command_line: &str) -> SafetyLevel {
        if let Some(re) = self.dangerous.iter().find(|re| re.is_match(command_line)) {
            tracing::debug!(pattern = re.as_str(), "dangerous pattern matched");
            return SafetyLevel::Dangerous;
        }

        let lowered = command_line.to_lowercase();
        let all_safe = parse_compound_command(&lowered).into_iter().all(|name| {
            self.safe_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
        });

        if all_safe {
            SafetyLevel::Safe
        } else {
            SafetyLevel::Unknown
        }
    }
}

/// Split a command line on `&&`, `||`, `;` and `|` (in that order) and return the
/// first token of every non-empty fragment.
///
/// Splitting is purely lexical: separators inside quotes still split.
#[must_use]
pub fn parse_compound_command(command: &str) -> Vec<&str> {
    let mut fragments = vec![command];
    for sep in SEPARATORS {
        fragments = fragments
            .into_iter()
            .flat_map(|fragment| fragment.split(sep))
            .collect();
    }

    fragments
        .into_iter()
        .filter_map(|fragment| fragment.split_whitespace().next())
        .collect()
}
