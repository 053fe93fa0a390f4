//! Adaptive output collection for interactive sessions.
//!
//! Collection runs as a small state machine bounded by one deadline:
//! an unconditional initial wait, an active poll that watches the backend's
//! reported output length, and a settle check that stops once the output has
//! not grown for `settle_interval`. Status queries only act as a growth oracle;
//! the payload is fetched once, at the end, with an authoritative
//! [`TerminalBackend::collect_output`] call.

use std::time::Duration;

use tokio::time::Instant;

use crate::backend::{InteractiveOutput, PollConfig, TerminalBackend};
use crate::error::BackendError;

/// Sleep between status queries while actively polling.
pub const POLL_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    InitialWait,
    ActivePoll,
    SettleCheck,
    Fetch,
}

#[derive(Debug, Clone, Copy)]
pub struct OutputCollector {
    tick: Duration,
}

impl Default for OutputCollector {
    fn default() -> Self {
        Self { tick: POLL_TICK }
    }
}

impl OutputCollector {
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    /// Wait for the session's output to settle (or for `max_interval` to pass), then
    /// return everything produced since `from_position`.
    ///
    /// Backends without status support degrade to a plain `min_interval` wait.
    ///
    /// # Errors
    ///
    /// Propagates the error of the final `collect_output` call unchanged.
    pub async fn collect(
        &self,
        backend: &dyn TerminalBackend,
        session_id: &str,
        from_position: usize,
        poll: &PollConfig,
    ) -> Result<InteractiveOutput, BackendError> {
        let started = Instant::now();
        let deadline = started + poll.max();
        let settle = poll.settle();

        let mut phase = Phase::InitialWait;
        let mut high_water = from_position;
        let mut last_growth = started;

        while phase != Phase::Fetch {
            phase = match phase {
                Phase::InitialWait => {
                    tokio::time::sleep(poll.min()).await;
                    last_growth = Instant::now();
                    match backend.session_status(session_id) {
                        Some(status) => {
                            if status.output_length > high_water {
                                high_water = status.output_length;
                            }
                            Phase::ActivePoll
                        }
                        None => {
                            tracing::debug!(
                                session = session_id,
                                "status unavailable, skipping active poll"
                            );
                            Phase::Fetch
                        }
                    }
                }
                Phase::ActivePoll => {
                    if Instant::now() >= deadline {
                        tracing::debug!(session = session_id, "poll deadline reached");
                        Phase::Fetch
                    } else {
                        match backend.session_status(session_id) {
                            Some(status) if status.output_length > high_water => {
                                high_water = status.output_length;
                                last_growth = Instant::now();
                                tokio::time::sleep(self.tick).await;
                                Phase::ActivePoll
                            }
                            Some(_) => Phase::SettleCheck,
                            None => Phase::Fetch,
                        }
                    }
                }
                Phase::SettleCheck => {
                    if last_growth.elapsed() >= settle {
                        tracing::debug!(session = session_id, high_water, "output settled");
                        Phase::Fetch
                    } else {
                        tokio::time::sleep(self.tick).await;
                        Phase::ActivePoll
                    }
                }
                Phase::Fetch => Phase::Fetch,
            };
        }

        backend
            .collect_output(session_id, from_position, poll)
            .await
    }
}
