//! Per-agent table of live interactive sessions.

use std::time::SystemTime;

/// One interactive session as seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    /// Text originally sent to start the session.
    pub command: String,
    /// Output already delivered to the caller. Never decreases.
    pub last_position: usize,
    pub start_time: SystemTime,
    /// Advisory only; the backend status query is authoritative.
    pub running: bool,
}

impl SessionRecord {
    /// Whole seconds since the session was registered.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }
}

/// Insertion-ordered session table. Not synchronized; the owning agent state serializes access.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Vec<SessionRecord>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session with cursor 0. Re-registering an id replaces the old record.
    pub fn register(&mut self, id: impl Into<String>, command: impl Into<String>) {
        let id = id.into();
        self.remove(&id);
        self.sessions.push(SessionRecord {
            id,
            command: command.into(),
            last_position: 0,
            start_time: SystemTime::now(),
            running: true,
        });
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Advance the cursor. No-op for unknown ids; a smaller position is ignored.
    pub fn update_position(&mut self, id: &str, position: usize) {
        if let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) {
            if position < session.last_position {
                tracing::warn!(
                    session = id,
                    current = session.last_position,
                    position,
                    "ignoring cursor regression"
                );
                return;
            }
            session.last_position = position;
        }
    }

    /// Remove a session, returning its record if it existed.
    pub fn remove(&mut self, id: &str) -> Option<SessionRecord> {
        let idx = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(idx))
    }

    /// Snapshot of all sessions in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<SessionRecord> {
        self.sessions.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
