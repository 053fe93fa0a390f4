//! In-memory backend and host for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use crate::agent::{AgentHost, ApprovalRequest, SelectOption};
use crate::backend::{
    BoxFuture, ExecuteOptions, ExecuteOutcome, InteractiveOutput, IsolationLevel, PollConfig,
    SessionStatus, TerminalBackend,
};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Execute {
        command: String,
        args: Vec<String>,
        options: ExecuteOptions,
    },
    Script {
        script: String,
        options: ExecuteOptions,
    },
    Start {
        options: ExecuteOptions,
    },
    Input {
        session_id: String,
        input: String,
    },
    Terminate {
        session_id: String,
    },
}

#[derive(Debug)]
struct MockSession {
    output: String,
    running: bool,
    exit_code: Option<i32>,
    start_time: SystemTime,
}

#[derive(Debug, Default)]
struct MockState {
    sessions: HashMap<String, MockSession>,
    next_id: u64,
    outcomes: VecDeque<Result<ExecuteOutcome, String>>,
    collect_fault: Option<String>,
    calls: Vec<MockCall>,
}

/// Scriptable backend: one-shot outcomes are queued, session output is pushed by the test.
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
    status_supported: bool,
    echo_input: bool,
    fail_terminate: bool,
    fail_input: bool,
    status_calls: AtomicUsize,
    collect_calls: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            status_supported: true,
            echo_input: false,
            fail_terminate: false,
            fail_input: false,
            status_calls: AtomicUsize::new(0),
            collect_calls: AtomicUsize::new(0),
        }
    }
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn without_status(mut self) -> Self {
        self.status_supported = false;
        self
    }

    /// Append every input line to the session output, like a shell echoing commands.
    #[must_use]
    pub fn with_echo(mut self) -> Self {
        self.echo_input = true;
        self
    }

    #[must_use]
    pub fn failing_terminate(mut self) -> Self {
        self.fail_terminate = true;
        self
    }

    #[must_use]
    pub fn failing_input(mut self) -> Self {
        self.fail_input = true;
        self
    }

    /// Queue the outcome returned by the next one-shot call.
    pub fn push_outcome(&self, outcome: ExecuteOutcome) {
        self.lock().outcomes.push_back(Ok(outcome));
    }

    /// Queue a fault for the next one-shot call.
    pub fn push_fault(&self, message: &str) {
        self.lock().outcomes.push_back(Err(message.to_owned()));
    }

    /// Make the next `collect_output` call fail with `message`.
    pub fn fail_next_collect(&self, message: &str) {
        self.lock().collect_fault = Some(message.to_owned());
    }

    pub fn push_output(&self, session_id: &str, text: &str) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.output.push_str(text);
        }
    }

    pub fn finish(&self, session_id: &str, exit_code: i32) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.running = false;
            session.exit_code = Some(exit_code);
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.lock().sessions.contains_key(session_id)
    }

    /// Number of answered status queries.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn collect_calls(&self) -> usize {
        self.collect_calls.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_outcome(&self, fallback: String) -> Result<ExecuteOutcome, BackendError> {
        match self.lock().outcomes.pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(BackendError::Other(message)),
            None => Ok(ExecuteOutcome::Success { output: fallback }),
        }
    }
}

impl TerminalBackend for MockBackend {
    fn execute_command<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<ExecuteOutcome, BackendError>> {
        Box::pin(async move {
            self.lock().calls.push(MockCall::Execute {
                command: command.to_owned(),
                args: args.to_vec(),
                options: options.clone(),
            });
            self.next_outcome(format!("{command} {}", args.join(" ")))
        })
    }

    fn run_script<'a>(
        &'a self,
        script: &'a str,
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<ExecuteOutcome, BackendError>> {
        Box::pin(async move {
            self.lock().calls.push(MockCall::Script {
                script: script.to_owned(),
                options: options.clone(),
            });
            self.next_outcome(script.to_owned())
        })
    }

    fn start_session<'a>(
        &'a self,
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<String, BackendError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("mock-{}", state.next_id);
            state.sessions.insert(
                id.clone(),
                MockSession {
                    output: String::new(),
                    running: true,
                    exit_code: None,
                    start_time: SystemTime::now(),
                },
            );
            state.calls.push(MockCall::Start {
                options: options.clone(),
            });
            Ok(id)
        })
    }

    fn send_input<'a>(
        &'a self,
        session_id: &'a str,
        input: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            if self.fail_input {
                return Err(BackendError::SessionClosed {
                    id: session_id.to_owned(),
                });
            }
            let mut state = self.lock();
            state.calls.push(MockCall::Input {
                session_id: session_id.to_owned(),
                input: input.to_owned(),
            });
            let echo = self.echo_input;
            let session =
                state
                    .sessions
                    .get_mut(session_id)
                    .ok_or_else(|| BackendError::SessionNotFound {
                        id: session_id.to_owned(),
                    })?;
            if echo {
                session.output.push_str(input);
                session.output.push('\n');
            }
            Ok(())
        })
    }

    fn collect_output<'a>(
        &'a self,
        session_id: &'a str,
        from_position: usize,
        _wait: &'a PollConfig,
    ) -> BoxFuture<'a, Result<InteractiveOutput, BackendError>> {
        Box::pin(async move {
            self.collect_calls.fetch_add(1, Ordering::Relaxed);
            let mut state = self.lock();
            if let Some(message) = state.collect_fault.take() {
                return Err(BackendError::Other(message));
            }
            let session =
                state
                    .sessions
                    .get(session_id)
                    .ok_or_else(|| BackendError::SessionNotFound {
                        id: session_id.to_owned(),
                    })?;
            let from = from_position.min(session.output.len());
            Ok(InteractiveOutput {
                output: session.output.get(from..).unwrap_or_default().to_owned(),
                new_position: session.output.len(),
                is_complete: !session.running,
                exit_code: session.exit_code,
            })
        })
    }

    fn terminate_session<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            if self.fail_terminate {
                return Err(BackendError::Other("terminate failed".into()));
            }
            let mut state = self.lock();
            state.calls.push(MockCall::Terminate {
                session_id: session_id.to_owned(),
            });
            state.sessions.remove(session_id);
            Ok(())
        })
    }

    fn session_status(&self, session_id: &str) -> Option<SessionStatus> {
        if !self.status_supported {
            return None;
        }
        let state = self.lock();
        let session = state.sessions.get(session_id)?;
        self.status_calls.fetch_add(1, Ordering::Relaxed);
        Some(SessionStatus {
            id: session_id.to_owned(),
            running: session.running,
            start_time: session.start_time,
            output_length: session.output.len(),
            exit_code: session.exit_code,
        })
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::None
    }
}

/// Host that answers approvals from a script and records every message.
#[derive(Debug, Default)]
pub struct MockHost {
    answers: Mutex<VecDeque<bool>>,
    selection: Mutex<Option<String>>,
    approvals: Mutex<Vec<ApprovalRequest>>,
    messages: Mutex<Vec<(MessageKind, String)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Error,
    Chat,
}

impl MockHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue approval answers. Once exhausted, the request's default (or `false`) is used.
    #[must_use]
    pub fn with_answers(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_selection(self, value: &str) -> Self {
        *self.selection.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.to_owned());
        self
    }

    #[must_use]
    pub fn approvals(&self) -> Vec<ApprovalRequest> {
        self.approvals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn messages(&self, kind: MessageKind) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn record(&self, kind: MessageKind, text: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, text.to_owned()));
    }
}

impl AgentHost for MockHost {
    fn ask_approval<'a>(&'a self, request: &'a ApprovalRequest) -> BoxFuture<'a, bool> {
        self.approvals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let answer = self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(request.default.unwrap_or(false));
        Box::pin(std::future::ready(answer))
    }

    fn select<'a>(
        &'a self,
        _prompt: &'a str,
        _options: &'a [SelectOption],
        _current: Option<&'a str>,
    ) -> BoxFuture<'a, Option<String>> {
        let choice = self
            .selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(std::future::ready(choice))
    }

    fn info_message(&self, text: &str) {
        self.record(MessageKind::Info, text);
    }

    fn error_message(&self, text: &str) {
        self.record(MessageKind::Error, text);
    }

    fn chat_output(&self, text: &str) {
        self.record(MessageKind::Chat, text);
    }
}
