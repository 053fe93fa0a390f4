//! Local process backend: one-shot commands through `<shell> -c`, interactive
//! sessions as long-lived piped shells.

mod process;
mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use termward_core::{
    BackendError, BoxFuture, ExecuteOptions, ExecuteOutcome, InteractiveOutput, IsolationLevel,
    PollConfig, SessionStatus, TerminalBackend,
};
use tokio::process::Command;

use crate::session::LocalSession;

fn default_shell() -> String {
    "bash".into()
}

/// `[providers.<name>]` table for a local backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalShellConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for LocalShellConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
        }
    }
}

impl LocalShellConfig {
    /// Parse a provider table; `None` yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Other`] if the table has the wrong shape.
    pub fn from_table(table: Option<&toml::Value>) -> Result<Self, BackendError> {
        match table {
            Some(value) => value
                .clone()
                .try_into()
                .map_err(|e| BackendError::Other(format!("invalid local provider config: {e}"))),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug)]
pub struct LocalShellBackend {
    shell: String,
    sessions: Mutex<HashMap<String, Arc<LocalSession>>>,
    next_id: AtomicU64,
}

impl Default for LocalShellBackend {
    fn default() -> Self {
        Self::new(&LocalShellConfig::default())
    }
}

impl LocalShellBackend {
    #[must_use]
    pub fn new(config: &LocalShellConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn session(&self, id: &str) -> Result<Arc<LocalSession>, BackendError> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::SessionNotFound { id: id.to_owned() })
    }
}

impl TerminalBackend for LocalShellBackend {
    fn execute_command<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<ExecuteOutcome, BackendError>> {
        Box::pin(async move {
            let mut cmd = Command::new(command);
            cmd.args(args);
            Ok(process::run_to_completion(cmd, options).await)
        })
    }

    fn run_script<'a>(
        &'a self,
        script: &'a str,
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<ExecuteOutcome, BackendError>> {
        Box::pin(async move {
            let mut cmd = Command::new(&self.shell);
            cmd.arg("-c").arg(script);
            Ok(process::run_to_completion(cmd, options).await)
        })
    }

    fn start_session<'a>(
        &'a self,
        options: &'a ExecuteOptions,
    ) -> BoxFuture<'a, Result<String, BackendError>> {
        Box::pin(async move {
            let id = format!("term-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            let session = LocalSession::spawn(id.clone(), &self.shell, options)?;
            self.sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.clone(), Arc::new(session));
            tracing::debug!(session = %id, shell = %self.shell, "local session spawned");
            Ok(id)
        })
    }

    fn send_input<'a>(
        &'a self,
        session_id: &'a str,
        input: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move { self.session(session_id)?.write(input).await })
    }

    fn collect_output<'a>(
        &'a self,
        session_id: &'a str,
        from_position: usize,
        _wait: &'a PollConfig,
    ) -> BoxFuture<'a, Result<InteractiveOutput, BackendError>> {
        Box::pin(async move { Ok(self.session(session_id)?.read_from(from_position)) })
    }

    fn terminate_session<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let session = self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(session_id)
                .ok_or_else(|| BackendError::SessionNotFound {
                    id: session_id.to_owned(),
                })?;
            session.kill();
            Ok(())
        })
    }

    fn session_status(&self, session_id: &str) -> Option<SessionStatus> {
        self.session(session_id).ok().map(|s| s.status())
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::None
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn wait_for(backend: &LocalShellBackend, id: &str, needle: &str) -> InteractiveOutput {
        let poll = PollConfig::default();
        for _ in 0..100 {
            let out = backend.collect_output(id, 0, &poll).await.unwrap();
            if out.output.contains(needle) {
                return out;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {needle:?}");
    }

    fn opts() -> ExecuteOptions {
        ExecuteOptions::default().with_timeout(10)
    }

    #[test]
    fn config_from_table() {
        let table: toml::Value = toml::from_str("type = \"local\"\nshell = \"sh\"").unwrap();
        let config = LocalShellConfig::from_table(Some(&table)).unwrap();
        assert_eq!(config.shell, "sh");
        assert_eq!(LocalShellConfig::from_table(None).unwrap().shell, "bash");

        let bad: toml::Value = toml::from_str("shell = 3").unwrap();
        assert!(LocalShellConfig::from_table(Some(&bad)).is_err());
    }

    #[tokio::test]
    async fn script_success_combines_streams() {
        let backend = LocalShellBackend::default();
        let outcome = backend
            .run_script("echo out; echo err 1>&2", &opts())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(outcome.output().contains("out\n"));
        assert!(outcome.output().contains("err\n"));
    }

    #[tokio::test]
    async fn script_bad_exit_code() {
        let backend = LocalShellBackend::default();
        let outcome = backend.run_script("echo oops; exit 3", &opts()).await.unwrap();
        assert_eq!(
            outcome,
            ExecuteOutcome::BadExitCode {
                output: "oops\n".into(),
                exit_code: 3
            }
        );
    }

    #[tokio::test]
    async fn script_timeout() {
        let backend = LocalShellBackend::default();
        let outcome = backend
            .run_script("sleep 5", &ExecuteOptions::default().with_timeout(1))
            .await
            .unwrap();
        assert_eq!(outcome, ExecuteOutcome::Timeout);
    }

    #[tokio::test]
    async fn spawn_failure_is_unknown_error() {
        let backend = LocalShellBackend::default();
        let outcome = backend
            .execute_command("nonexistent-command-xyz", &[], &opts())
            .await
            .unwrap();
        assert!(matches!(outcome, ExecuteOutcome::UnknownError { .. }));
    }

    #[tokio::test]
    async fn execute_with_args_stdin_env_and_dir() {
        let backend = LocalShellBackend::default();
        let dir = tempfile::tempdir().unwrap();

        let echoed = backend
            .execute_command("echo", &["a".to_owned(), "b".to_owned()], &opts())
            .await
            .unwrap();
        assert_eq!(echoed.output(), "a b\n");

        let mut options = opts();
        options.input = Some("from stdin\n".into());
        let piped = backend.execute_command("cat", &[], &options).await.unwrap();
        assert_eq!(piped.output(), "from stdin\n");

        let mut options = opts();
        options.env.insert("TERMWARD_TEST_VAR".into(), Some("set".into()));
        options.env.insert("HOME".into(), None);
        options.working_directory = Some(dir.path().to_path_buf());
        let out = backend
            .run_script("echo \"$TERMWARD_TEST_VAR:${HOME:-unset}\"; pwd", &options)
            .await
            .unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(out.output().starts_with("set:unset\n"));
        assert!(out.output().contains(canonical.to_str().unwrap()));
    }

    #[tokio::test]
    async fn script_output_survives_invalid_utf8() {
        let backend = LocalShellBackend::default();
        let outcome = backend
            .run_script("printf 'x\\377y\\n'; echo after", &opts())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecuteOutcome::Success {
                output: "x\u{fffd}y\nafter\n".into()
            }
        );
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_stall_the_pipe() {
        let backend = LocalShellBackend::default();
        let outcome = backend
            .run_script("printf '\\377\\n'; seq 1 200000", &opts())
            .await
            .unwrap();
        assert!(outcome.is_success(), "{outcome:?}");
        assert!(outcome.output().ends_with("\n200000\n"));
    }

    #[tokio::test]
    async fn session_keeps_multibyte_character_at_read_boundary() {
        let backend = LocalShellBackend::default();
        let id = backend.start_session(&opts()).await.unwrap();
        backend
            .send_input(&id, "s=$(printf '%4095s' '' | tr ' ' a); printf '%s\\303\\251\\n' \"$s\"")
            .await
            .unwrap();
        let out = wait_for(&backend, &id, "\n").await;

        let expected = format!("{}\u{e9}\n", "a".repeat(4095));
        assert_eq!(out.output, expected);
        assert_eq!(out.new_position, 4098);
        assert_eq!(backend.session_status(&id).unwrap().output_length, 4098);
        backend.terminate_session(&id).await.unwrap();
    }

    #[tokio::test]
    async fn interactive_session_roundtrip() {
        let backend = LocalShellBackend::default();
        let id = backend.start_session(&opts()).await.unwrap();
        assert!(id.starts_with("term-"));

        backend.send_input(&id, "echo first").await.unwrap();
        let out = wait_for(&backend, &id, "first\n").await;
        assert_eq!(out.output, "first\n");
        assert!(!out.is_complete);

        backend.send_input(&id, "echo second\n").await.unwrap();
        wait_for(&backend, &id, "second\n").await;
        let tail = backend
            .collect_output(&id, out.new_position, &PollConfig::default())
            .await
            .unwrap();
        assert_eq!(tail.output, "second\n");

        let status = backend.session_status(&id).unwrap();
        assert!(status.running);
        assert_eq!(status.output_length, tail.new_position);

        backend.terminate_session(&id).await.unwrap();
        assert!(backend.session_status(&id).is_none());
        assert!(matches!(
            backend.send_input(&id, "ls").await,
            Err(BackendError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn session_exit_code_recorded() {
        let backend = LocalShellBackend::default();
        let id = backend.start_session(&opts()).await.unwrap();
        backend.send_input(&id, "exit 4").await.unwrap();

        for _ in 0..100 {
            if backend.session_status(&id).is_some_and(|s| !s.running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let status = backend.session_status(&id).unwrap();
        assert!(!status.running);
        assert_eq!(status.exit_code, Some(4));
        assert!(matches!(
            backend.send_input(&id, "ls").await,
            Err(BackendError::SessionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let backend = LocalShellBackend::default();
        let a = backend.start_session(&opts()).await.unwrap();
        let b = backend.start_session(&opts()).await.unwrap();
        assert_ne!(a, b);
        backend.terminate_session(&a).await.unwrap();
        backend.terminate_session(&b).await.unwrap();
        assert!(backend.terminate_session(&a).await.is_err());
    }
}
