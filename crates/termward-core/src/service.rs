//! Terminal orchestration: provider selection, one-shot execution and the
//! interactive session lifecycle.

use std::sync::Arc;

use crate::agent::AgentContext;
use crate::backend::{ExecuteOptions, ExecuteOutcome, InteractiveOutput, TerminalBackend};
use crate::collector::OutputCollector;
use crate::config::{AgentDefaults, AgentTerminalConfig, TerminalConfig};
use crate::error::{Result, TerminalError};
use crate::registry::BackendRegistry;
use crate::safety::{CommandClassifier, SafetyLevel};
use crate::session::SessionRecord;
use crate::state::TerminalState;

/// Timeout applied to one-shot calls that do not carry one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

pub const TRUNCATION_MARKER: &str = "\n[...Output truncated...]";

/// Keep the first `limit` characters of `output`, appending [`TRUNCATION_MARKER`] when anything was cut.
#[must_use]
pub fn crop_output(output: &str, limit: usize) -> String {
    match output.char_indices().nth(limit) {
        Some((byte_idx, _)) => {
            let mut cropped = output[..byte_idx].to_owned();
            cropped.push_str(TRUNCATION_MARKER);
            cropped
        }
        None => output.to_owned(),
    }
}

#[derive(Debug)]
pub struct TerminalService {
    backends: BackendRegistry,
    classifier: CommandClassifier,
    defaults: AgentDefaults,
    collector: OutputCollector,
}

impl TerminalService {
    /// # Errors
    ///
    /// Returns [`TerminalError::InvalidPattern`] if a dangerous pattern does not compile.
    pub fn new(config: &TerminalConfig) -> Result<Self> {
        Ok(Self {
            backends: BackendRegistry::new(),
            classifier: CommandClassifier::new(&config.dangerous_commands, &config.safe_commands)?,
            defaults: config.agent_defaults.clone(),
            collector: OutputCollector::default(),
        })
    }

    #[must_use]
    pub fn with_collector(mut self, collector: OutputCollector) -> Self {
        self.collector = collector;
        self
    }

    pub fn register_backend(&mut self, name: impl Into<String>, backend: Arc<dyn TerminalBackend>) {
        self.backends.register(name, backend);
    }

    /// Check that the configured default provider is registered.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::ProviderNotFound`] if it is not.
    pub fn run(&self) -> Result<()> {
        match &self.defaults.provider {
            Some(name) => {
                let backend = self.backends.require(name)?;
                tracing::info!(provider = %name, isolation = %backend.isolation_level(), "terminal service ready");
            }
            None => tracing::warn!("no default terminal provider configured"),
        }
        Ok(())
    }

    /// Build the initial state for an agent from the defaults and its own overrides.
    #[must_use]
    pub fn attach(&self, overrides: &AgentTerminalConfig) -> TerminalState {
        TerminalState::new(&self.defaults.merged(overrides))
    }

    #[must_use]
    pub fn available_providers(&self) -> Vec<String> {
        self.backends.names()
    }

    /// # Errors
    ///
    /// [`TerminalError::NoProviderConfigured`] when the agent has no provider selected,
    /// [`TerminalError::ProviderNotFound`] when the selected one is not registered.
    pub fn require_active_backend(&self, agent: &AgentContext) -> Result<Arc<dyn TerminalBackend>> {
        let name = agent
            .with_state(|s| s.provider_name.clone())
            .ok_or(TerminalError::NoProviderConfigured)?;
        self.backends.require(&name)
    }

    /// # Errors
    ///
    /// Returns [`TerminalError::ProviderNotFound`] and leaves the state untouched if
    /// `name` is not registered.
    pub fn set_active_backend(&self, agent: &AgentContext, name: &str) -> Result<()> {
        self.backends.require(name)?;
        agent.mutate_state(|s| s.provider_name = Some(name.to_owned()));
        tracing::info!(provider = name, "active terminal provider changed");
        Ok(())
    }

    #[must_use]
    pub fn command_safety_level(&self, command_line: &str) -> SafetyLevel {
        self.classifier.classify(command_line)
    }

    /// Run a command once on the active backend. Failed commands come back as outcomes.
    ///
    /// # Errors
    ///
    /// Provider resolution errors, or a backend fault.
    pub async fn execute_command(
        &self,
        agent: &AgentContext,
        command: &str,
        args: &[String],
        options: ExecuteOptions,
    ) -> Result<ExecuteOutcome> {
        let backend = self.require_active_backend(agent)?;
        let options = with_default_timeout(options);
        let outcome = backend.execute_command(command, args, &options).await?;
        tracing::debug!(command, success = outcome.is_success(), "command finished");
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Provider resolution errors, or a backend fault.
    pub async fn run_script(
        &self,
        agent: &AgentContext,
        script: &str,
        options: ExecuteOptions,
    ) -> Result<ExecuteOutcome> {
        let backend = self.require_active_backend(agent)?;
        let options = with_default_timeout(options);
        let outcome = backend.run_script(script, &options).await?;
        tracing::debug!(success = outcome.is_success(), "script finished");
        Ok(outcome)
    }

    /// Start a session, send `command` as its first input and register it.
    ///
    /// # Errors
    ///
    /// Provider resolution errors, or a backend fault while starting or sending input.
    /// A session whose first input cannot be delivered is terminated and not registered.
    pub async fn start_interactive_session(&self, agent: &AgentContext, command: &str) -> Result<String> {
        let backend = self.require_active_backend(agent)?;
        let options = ExecuteOptions::default().with_timeout(0);
        let session_id = backend.start_session(&options).await?;

        if let Err(e) = backend.send_input(&session_id, command).await {
            tracing::warn!(session = %session_id, "failed to send initial command: {e}");
            if let Err(term_err) = backend.terminate_session(&session_id).await {
                tracing::warn!(session = %session_id, "failed to clean up session: {term_err}");
            }
            return Err(e.into());
        }

        agent.mutate_state(|s| s.sessions.register(session_id.clone(), command));
        tracing::info!(session = %session_id, command, "interactive session started");
        Ok(session_id)
    }

    /// # Errors
    ///
    /// [`TerminalError::SessionNotFound`] for unregistered ids, or a backend fault.
    pub async fn send_input_to_session(&self, agent: &AgentContext, session_id: &str, input: &str) -> Result<()> {
        require_session(agent, session_id)?;
        let backend = self.require_active_backend(agent)?;
        backend.send_input(session_id, input).await?;
        Ok(())
    }

    /// Collect output produced since the last retrieval and advance the cursor.
    ///
    /// The returned output is cropped to the agent's `crop_output` limit.
    ///
    /// # Errors
    ///
    /// [`TerminalError::SessionNotFound`] for unregistered ids, or a backend fault.
    /// The cursor is left unchanged on error.
    pub async fn retrieve_session_output(
        &self,
        agent: &AgentContext,
        session_id: &str,
    ) -> Result<InteractiveOutput> {
        let record = require_session(agent, session_id)?;
        let backend = self.require_active_backend(agent)?;
        let (poll, crop) = agent.with_state(|s| (s.interactive, s.bash.crop_output));

        let mut result = self
            .collector
            .collect(backend.as_ref(), session_id, record.last_position, &poll)
            .await?;

        agent.mutate_state(|s| s.sessions.update_position(session_id, result.new_position));
        result.output = crop_output(&result.output, crop);
        Ok(result)
    }

    /// Everything the session has printed so far, uncropped. Does not move the cursor.
    ///
    /// # Errors
    ///
    /// [`TerminalError::SessionNotFound`] for unregistered ids, or a backend fault.
    pub async fn complete_session_output(&self, agent: &AgentContext, session_id: &str) -> Result<String> {
        require_session(agent, session_id)?;
        let backend = self.require_active_backend(agent)?;
        let poll = agent.with_state(|s| s.interactive);
        let result = backend.collect_output(session_id, 0, &poll).await?;
        Ok(result.output)
    }

    /// Terminate on the backend, then forget the session.
    ///
    /// # Errors
    ///
    /// [`TerminalError::SessionNotFound`] for unregistered ids. If the backend fails,
    /// the error is returned and the record is kept.
    pub async fn terminate_session(&self, agent: &AgentContext, session_id: &str) -> Result<()> {
        require_session(agent, session_id)?;
        let backend = self.require_active_backend(agent)?;
        backend.terminate_session(session_id).await?;
        agent.mutate_state(|s| s.sessions.remove(session_id));
        tracing::info!(session = session_id, "interactive session terminated");
        Ok(())
    }

    #[must_use]
    pub fn list_sessions(&self, agent: &AgentContext) -> Vec<SessionRecord> {
        agent.with_state(|s| s.sessions.list())
    }
}

fn with_default_timeout(mut options: ExecuteOptions) -> ExecuteOptions {
    options.timeout_seconds.get_or_insert(DEFAULT_TIMEOUT_SECONDS);
    options
}

fn require_session(agent: &AgentContext, session_id: &str) -> Result<SessionRecord> {
    agent
        .with_state(|s| s.sessions.get(session_id).cloned())
        .ok_or_else(|| TerminalError::SessionNotFound {
            id: session_id.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExecuteOptions;
    use crate::config::BashOverrides;
    use crate::error::BackendError;
    use crate::mock::{MockBackend, MockCall, MockHost};

    fn config() -> TerminalConfig {
        let mut config = TerminalConfig::default();
        config.agent_defaults.provider = Some("mock".into());
        config
    }

    fn setup(backend: Arc<MockBackend>) -> (TerminalService, AgentContext) {
        let mut service = TerminalService::new(&config()).unwrap();
        service.register_backend("mock", backend);
        let state = service.attach(&AgentTerminalConfig::default());
        let agent = AgentContext::new(state, Arc::new(MockHost::new()));
        (service, agent)
    }

    #[test]
    fn crop_output_short_unchanged() {
        assert_eq!(crop_output("hello", 5), "hello");
        assert_eq!(crop_output("hi", 5), "hi");
        assert_eq!(crop_output("", 0), "");
    }

    #[test]
    fn crop_output_long_truncated() {
        let out = crop_output("abcdefgh", 3);
        assert_eq!(out, format!("abc{TRUNCATION_MARKER}"));
    }

    #[test]
    fn crop_output_counts_chars() {
        let out = crop_output("ééééé", 2);
        assert_eq!(out, format!("éé{TRUNCATION_MARKER}"));
    }

    #[test]
    fn run_requires_registered_default() {
        let service = TerminalService::new(&config()).unwrap();
        assert!(matches!(
            service.run(),
            Err(TerminalError::ProviderNotFound { .. })
        ));

        let (service, _) = setup(Arc::new(MockBackend::new()));
        assert!(service.run().is_ok());
    }

    #[test]
    fn new_rejects_bad_pattern() {
        let mut config = config();
        config.dangerous_commands = vec!["(".into()];
        assert!(matches!(
            TerminalService::new(&config),
            Err(TerminalError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn attach_merges_overrides() {
        let (service, _) = setup(Arc::new(MockBackend::new()));
        let state = service.attach(&AgentTerminalConfig {
            bash: Some(BashOverrides {
                crop_output: Some(5),
                timeout_seconds: None,
            }),
            ..AgentTerminalConfig::default()
        });
        assert_eq!(state.bash.crop_output, 5);
        assert_eq!(state.bash.timeout_seconds, 60);
        assert_eq!(state.provider_name.as_deref(), Some("mock"));
    }

    #[tokio::test]
    async fn no_provider_configured() {
        let (service, agent) = setup(Arc::new(MockBackend::new()));
        agent.mutate_state(|s| s.provider_name = None);
        let err = service
            .run_script(&agent, "ls", ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::NoProviderConfigured));
    }

    #[test]
    fn set_active_backend_requires_registration() {
        let (service, agent) = setup(Arc::new(MockBackend::new()));
        let err = service.set_active_backend(&agent, "docker").unwrap_err();
        assert!(matches!(err, TerminalError::ProviderNotFound { .. }));
        assert_eq!(
            agent.with_state(|s| s.provider_name.clone()).as_deref(),
            Some("mock")
        );
        assert!(service.set_active_backend(&agent, "mock").is_ok());
    }

    #[tokio::test]
    async fn one_shot_gets_default_timeout() {
        let backend = Arc::new(MockBackend::new());
        let (service, agent) = setup(backend.clone());

        service
            .execute_command(&agent, "ls", &["-la".to_owned()], ExecuteOptions::default())
            .await
            .unwrap();
        service
            .run_script(&agent, "echo hi", ExecuteOptions::default().with_timeout(5))
            .await
            .unwrap();

        let calls = backend.calls();
        assert!(matches!(
            &calls[0],
            MockCall::Execute { options, .. } if options.timeout_seconds == Some(DEFAULT_TIMEOUT_SECONDS)
        ));
        assert!(matches!(
            &calls[1],
            MockCall::Script { options, .. } if options.timeout_seconds == Some(5)
        ));
    }

    #[tokio::test]
    async fn outcomes_and_faults_pass_through() {
        let backend = Arc::new(MockBackend::new());
        let (service, agent) = setup(backend.clone());

        backend.push_outcome(ExecuteOutcome::BadExitCode {
            output: "nope".into(),
            exit_code: 2,
        });
        let outcome = service
            .run_script(&agent, "false", ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.exit_code(), Some(2));

        backend.push_outcome(ExecuteOutcome::Timeout);
        let outcome = service
            .run_script(&agent, "sleep 999", ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, ExecuteOutcome::Timeout);

        backend.push_fault("socket closed");
        let err = service
            .run_script(&agent, "ls", ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::Backend(BackendError::Other(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn session_lifecycle() {
        let backend = Arc::new(MockBackend::new().with_echo());
        let (service, agent) = setup(backend.clone());

        let id = service
            .start_interactive_session(&agent, "echo hi")
            .await
            .unwrap();
        let record = service.list_sessions(&agent).remove(0);
        assert_eq!(record.id, id);
        assert_eq!(record.command, "echo hi");
        assert_eq!(record.last_position, 0);
        assert!(backend.calls().iter().any(|c| matches!(
            c,
            MockCall::Start { options } if options.timeout_seconds == Some(0)
        )));

        let first = service.retrieve_session_output(&agent, &id).await.unwrap();
        assert_eq!(first.output, "echo hi\n");
        assert_eq!(first.new_position, 8);
        assert_eq!(service.list_sessions(&agent)[0].last_position, 8);

        service
            .send_input_to_session(&agent, &id, "pwd")
            .await
            .unwrap();
        let second = service.retrieve_session_output(&agent, &id).await.unwrap();
        assert_eq!(second.output, "pwd\n");
        assert_eq!(second.new_position, 12);

        let full = service.complete_session_output(&agent, &id).await.unwrap();
        assert_eq!(full, "echo hi\npwd\n");
        assert_eq!(service.list_sessions(&agent)[0].last_position, 12);

        service.terminate_session(&agent, &id).await.unwrap();
        assert!(service.list_sessions(&agent).is_empty());
        assert!(!backend.has_session(&id));

        let err = service
            .retrieve_session_output(&agent, &id)
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::SessionNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn complete_output_is_repeatable() {
        let backend = Arc::new(MockBackend::new().with_echo());
        let (service, agent) = setup(backend.clone());
        let id = service
            .start_interactive_session(&agent, "make")
            .await
            .unwrap();

        let a = service.complete_session_output(&agent, &id).await.unwrap();
        let b = service.complete_session_output(&agent, &id).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(service.list_sessions(&agent)[0].last_position, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retrieve_without_new_output_is_empty() {
        let backend = Arc::new(MockBackend::new().with_echo());
        let (service, agent) = setup(backend.clone());
        let id = service
            .start_interactive_session(&agent, "make")
            .await
            .unwrap();

        let first = service.retrieve_session_output(&agent, &id).await.unwrap();
        let again = service.retrieve_session_output(&agent, &id).await.unwrap();
        assert_eq!(first.output, "make\n");
        assert_eq!(again.output, "");
        assert_eq!(again.new_position, first.new_position);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_collect_keeps_cursor() {
        let backend = Arc::new(MockBackend::new().with_echo());
        let (service, agent) = setup(backend.clone());
        let id = service
            .start_interactive_session(&agent, "tail -f log")
            .await
            .unwrap();

        let first = service.retrieve_session_output(&agent, &id).await.unwrap();
        assert_eq!(first.new_position, 12);

        backend.push_output(&id, "more\n");
        backend.fail_next_collect("pipe closed");
        let err = service
            .retrieve_session_output(&agent, &id)
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::Backend(BackendError::Other(m)) if m == "pipe closed"));
        assert_eq!(service.list_sessions(&agent)[0].last_position, 12);

        let next = service.retrieve_session_output(&agent, &id).await.unwrap();
        assert_eq!(next.output, "more\n");
        assert_eq!(service.list_sessions(&agent)[0].last_position, 17);
    }

    #[tokio::test(start_paused = true)]
    async fn retrieved_output_is_cropped() {
        let backend = Arc::new(MockBackend::new());
        let (service, agent) = setup(backend.clone());
        agent.mutate_state(|s| s.bash.crop_output = 4);

        let id = service
            .start_interactive_session(&agent, "cat big")
            .await
            .unwrap();
        backend.push_output(&id, "0123456789");

        let out = service.retrieve_session_output(&agent, &id).await.unwrap();
        assert_eq!(out.output, format!("0123{TRUNCATION_MARKER}"));
        assert_eq!(out.new_position, 10);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let (service, agent) = setup(Arc::new(MockBackend::new()));
        let err = service
            .send_input_to_session(&agent, "ghost", "ls")
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::SessionNotFound { id } if id == "ghost"));
        assert!(service.terminate_session(&agent, "ghost").await.is_err());
    }

    #[tokio::test]
    async fn failed_terminate_keeps_record() {
        let backend = Arc::new(MockBackend::new().failing_terminate());
        let (service, agent) = setup(backend);
        let id = service
            .start_interactive_session(&agent, "top")
            .await
            .unwrap();

        assert!(service.terminate_session(&agent, &id).await.is_err());
        assert_eq!(service.list_sessions(&agent).len(), 1);
    }

    #[tokio::test]
    async fn failed_initial_input_is_not_registered() {
        let backend = Arc::new(MockBackend::new().failing_input());
        let (service, agent) = setup(backend.clone());

        let err = service
            .start_interactive_session(&agent, "top")
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::Backend(BackendError::SessionClosed { .. })));
        assert!(service.list_sessions(&agent).is_empty());
        assert!(!backend.has_session("mock-1"));
    }

    #[test]
    fn safety_level_uses_configured_rules() {
        let (service, _) = setup(Arc::new(MockBackend::new()));
        assert_eq!(service.command_safety_level("ls -la"), SafetyLevel::Safe);
        assert_eq!(service.command_safety_level("curl x"), SafetyLevel::Unknown);
        assert_eq!(service.command_safety_level("sudo ls"), SafetyLevel::Dangerous);
    }
}
