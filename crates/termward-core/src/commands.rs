//! `/terminal` command router for the human operator. Commands here skip the
//! approval gate.

use crate::agent::{AgentContext, SelectOption};
use crate::error::Result;
use crate::service::TerminalService;
use crate::tools::format_session_table;

pub const HELP: &str = "\
/terminal [action] [subaction] - Manage terminal sessions

Session management:
  list                      List active terminal sessions
  start <command>           Start a new terminal session
  send <sessionId> <input>  Send input to a running session
  output <sessionId>        Show the complete output of a session
  stop <sessionId>          Terminate a session
  status                    Show terminal settings for this agent

Provider management:
  provider get              Show the active provider
  provider select           Pick the active provider interactively
  provider set <name>       Set the active provider by name
  provider list             List registered providers

Examples:
  /terminal start npm run dev
  /terminal send term-1 y
  /terminal stop term-1
  /terminal provider set local";

fn code_block(text: &str) -> String {
    format!("```\n{}\n```", text.trim_end_matches('\n'))
}

fn split_action(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((action, rest)) => (action, rest.trim()),
        None => (input, ""),
    }
}

/// Execute one `/terminal` invocation. `args` is everything after `/terminal`.
///
/// Usage mistakes are reported through the host; only operation failures are returned.
///
/// # Errors
///
/// Propagates service errors such as an unknown session id or a backend fault.
pub async fn execute(service: &TerminalService, agent: &AgentContext, args: &str) -> Result<()> {
    let host = agent.host();
    let (action, rest) = split_action(args);
    match action {
        "" | "help" => host.info_message(HELP),
        "list" => match format_session_table(service, agent) {
            Some(table) => host.info_message(&format!("Active Terminal Sessions:\n{table}")),
            None => host.info_message("No active terminal sessions."),
        },
        "status" => host.info_message(&agent.with_state(|s| s.show()).join("\n")),
        "start" => {
            if rest.is_empty() {
                host.error_message("Command cannot be empty");
                return Ok(());
            }
            let session_id = service.start_interactive_session(agent, rest).await?;
            let result = service.retrieve_session_output(agent, &session_id).await?;
            host.chat_output(&format!(
                "***Terminal session started***\n- Terminal Session Id: {session_id}\n\n{}",
                code_block(&result.output)
            ));
        }
        "send" => {
            let (session_id, input) = split_action(rest);
            if session_id.is_empty() || input.is_empty() {
                host.error_message("Usage: /terminal send <sessionId> <input>");
                return Ok(());
            }
            service.send_input_to_session(agent, session_id, input).await?;
            let result = service.retrieve_session_output(agent, session_id).await?;
            host.chat_output(&code_block(&result.output));
        }
        "output" => {
            if rest.is_empty() {
                host.error_message("Usage: /terminal output <sessionId>");
                return Ok(());
            }
            let output = service.complete_session_output(agent, rest).await?;
            host.chat_output(&code_block(&output));
        }
        "stop" => {
            if rest.is_empty() {
                host.error_message("Usage: /terminal stop <sessionId>");
                return Ok(());
            }
            service.terminate_session(agent, rest).await?;
            host.info_message(&format!("Terminal session {rest} terminated."));
        }
        "provider" => provider(service, agent, rest).await?,
        other => host.error_message(&format!(
            "Unknown /terminal action: {other}. Try /terminal help"
        )),
    }
    Ok(())
}

async fn provider(service: &TerminalService, agent: &AgentContext, args: &str) -> Result<()> {
    let host = agent.host();
    let (action, rest) = split_action(args);
    match action {
        "get" => {
            let name = agent.with_state(|s| s.provider_name.clone());
            host.info_message(&format!(
                "Current provider: {}",
                name.as_deref().unwrap_or("(none)")
            ));
        }
        "set" => {
            if rest.is_empty() {
                host.error_message("Usage: /terminal provider set <name>");
            } else if service.set_active_backend(agent, rest).is_ok() {
                host.info_message(&format!("Active provider set to: {rest}"));
            } else {
                host.error_message(&format!("Provider \"{rest}\" not found."));
            }
        }
        "list" => {
            let providers = service.available_providers();
            if providers.is_empty() {
                host.info_message("No terminal providers are registered.");
            } else {
                let lines: Vec<String> = providers.iter().map(|p| format!("- {p}")).collect();
                host.info_message(&format!(
                    "Available terminal providers:\n{}",
                    lines.join("\n")
                ));
            }
        }
        "select" => select_provider(service, agent).await?,
        _ => host.error_message("Usage: /terminal provider get|set <name>|select|list"),
    }
    Ok(())
}

async fn select_provider(service: &TerminalService, agent: &AgentContext) -> Result<()> {
    let host = agent.host();
    let providers = service.available_providers();
    match providers.as_slice() {
        [] => host.info_message("No terminal providers are registered."),
        [only] => {
            service.set_active_backend(agent, only)?;
            host.info_message(&format!(
                "Only one provider configured, auto-selecting: {only}"
            ));
        }
        _ => {
            let current = agent.with_state(|s| s.provider_name.clone());
            let options: Vec<SelectOption> = providers
                .iter()
                .map(|name| SelectOption {
                    label: if current.as_deref() == Some(name.as_str()) {
                        format!("{name} (current)")
                    } else {
                        name.clone()
                    },
                    value: name.clone(),
                })
                .collect();
            let choice = host
                .select(
                    "Select an active terminal provider",
                    &options,
                    current.as_deref(),
                )
                .await;
            match choice {
                Some(name) => {
                    service.set_active_backend(agent, &name)?;
                    host.info_message(&format!("Active provider set to: {name}"));
                }
                None => host.info_message("Provider selection cancelled."),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{AgentTerminalConfig, TerminalConfig};
    use crate::error::TerminalError;
    use crate::mock::{MessageKind, MockBackend, MockHost};

    fn setup(names: &[&str], host: Arc<MockHost>) -> (TerminalService, AgentContext, Arc<MockBackend>) {
        let mut config = TerminalConfig::default();
        config.agent_defaults.provider = names.first().map(|n| (*n).to_owned());
        let mut service = TerminalService::new(&config).unwrap();
        let backend = Arc::new(MockBackend::new().with_echo());
        for name in names {
            service.register_backend(*name, backend.clone());
        }
        let agent = AgentContext::new(service.attach(&AgentTerminalConfig::default()), host);
        (service, agent, backend)
    }

    #[test]
    fn split_action_trims() {
        assert_eq!(split_action("  send  term-1   y n "), ("send", "term-1   y n"));
        assert_eq!(split_action("list"), ("list", ""));
        assert_eq!(split_action(""), ("", ""));
    }

    #[tokio::test]
    async fn usage_errors_go_to_host() {
        let host = Arc::new(MockHost::new());
        let (service, agent, _) = setup(&["local"], host.clone());

        execute(&service, &agent, "start").await.unwrap();
        execute(&service, &agent, "send term-1").await.unwrap();
        execute(&service, &agent, "bogus").await.unwrap();

        let errors = host.messages(MessageKind::Error);
        assert_eq!(errors[0], "Command cannot be empty");
        assert_eq!(errors[1], "Usage: /terminal send <sessionId> <input>");
        assert!(errors[2].starts_with("Unknown /terminal action: bogus"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_send_output_stop() {
        let host = Arc::new(MockHost::new());
        let (service, agent, _) = setup(&["local"], host.clone());

        execute(&service, &agent, "start rm -rf build").await.unwrap();
        execute(&service, &agent, "send mock-1 y").await.unwrap();
        execute(&service, &agent, "output mock-1").await.unwrap();
        execute(&service, &agent, "list").await.unwrap();
        execute(&service, &agent, "stop mock-1").await.unwrap();

        let chat = host.messages(MessageKind::Chat);
        assert_eq!(
            chat[0],
            "***Terminal session started***\n- Terminal Session Id: mock-1\n\n```\nrm -rf build\n```"
        );
        assert_eq!(chat[1], "```\ny\n```");
        assert_eq!(chat[2], "```\nrm -rf build\ny\n```");

        let info = host.messages(MessageKind::Info);
        assert!(info[0].starts_with("Active Terminal Sessions:"));
        assert_eq!(info[1], "Terminal session mock-1 terminated.");
        assert!(host.approvals().is_empty());
    }

    #[tokio::test]
    async fn stop_unknown_session_errors() {
        let (service, agent, _) = setup(&["local"], Arc::new(MockHost::new()));
        let err = execute(&service, &agent, "stop ghost").await.unwrap_err();
        assert!(matches!(err, TerminalError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn provider_get_set_list() {
        let host = Arc::new(MockHost::new());
        let (service, agent, _) = setup(&["local", "docker"], host.clone());

        execute(&service, &agent, "provider get").await.unwrap();
        execute(&service, &agent, "provider set docker").await.unwrap();
        execute(&service, &agent, "provider set nope").await.unwrap();
        execute(&service, &agent, "provider list").await.unwrap();

        let info = host.messages(MessageKind::Info);
        assert_eq!(info[0], "Current provider: local");
        assert_eq!(info[1], "Active provider set to: docker");
        assert_eq!(info[2], "Available terminal providers:\n- docker\n- local");
        assert_eq!(
            host.messages(MessageKind::Error),
            vec!["Provider \"nope\" not found.".to_owned()]
        );
        assert_eq!(
            agent.with_state(|s| s.provider_name.clone()).as_deref(),
            Some("docker")
        );
    }

    #[tokio::test]
    async fn provider_select_single_auto() {
        let host = Arc::new(MockHost::new());
        let (service, agent, _) = setup(&["local"], host.clone());
        agent.mutate_state(|s| s.provider_name = None);

        execute(&service, &agent, "provider select").await.unwrap();
        assert_eq!(
            host.messages(MessageKind::Info),
            vec!["Only one provider configured, auto-selecting: local".to_owned()]
        );
        assert_eq!(
            agent.with_state(|s| s.provider_name.clone()).as_deref(),
            Some("local")
        );
    }

    #[tokio::test]
    async fn provider_select_many_asks_host() {
        let host = Arc::new(MockHost::new().with_selection("docker"));
        let (service, agent, _) = setup(&["local", "docker"], host.clone());

        execute(&service, &agent, "provider select").await.unwrap();
        assert_eq!(
            agent.with_state(|s| s.provider_name.clone()).as_deref(),
            Some("docker")
        );

        let cancelled = Arc::new(MockHost::new());
        let (service, agent, _) = setup(&["local", "docker"], cancelled.clone());
        execute(&service, &agent, "provider select").await.unwrap();
        assert_eq!(
            cancelled.messages(MessageKind::Info),
            vec!["Provider selection cancelled.".to_owned()]
        );
    }

    #[tokio::test]
    async fn help_and_status() {
        let host = Arc::new(MockHost::new());
        let (service, agent, _) = setup(&["local"], host.clone());
        execute(&service, &agent, "").await.unwrap();
        execute(&service, &agent, "status").await.unwrap();

        let info = host.messages(MessageKind::Info);
        assert_eq!(info[0], HELP);
        assert!(info[1].starts_with("Provider: local\n"));
        assert!(info[1].ends_with("Active Sessions: 0"));
    }
}
