//! Agent-facing terminal tools. Every tool that runs a command goes through the
//! approval gate first.

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::agent::{AgentContext, ApprovalRequest};
use crate::backend::{ExecuteOptions, ExecuteOutcome};
use crate::error::{Result, TerminalError};
use crate::safety::SafetyLevel;
use crate::service::{TerminalService, crop_output};

/// How long an `unknown` command confirmation waits before accepting.
const UNKNOWN_APPROVAL_TIMEOUT: Duration = Duration::from_secs(10);

const LIST_COMMAND_WIDTH: usize = 30;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BashParams {
    /// The shell command to execute.
    pub command: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartParams {
    /// Initial shell command to execute, passed to the terminal via stdin.
    pub command: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContinueParams {
    /// The terminal session ID.
    pub session_id: String,
    /// Input to send to the terminal.
    #[serde(default)]
    pub stdin: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// The terminal session ID.
    pub session_id: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListParams {}

#[derive(Debug, Clone)]
pub struct ToolDef {
    pub id: &'static str,
    pub description: &'static str,
    pub schema: schemars::Schema,
}

/// Structured tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_id: String,
    pub params: HashMap<String, serde_json::Value>,
}

#[must_use]
pub fn tool_definitions() -> Vec<ToolDef> {
    vec![
        ToolDef {
            id: "bash",
            description: "Run a shell command. Output is truncated to reasonable size. Not sandboxed.",
            schema: schemars::schema_for!(BashParams),
        },
        ToolDef {
            id: "terminal_start",
            description: "Start a new interactive terminal session and execute an initial command. \
                          Reuse sessions with terminal_continue for follow-up commands.",
            schema: schemars::schema_for!(StartParams),
        },
        ToolDef {
            id: "terminal_continue",
            description: "Continue an existing terminal session, optionally sending input first.",
            schema: schemars::schema_for!(ContinueParams),
        },
        ToolDef {
            id: "terminal_output",
            description: "Get the complete, untruncated output of an existing terminal session.",
            schema: schemars::schema_for!(SessionParams),
        },
        ToolDef {
            id: "terminal_stop",
            description: "Terminate a terminal session.",
            schema: schemars::schema_for!(SessionParams),
        },
        ToolDef {
            id: "terminal_list",
            description: "List all active terminal sessions.",
            schema: schemars::schema_for!(ListParams),
        },
    ]
}

/// Deserialize tool call params into a typed struct.
///
/// # Errors
///
/// Returns [`TerminalError::InvalidParams`] when deserialization fails.
pub fn deserialize_params<T: serde::de::DeserializeOwned, S: std::hash::BuildHasher>(
    params: &HashMap<String, serde_json::Value, S>,
) -> Result<T> {
    let obj =
        serde_json::Value::Object(params.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    serde_json::from_value(obj).map_err(|e| TerminalError::InvalidParams {
        message: e.to_string(),
    })
}

/// Route a structured call to its tool.
///
/// # Errors
///
/// [`TerminalError::UnknownTool`], [`TerminalError::InvalidParams`], or whatever the tool returns.
pub async fn dispatch(service: &TerminalService, agent: &AgentContext, call: &ToolCall) -> Result<String> {
    match call.tool_id.as_str() {
        "bash" => {
            let p: BashParams = deserialize_params(&call.params)?;
            bash(service, agent, &p.command).await
        }
        "terminal_start" => {
            let p: StartParams = deserialize_params(&call.params)?;
            terminal_start(service, agent, &p.command).await
        }
        "terminal_continue" => {
            let p: ContinueParams = deserialize_params(&call.params)?;
            terminal_continue(service, agent, &p.session_id, p.stdin.as_deref()).await
        }
        "terminal_output" => {
            let p: SessionParams = deserialize_params(&call.params)?;
            terminal_output(service, agent, &p.session_id).await
        }
        "terminal_stop" => {
            let p: SessionParams = deserialize_params(&call.params)?;
            terminal_stop(service, agent, &p.session_id).await
        }
        "terminal_list" => Ok(terminal_list(service, agent)),
        other => Err(TerminalError::UnknownTool { id: other.to_owned() }),
    }
}

/// Ask the operator before running anything not known to be safe.
///
/// # Errors
///
/// Returns [`TerminalError::NotApproved`] when the operator declines.
pub async fn approve_command(service: &TerminalService, agent: &AgentContext, command: &str) -> Result<()> {
    let request = match service.command_safety_level(command) {
        SafetyLevel::Safe => return Ok(()),
        SafetyLevel::Unknown => {
            ApprovalRequest::new(format!("Execute potentially unsafe command: {command}?"))
                .with_default(true)
                .with_timeout(UNKNOWN_APPROVAL_TIMEOUT)
        }
        SafetyLevel::Dangerous => {
            ApprovalRequest::new(format!("Execute potentially dangerous command: {command}?"))
        }
    };

    if agent.host().ask_approval(&request).await {
        Ok(())
    } else {
        tracing::warn!(command, "command execution not approved");
        Err(TerminalError::NotApproved {
            command: command.to_owned(),
        })
    }
}

/// Run `command` once with the agent's bash settings.
///
/// # Errors
///
/// [`TerminalError::EmptyCommand`], [`TerminalError::NotApproved`], provider errors
/// or backend faults. Failed commands are rendered, not returned as errors.
pub async fn bash(service: &TerminalService, agent: &AgentContext, command: &str) -> Result<String> {
    let command = command.trim();
    if command.is_empty() {
        return Err(TerminalError::EmptyCommand);
    }
    agent
        .host()
        .info_message(&format!("[bash] Running shell command: {command}"));

    approve_command(service, agent, command).await?;

    let bash = agent.with_state(|s| s.bash);
    let options = ExecuteOptions::default().with_timeout(bash.timeout_seconds);
    let outcome = service.run_script(agent, command, options).await?;
    Ok(render_outcome(command, &outcome, bash.crop_output))
}

fn render_outcome(command: &str, outcome: &ExecuteOutcome, crop: usize) -> String {
    let output = match outcome {
        ExecuteOutcome::Success { output } | ExecuteOutcome::BadExitCode { output, .. } => {
            crop_output(output, crop)
        }
        ExecuteOutcome::Timeout => "Command timed out".to_owned(),
        ExecuteOutcome::UnknownError { error } => format!("Error: {error}"),
    };
    let exit_code = outcome
        .exit_code()
        .map_or_else(|| "none".to_owned(), |c| c.to_string());
    let success = if outcome.is_success() { "True" } else { "False" };
    format!("[{command}]\nSuccess: {success}\nExit Code: {exit_code}\n\nOutput:\n{output}")
}

/// # Errors
///
/// [`TerminalError::EmptyCommand`], [`TerminalError::NotApproved`], provider errors
/// or backend faults.
pub async fn terminal_start(service: &TerminalService, agent: &AgentContext, command: &str) -> Result<String> {
    let command = command.trim();
    if command.is_empty() {
        return Err(TerminalError::EmptyCommand);
    }
    approve_command(service, agent, command).await?;

    let session_id = service.start_interactive_session(agent, command).await?;
    let result = service.retrieve_session_output(agent, &session_id).await?;
    Ok(format!(
        "Terminal Session Started\nTerminal Id: {session_id}\nSent Command: {command}\n\nOutput:\n{}",
        result.output
    ))
}

/// # Errors
///
/// [`TerminalError::SessionNotFound`] or backend faults.
pub async fn terminal_continue(
    service: &TerminalService,
    agent: &AgentContext,
    session_id: &str,
    stdin: Option<&str>,
) -> Result<String> {
    if let Some(input) = stdin.filter(|s| !s.is_empty()) {
        service.send_input_to_session(agent, session_id, input).await?;
    }
    let result = service.retrieve_session_output(agent, session_id).await?;
    let mut out = format!("Terminal Session: {session_id}\n\nOutput:\n{}", result.output);
    if result.is_complete {
        let code = result
            .exit_code
            .map_or_else(|| "unknown".to_owned(), |c| c.to_string());
        let _ = write!(out, "\n\nSession exited with code {code}");
    }
    Ok(out)
}

/// # Errors
///
/// [`TerminalError::SessionNotFound`] or backend faults.
pub async fn terminal_output(service: &TerminalService, agent: &AgentContext, session_id: &str) -> Result<String> {
    let output = service.complete_session_output(agent, session_id).await?;
    Ok(format!("Terminal Session: {session_id}\nComplete Output:\n{output}"))
}

/// # Errors
///
/// [`TerminalError::SessionNotFound`] or a backend fault; the session stays registered then.
pub async fn terminal_stop(service: &TerminalService, agent: &AgentContext, session_id: &str) -> Result<String> {
    service.terminate_session(agent, session_id).await?;
    Ok(format!("Terminal session {session_id} terminated."))
}

#[must_use]
pub fn terminal_list(service: &TerminalService, agent: &AgentContext) -> String {
    match format_session_table(service, agent) {
        Some(table) => format!("Active Terminal Sessions:\n{table}"),
        None => "No active terminal sessions.".to_owned(),
    }
}

/// Session table shared with the `/terminal list` command. `None` when there are no sessions.
pub(crate) fn format_session_table(service: &TerminalService, agent: &AgentContext) -> Option<String> {
    let sessions = service.list_sessions(agent);
    if sessions.is_empty() {
        return None;
    }

    let mut out = String::from(
        "ID           | Command                        | Position | Running  | Uptime\n\
         -------------|--------------------------------|----------|----------|--------",
    );
    for s in &sessions {
        let command: String = s.command.chars().take(LIST_COMMAND_WIDTH).collect();
        let running = if s.running { "Yes" } else { "No" };
        let _ = write!(
            out,
            "\n{:<12} | {:<30} | {:<8} | {:<8} | {}s",
            s.id,
            command,
            s.last_position,
            running,
            s.uptime_secs()
        );
    }
    Some(out)
}
