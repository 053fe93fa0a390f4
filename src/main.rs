mod host;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use termward_core::{
    AgentContext, AgentTerminalConfig, CommandClassifier, TerminalConfig, TerminalService,
    commands, parse_compound_command, tools,
};
use termward_local::{LocalShellBackend, LocalShellConfig};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::host::CliHost;

#[derive(Parser, Debug)]
#[command(name = "termward", version, about = "Agent terminal sessions with command safety checks")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a shell command once through the bash tool
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Print the safety verdict for a command line
    Classify {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Interactive loop: `/terminal ...` commands or shell commands
    Repl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = TerminalConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.validate()?;

    match cli.command {
        Command::Classify { command } => classify(&config, &command.join(" "))?,
        Command::Run { command } => {
            let (service, agent) = build(&config)?;
            let output = tools::bash(&service, &agent, &command.join(" ")).await?;
            println!("{output}");
        }
        Command::Repl => repl(&config).await?,
    }
    Ok(())
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("TERMWARD_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn classify(config: &TerminalConfig, line: &str) -> anyhow::Result<()> {
    let classifier = CommandClassifier::new(&config.dangerous_commands, &config.safe_commands)?;
    let lowered = line.to_lowercase();
    println!("{}", classifier.classify(line));
    println!("commands: {}", parse_compound_command(&lowered).join(", "));
    Ok(())
}

/// Register configured providers (a default `local` one when none are configured)
/// and attach a single agent.
fn build(config: &TerminalConfig) -> anyhow::Result<(TerminalService, AgentContext)> {
    let mut service = TerminalService::new(config)?;

    if config.providers.is_empty() {
        service.register_backend("local", Arc::new(LocalShellBackend::default()));
    }
    for (name, table) in &config.providers {
        let kind = table
            .get("type")
            .and_then(toml::Value::as_str)
            .unwrap_or("local");
        match kind {
            "local" => {
                let local = LocalShellConfig::from_table(Some(table))
                    .with_context(|| format!("invalid provider `{name}`"))?;
                service.register_backend(name.clone(), Arc::new(LocalShellBackend::new(&local)));
            }
            other => tracing::warn!(provider = %name, "unsupported provider type: {other}"),
        }
    }

    service.run()?;
    let state = service.attach(&AgentTerminalConfig::default());
    Ok((service, AgentContext::new(state, Arc::new(CliHost))))
}

async fn repl(config: &TerminalConfig) -> anyhow::Result<()> {
    use std::io::Write;

    let (service, agent) = build(config)?;
    for line in agent.with_state(termward_core::TerminalState::show) {
        println!("{line}");
    }
    println!("Type /terminal help for commands, exit to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let result = match line.strip_prefix("/terminal") {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                commands::execute(&service, &agent, rest).await
            }
            _ => tools::bash(&service, &agent, line)
                .await
                .map(|output| println!("{output}")),
        };
        if let Err(e) = result {
            agent.host().error_message(&e.to_string());
        }
    }

    for session in service.list_sessions(&agent) {
        if let Err(e) = service.terminate_session(&agent, &session.id).await {
            tracing::warn!(session = %session.id, "failed to terminate session on exit: {e}");
        }
    }
    Ok(())
}
