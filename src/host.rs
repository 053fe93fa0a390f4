use std::future::Future;

use dialoguer::{Confirm, Select};
use termward_core::{AgentHost, ApprovalRequest, BoxFuture, SelectOption};

/// Host backed by the controlling terminal.
#[derive(Debug, Default)]
pub struct CliHost;

/// Run a blocking prompt off the async runtime, falling back to `fallback` on
/// timeout or prompt failure.
async fn prompt<T, F>(timeout: Option<std::time::Duration>, fallback: T, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> dialoguer::Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::info!("prompt timed out after {}s, using default", limit.as_secs());
                return fallback;
            }
        },
        None => task.await,
    };
    match joined {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            tracing::warn!("prompt failed: {e}");
            fallback
        }
        Err(e) => {
            tracing::warn!("prompt task failed: {e}");
            fallback
        }
    }
}

fn boxed<'a, T>(fut: impl Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

impl AgentHost for CliHost {
    fn ask_approval<'a>(&'a self, request: &'a ApprovalRequest) -> BoxFuture<'a, bool> {
        let message = request.message.clone();
        let default = request.default;
        boxed(prompt(request.timeout, default.unwrap_or(false), move || {
            let mut confirm = Confirm::new().with_prompt(message);
            if let Some(default) = default {
                confirm = confirm.default(default);
            }
            confirm.interact()
        }))
    }

    fn select<'a>(
        &'a self,
        prompt_text: &'a str,
        options: &'a [SelectOption],
        current: Option<&'a str>,
    ) -> BoxFuture<'a, Option<String>> {
        let labels: Vec<String> = options.iter().map(|o| o.label.clone()).collect();
        let values: Vec<String> = options.iter().map(|o| o.value.clone()).collect();
        let default = current
            .and_then(|c| values.iter().position(|v| v == c))
            .unwrap_or(0);
        let prompt_text = prompt_text.to_owned();
        boxed(async move {
            let picked = prompt(None, None, move || {
                Select::new()
                    .with_prompt(prompt_text)
                    .items(&labels)
                    .default(default)
                    .interact_opt()
            })
            .await;
            picked.and_then(|idx| values.get(idx).cloned())
        })
    }

    fn info_message(&self, text: &str) {
        println!("{text}");
    }

    fn error_message(&self, text: &str) {
        eprintln!("error: {text}");
    }

    fn chat_output(&self, text: &str) {
        println!("{text}");
    }
}
