use std::process::Stdio;

use termward_core::{ExecuteOptions, ExecuteOutcome};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Apply env overrides and working directory shared by one-shot and interactive spawns.
pub(crate) fn configure(cmd: &mut Command, options: &ExecuteOptions) {
    for (key, value) in &options.env {
        match value {
            Some(value) => {
                cmd.env(key, value);
            }
            None => {
                cmd.env_remove(key);
            }
        }
    }
    if let Some(dir) = &options.working_directory {
        cmd.current_dir(dir);
    }
}

/// Run `cmd` to completion, combining stdout and stderr in arrival order.
pub(crate) async fn run_to_completion(mut cmd: Command, options: &ExecuteOptions) -> ExecuteOutcome {
    configure(&mut cmd, options);
    cmd.stdin(if options.input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return ExecuteOutcome::UnknownError {
                error: e.to_string(),
            };
        }
    };

    if let (Some(input), Some(mut stdin)) = (options.input.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                tracing::debug!("failed to write process stdin: {e}");
            }
        });
    }

    let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(64);

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, line_tx.clone()));
    }
    drop(line_tx);

    let deadline = options.timeout().map(|t| tokio::time::Instant::now() + t);
    let expired = async {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);

    let mut raw = Vec::new();
    loop {
        tokio::select! {
            line = line_rx.recv() => {
                match line {
                    Some(chunk) => raw.extend_from_slice(&chunk),
                    None => break,
                }
            }
            () = &mut expired => {
                let _ = child.kill().await;
                tracing::debug!(timeout = ?options.timeout(), "command timed out");
                return ExecuteOutcome::Timeout;
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status,
        () = &mut expired => {
            let _ = child.kill().await;
            return ExecuteOutcome::Timeout;
        }
    };

    let combined = String::from_utf8_lossy(&raw).into_owned();
    match status {
        Ok(status) => match status.code() {
            Some(0) => ExecuteOutcome::Success { output: combined },
            Some(exit_code) => ExecuteOutcome::BadExitCode {
                output: combined,
                exit_code,
            },
            None => ExecuteOutcome::UnknownError {
                error: format!("process terminated by signal: {status}"),
            },
        },
        Err(e) => ExecuteOutcome::UnknownError {
            error: e.to_string(),
        },
    }
}

/// Forward raw lines until EOF. Decoding happens once, after the streams are merged.
async fn forward_lines<R: AsyncRead + Unpin>(stream: R, tx: tokio::sync::mpsc::Sender<Vec<u8>>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(std::mem::take(&mut buf)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("process reader stopped: {e}");
                break;
            }
        }
    }
}
