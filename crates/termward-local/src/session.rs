use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use termward_core::{BackendError, ExecuteOptions, InteractiveOutput, SessionStatus};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::oneshot;

use crate::process::configure;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Default)]
struct Buffer {
    output: String,
    running: bool,
    exit_code: Option<i32>,
}

/// A long-lived shell fed through stdin. Output is buffered for the lifetime of the session.
#[derive(Debug)]
pub(crate) struct LocalSession {
    id: String,
    buffer: Arc<Mutex<Buffer>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    start_time: SystemTime,
}

impl LocalSession {
    pub(crate) fn spawn(id: String, shell: &str, options: &ExecuteOptions) -> Result<Self, BackendError> {
        let mut cmd = Command::new(shell);
        configure(&mut cmd, options);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Other("session stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Other("session stderr not captured".into()))?;

        let buffer = Arc::new(Mutex::new(Buffer {
            running: true,
            ..Buffer::default()
        }));
        tokio::spawn(pump(stdout, Arc::clone(&buffer)));
        tokio::spawn(pump(stderr, Arc::clone(&buffer)));

        let (kill_tx, kill_rx) = oneshot::channel();
        let waiter_buffer = Arc::clone(&buffer);
        let waiter_id = id.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.kill().await;
                    child.wait().await
                }
            };
            let exit_code = status.ok().and_then(|s| s.code());
            tracing::debug!(session = %waiter_id, ?exit_code, "session process exited");
            let mut buf = waiter_buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buf.running = false;
            buf.exit_code = exit_code;
        });

        Ok(Self {
            id,
            buffer,
            stdin: tokio::sync::Mutex::new(stdin),
            kill: Mutex::new(Some(kill_tx)),
            start_time: SystemTime::now(),
        })
    }

    pub(crate) async fn write(&self, input: &str) -> Result<(), BackendError> {
        if !self.lock().running {
            return Err(BackendError::SessionClosed {
                id: self.id.clone(),
            });
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| BackendError::SessionClosed {
            id: self.id.clone(),
        })?;
        stdin.write_all(input.as_bytes()).await?;
        if !input.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;
        Ok(())
    }

    pub(crate) fn read_from(&self, from_position: usize) -> InteractiveOutput {
        let buf = self.lock();
        let from = from_position.min(buf.output.len());
        InteractiveOutput {
            output: buf.output.get(from..).unwrap_or_default().to_owned(),
            new_position: buf.output.len(),
            is_complete: !buf.running,
            exit_code: buf.exit_code,
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        let buf = self.lock();
        SessionStatus {
            id: self.id.clone(),
            running: buf.running,
            start_time: self.start_time,
            output_length: buf.output.len(),
            exit_code: buf.exit_code,
        }
    }

    /// Signal the waiter to kill the shell. Idempotent.
    pub(crate) fn kill(&self) {
        if let Some(tx) = self
            .kill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, buffer: Arc<Mutex<Buffer>>) {
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let text = drain_utf8(&mut pending);
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .output
                    .push_str(&text);
            }
            Err(e) => {
                tracing::debug!("session reader stopped: {e}");
                break;
            }
        }
    }
    if !pending.is_empty() {
        buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output
            .push_str(&String::from_utf8_lossy(&pending));
    }
}

/// Decode the complete prefix of `pending`, leaving a trailing partial character for the
/// next read. Invalid sequences become U+FFFD.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return text;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                    None => {
                        pending.drain(..valid);
                        return text;
                    }
                }
            }
        }
    }
}
