//! Local executor - runs commands on the host through the platform shell
//!
//! Features:
//! - Shell chosen from the host OS name at call time (`cmd /C` or `sh -c`)
//! - stderr merged into stdout in arrival order
//! - Output captured line by line, each line followed by `\n`
//! - Optional hard timeout (off by default)
//!
//! The exit code is logged but not returned; a failing command still yields
//! its captured output.

use crate::executor::{ExecutionError, Executor};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use taskpod_foundation::ShellKind;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Local executor configuration
#[derive(Debug, Clone, Default)]
pub struct LocalExecutorConfig {
    /// Kill the child and fail with `Timeout` after this long.
    /// `None` waits for the process however long it runs.
    pub timeout: Option<Duration>,
}

impl LocalExecutorConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Local executor that runs commands directly on the host
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    config: LocalExecutorConfig,
}

impl LocalExecutor {
    /// Create a new local executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with configuration
    pub fn with_config(config: LocalExecutorConfig) -> Self {
        Self { config }
    }

    async fn capture(&self, command: &str) -> Result<String, ExecutionError> {
        let shell = ShellKind::detect();

        let mut cmd = Command::new(shell.program());
        cmd.arg(shell.command_flag())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing locally via {}: {}", shell.name(), command);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionError::Io(format!("Failed to spawn process: {}", e)))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx.clone()));
        }
        // Channel closes once both readers hit EOF
        drop(tx);

        let mut output = String::new();
        while let Some(line) = rx.recv().await {
            let line = line.map_err(|e| ExecutionError::Io(format!("Failed to read output: {}", e)))?;
            output.push_str(&line);
            output.push('\n');
        }

        for reader in readers {
            let _ = reader.await;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExecutionError::Io(format!("Process error: {}", e)))?;

        match status.code() {
            Some(0) => debug!("Local command exited cleanly"),
            Some(code) => debug!("Local command exited with code {}", code),
            None => debug!("Local command terminated by signal"),
        }

        Ok(output)
    }
}

/// Forward each line of `reader` (without its line ending) into `tx`
fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::UnboundedSender<std::io::Result<String>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    })
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn run(&self, command: &str) -> Result<String, ExecutionError> {
        match self.config.timeout {
            None => self.capture(command).await,
            Some(limit) => match tokio::time::timeout(limit, self.capture(command)).await {
                Ok(result) => result,
                Err(_) => {
                    // Dropping the capture future kills the child (kill_on_drop)
                    warn!("Local command timed out after {:.1}s", limit.as_secs_f64());
                    Err(ExecutionError::Timeout(format!(
                        "local command did not finish within {:.1}s",
                        limit.as_secs_f64()
                    )))
                }
            },
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
