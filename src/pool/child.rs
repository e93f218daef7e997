// src/pool/child.rs
// One live child MCP process: handshake, serialized requests, stderr drain

use crate::config::ServerConfig;
use crate::error::{HubError, Result};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use crate::pool::spawner::Spawner;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Deadline for one request/response pair when the settings carry none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period between closing stdin and force-killing on teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Request ids stay inside the range JS children can represent exactly.
pub const MAX_REQUEST_ID: u64 = (1 << 53) - 1;

/// Launchers that resolve a package name rather than a binary path.
const PACKAGE_RUNNERS: [&str; 5] = ["npx", "bunx", "pnpm", "yarn", "uvx"];

#[derive(Debug)]
struct ChildIo {
    /// `None` once teardown has closed the pipe.
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A live, initialized child MCP process.
///
/// The io mutex serializes request/response pairs so they never
/// interleave; request ids are strictly monotone per child.
#[derive(Debug)]
pub struct ChildHandle {
    name: String,
    timeout: Duration,
    io: Mutex<ChildIo>,
    process: Mutex<Child>,
    next_id: AtomicU64,
    drain_cancel: watch::Sender<bool>,
}

impl ChildHandle {
    /// Launch the descriptor, start the stderr drain, and complete the MCP
    /// handshake. Any handshake failure kills the process before returning.
    pub async fn spawn(
        name: &str,
        config: &ServerConfig,
        spawner: &dyn Spawner,
        timeout: Duration,
    ) -> Result<Self> {
        let env_keys: Vec<&str> = config.env.keys().map(|k| k.as_str()).collect();
        warn!(
            server = %name,
            command = %config.command,
            args = ?config.args,
            env_vars = ?env_keys,
            "spawning MCP child process"
        );

        let spawned = spawner
            .spawn(&config.command, &config.args, &config.env)
            .map_err(|e| HubError::Spawn {
                server: name.to_string(),
                message: format!("{} (command: {})", e, config.command),
            })?;

        // The drain starts before any request: pipe buffers are ~64 KiB
        // and a chatty child blocked on a full stderr would deadlock the
        // whole request path.
        let (drain_cancel, drain_rx) = watch::channel(false);
        spawn_stderr_drain(name.to_string(), spawned.stderr, drain_rx);

        let handle = Self {
            name: name.to_string(),
            timeout,
            io: Mutex::new(ChildIo {
                stdin: Some(spawned.stdin),
                stdout: BufReader::new(spawned.stdout).lines(),
            }),
            process: Mutex::new(spawned.child),
            next_id: AtomicU64::new(0),
            drain_cancel,
        };

        if let Err(e) = handle.handshake(config).await {
            handle.shutdown().await;
            return Err(e);
        }

        Ok(handle)
    }

    async fn handshake(&self, config: &ServerConfig) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "toolhub",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        self.send_request("initialize", params)
            .await
            .map_err(|e| self.handshake_error(config, &e))?;

        self.notify("notifications/initialized", json!({}))
            .await
            .map_err(|e| self.handshake_error(config, &e))?;
        debug!(server = %self.name, "MCP handshake complete");
        Ok(())
    }

    fn handshake_error(&self, config: &ServerConfig, cause: &HubError) -> HubError {
        let mut message = match cause {
            HubError::Crashed { message, .. } => format!(
                "child exited before completing the handshake ({message}); \
                 run the command by hand to see its startup output"
            ),
            other => other.to_string(),
        };
        if matches!(cause, HubError::Crashed { .. }) {
            if let Some(package) = package_name(&config.command, &config.args) {
                message.push_str(&format!(
                    "; the launcher resolves package '{package}' - check that it exists in the registry"
                ));
            }
        }
        HubError::Handshake {
            server: self.name.clone(),
            message,
        }
    }

    /// One serialized request/response exchange with the child.
    ///
    /// Stale frames (responses to timed-out predecessors, server-initiated
    /// messages) are skipped until the id matches; on deadline expiry the
    /// child is left alive for future calls.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let mut io = self.io.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if id > MAX_REQUEST_ID {
            return Err(HubError::Protocol(format!(
                "request id space exhausted for '{}'",
                self.name
            )));
        }

        let request = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let stdin = io
            .stdin
            .as_mut()
            .ok_or_else(|| self.crashed("stdin already closed"))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.crashed(&e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| self.crashed(&e.to_string()))?;

        let response = tokio::time::timeout(
            self.timeout,
            read_matching_response(&mut io.stdout, id, &self.name),
        )
        .await
        .map_err(|_| HubError::Timeout {
            server: self.name.clone(),
            seconds: self.timeout.as_secs(),
        })??;

        if let Some(error) = response.error {
            return Err(HubError::Child {
                server: self.name.clone(),
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// One-way message; no response is read.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let mut io = self.io.lock().await;
        let note = JsonRpcRequest::notification(method, params);
        let mut line = serde_json::to_string(&note)?;
        line.push('\n');

        let stdin = io
            .stdin
            .as_mut()
            .ok_or_else(|| self.crashed("stdin already closed"))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.crashed(&e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| self.crashed(&e.to_string()))?;
        Ok(())
    }

    /// Highest request id handed out so far.
    pub fn last_request_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Two-phase teardown: close stdin, wait up to the grace period for a
    /// natural exit, then force-kill. Cancels the stderr drain. Never
    /// panics, even when the child is already gone.
    pub async fn shutdown(&self) {
        let _ = self.drain_cancel.send(true);

        {
            let mut io = self.io.lock().await;
            io.stdin.take();
        }

        let mut process = self.process.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, process.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %self.name, %status, "child exited");
            }
            Ok(Err(e)) => {
                debug!(server = %self.name, error = %e, "child already gone");
            }
            Err(_) => {
                debug!(server = %self.name, "child ignored stdin close, killing");
                if let Err(e) = process.start_kill() {
                    debug!(server = %self.name, error = %e, "kill failed (already dead?)");
                }
                let _ = process.wait().await;
            }
        }
    }

    fn crashed(&self, message: &str) -> HubError {
        HubError::Crashed {
            server: self.name.clone(),
            message: message.to_string(),
        }
    }
}

async fn read_matching_response(
    stdout: &mut Lines<BufReader<ChildStdout>>,
    id: u64,
    server: &str,
) -> Result<JsonRpcResponse> {
    loop {
        let line = stdout
            .next_line()
            .await
            .map_err(|e| HubError::Crashed {
                server: server.to_string(),
                message: e.to_string(),
            })?
            .ok_or_else(|| HubError::Crashed {
                server: server.to_string(),
                message: "stdout closed (EOF)".to_string(),
            })?;

        if line.trim().is_empty() {
            continue;
        }
        let response: JsonRpcResponse = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                debug!(server = %server, error = %e, "skipping unparseable child output");
                continue;
            }
        };
        match response.id.as_ref().and_then(Value::as_u64) {
            Some(got) if got == id => return Ok(response),
            _ => {
                debug!(server = %server, "skipping stale or unsolicited child message");
            }
        }
    }
}

/// Consume and drop stderr bytes until the pipe closes or cancel fires.
fn spawn_stderr_drain(name: String, mut stderr: ChildStderr, mut cancel: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                read = stderr.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!(server = %name, "stderr drain finished");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(server = %name, error = %e, "stderr drain read failed");
                        break;
                    }
                },
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

/// The package a runner-style launcher would resolve, for error messages.
fn package_name<'a>(command: &str, args: &'a [String]) -> Option<&'a str> {
    let base = command.rsplit(['/', '\\']).next().unwrap_or(command);
    if !PACKAGE_RUNNERS.contains(&base) {
        return None;
    }
    args.iter()
        .map(String::as_str)
        .find(|arg| !arg.starts_with('-') && !matches!(*arg, "exec" | "dlx" | "x"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_name_for_runners() {
        let args = vec!["-y".to_string(), "@acme/jira-mcp".to_string()];
        assert_eq!(package_name("npx", &args), Some("@acme/jira-mcp"));

        let dlx = vec!["dlx".to_string(), "some-pkg".to_string()];
        assert_eq!(package_name("pnpm", &dlx), Some("some-pkg"));

        assert_eq!(package_name("node", &args), None);
        assert_eq!(package_name("npx", &[]), None);
    }

    #[test]
    fn test_max_request_id_fits_in_f64() {
        // 2^53 - 1 is the largest integer a JS number holds exactly.
        assert_eq!(MAX_REQUEST_ID, 9_007_199_254_740_991);
        assert_eq!(MAX_REQUEST_ID as f64 as u64, MAX_REQUEST_ID);
    }
}
