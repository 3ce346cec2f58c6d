//! Spawned-process transport.

use std::process::Stdio;
use std::sync::Arc;

use rmcp::ServiceExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Link, McpService, Transport};
use crate::config::ServerConfig;
use crate::error::McpResult;
use crate::handler::PeriscopeClientHandler;

/// The child process of a stdio connection, owned by its supervisor task.
#[derive(Debug)]
pub(crate) struct StdioTransport {
    kill_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

impl StdioTransport {
    /// Kill the child (if it is still running) and reap it.
    pub(super) async fn release(mut self, server_id: &str) {
        if let Some(tx) = self.kill_tx.take() {
            // Err means the supervisor already saw the process exit.
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.supervisor).await {
            warn!(server = %server_id, error = %e, "Process supervisor join error");
        }
    }
}

pub(super) async fn connect(
    config: &ServerConfig,
    handler: PeriscopeClientHandler,
    link: &Arc<Link>,
) -> McpResult<(McpService, Transport)> {
    let command = config
        .command
        .as_deref()
        .ok_or_else(|| link.connect_error("no command specified"))?;

    let mut cmd = Command::new(command);
    cmd.args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| link.connect_error(format!("failed to spawn {command}: {e}")))?;
    let pid = child.id();

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(link.connect_error("child process has no stdio pipes"));
    };
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_stderr(link.server_id().to_string(), stderr));
    }

    // On handshake failure `child` is dropped here and killed.
    let service = handler
        .serve((stdout, stdin))
        .await
        .map_err(|e| link.connect_error(format!("handshake with {command} failed: {e}")))?;

    let (kill_tx, kill_rx) = oneshot::channel();
    let supervisor = tokio::spawn(supervise(child, kill_rx, Arc::clone(link)));

    info!(server = %link.server_id(), command, pid, "Spawned MCP server process");
    Ok((
        service,
        Transport::Stdio(StdioTransport {
            kill_tx: Some(kill_tx),
            supervisor,
        }),
    ))
}

/// Wait for the child to exit or for a kill request, whichever comes first.
async fn supervise(mut child: Child, kill_rx: oneshot::Receiver<()>, link: Arc<Link>) {
    tokio::select! {
        status = child.wait() => {
            let reason = match status {
                Ok(status) => format!("process exited ({status})"),
                Err(e) => format!("failed to wait for process: {e}"),
            };
            link.transport_lost(&reason);
        },
        _ = kill_rx => {
            // A dropped sender also lands here, so an abandoned transport
            // still takes its process down.
            match child.kill().await {
                Ok(()) => debug!(server = %link.server_id(), "Killed MCP server process"),
                Err(e) => warn!(server = %link.server_id(), error = %e, "Failed to kill MCP server process"),
            }
        },
    }
}

async fn log_stderr(server_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(server = %server_id, stderr = %line, "Server stderr"),
            Ok(None) => break,
            Err(e) => {
                debug!(server = %server_id, error = %e, "Stopped reading server stderr");
                break;
            },
        }
    }
}
