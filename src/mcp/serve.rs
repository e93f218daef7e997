// src/mcp/serve.rs
// Newline-framed stdio loop: one request per line, one response per line

use crate::mcp::HubServer;
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Serve the connection until stdin closes or a termination signal
/// arrives, then run the teardown chain. An error return means the
/// framer itself failed and the process should exit non-zero.
pub async fn serve(server: Arc<HubServer>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Responses from concurrent handlers funnel through one writer task,
    // so every response lands on stdout as a single uninterleaved line.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut handlers = JoinSet::new();
    let outcome = loop {
        // Reap finished handlers so the set stays small on long sessions.
        while handlers.try_join_next().is_some() {}

        tokio::select! {
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let server = server.clone();
                    let out_tx = out_tx.clone();
                    handlers.spawn(async move {
                        if let Some(response) = server.handle_message(&line).await {
                            let _ = out_tx.send(response.to_line());
                        }
                    });
                }
                Ok(None) => {
                    info!("stdin closed, shutting down");
                    break Ok(());
                }
                Err(e) => {
                    break Err(anyhow::anyhow!("stdio framing failed: {e}"));
                }
            },
            _ = &mut shutdown => {
                info!("termination signal received, shutting down");
                break Ok(());
            }
        }
    };

    // Let in-flight handlers finish writing before the pipe goes away.
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "request handler ended abnormally");
        }
    }
    drop(out_tx);
    let _ = writer.await;

    server.shutdown().await;
    outcome
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).ok();
    let mut quit = signal(SignalKind::quit()).ok();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async {
            match term.as_mut() {
                Some(stream) => { stream.recv().await; }
                None => std::future::pending::<()>().await,
            }
        } => {}
        _ = async {
            match quit.as_mut() {
                Some(stream) => { stream.recv().await; }
                None => std::future::pending::<()>().await,
            }
        } => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
