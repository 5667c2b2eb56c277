//! Stdio transport for the deskpilot engine.
#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::io::Result as IoResult;
use std::sync::Arc;

use deskpilot_core::Engine;
use deskpilot_core::platform::native_desktop;
use deskpilot_protocol::ToolCallRequest;
use deskpilot_protocol::ToolCallResponse;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::{self};
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;

mod dispatcher;

pub use dispatcher::ToolDispatcher;

/// Size of the bounded channels between the transport tasks. Plenty for
/// one interactive agent on the other end of the pipe.
const CHANNEL_CAPACITY: usize = 128;

/// Run the transport loop until stdin reaches EOF. The loop is the only
/// code that touches the process's standard streams; the dispatcher
/// returns structured values only.
pub async fn run_main() -> IoResult<()> {
    let engine = Engine::new(deskpilot_core::config_dir(), native_desktop());
    run_with_engine(engine).await
}

pub async fn run_with_engine(engine: Arc<Engine>) -> IoResult<()> {
    let (incoming_tx, mut incoming_rx) = mpsc::channel::<ToolCallRequest>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ToolCallResponse>(CHANNEL_CAPACITY);

    // Task: read line-delimited requests from stdin.
    let stdin_reader_handle = tokio::spawn({
        let outgoing_tx = outgoing_tx.clone();
        async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            while let Some(line) = lines.next_line().await.unwrap_or_default() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ToolCallRequest>(&line) {
                    Ok(request) => {
                        if incoming_tx.send(request).await.is_err() {
                            // Receiver gone - nothing left to do.
                            break;
                        }
                    }
                    Err(e) => {
                        error!("failed to parse request line: {e}");
                        // Try to salvage an id so the caller can correlate
                        // the parse failure.
                        let id = serde_json::from_str::<serde_json::Value>(&line)
                            .ok()
                            .and_then(|v| v.get("id").cloned())
                            .unwrap_or(serde_json::Value::Null);
                        let _ = outgoing_tx
                            .send(ToolCallResponse::error(id, format!("invalid request: {e}")))
                            .await;
                    }
                }
            }

            debug!("stdin reader finished (EOF)");
        }
    });

    // Task: process requests through the dispatcher.
    let processor_handle = tokio::spawn({
        let dispatcher = ToolDispatcher::new(engine);
        let outgoing_tx = outgoing_tx.clone();
        async move {
            while let Some(request) = incoming_rx.recv().await {
                let response = dispatcher.handle(request).await;
                if outgoing_tx.send(response).await.is_err() {
                    break;
                }
            }

            info!("processor task exited (channel closed)");
        }
    });
    drop(outgoing_tx);

    // Task: write responses to stdout.
    let stdout_writer_handle = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(response) = outgoing_rx.recv().await {
            match serde_json::to_string(&response) {
                Ok(json) => {
                    if let Err(e) = stdout.write_all(json.as_bytes()).await {
                        error!("failed to write to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.write_all(b"\n").await {
                        error!("failed to write newline to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.flush().await {
                        error!("failed to flush stdout: {e}");
                        break;
                    }
                }
                Err(e) => error!("failed to serialize response: {e}"),
            }
        }

        info!("stdout writer exited (channel closed)");
    });

    // The normal exit path: stdin EOF drops the request sender, the
    // processor drains and drops the response sender, the writer ends.
    let _ = tokio::join!(stdin_reader_handle, processor_handle, stdout_writer_handle);

    Ok(())
}
