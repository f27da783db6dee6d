//! Remote control TCP listener
//!
//! Runs on the control-plane tokio runtime, entirely off the packet
//! path. One task per connection; each line is parsed, dispatched and
//! answered with one JSON line. Connection errors end that connection
//! only.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use super::handler::handle_command;
use super::protocol::{ControlCommand, ControlResponse};
use crate::error::ControlError;
use crate::instance::Instance;

/// Bind the control listener at the configured address
///
/// # Errors
///
/// Returns `ControlError::BindError` when the address is unavailable.
pub async fn bind(instance: &Arc<Instance>) -> Result<TcpListener, ControlError> {
    let addr = instance.config().control.listen;
    TcpListener::bind(addr)
        .await
        .map_err(|e| ControlError::BindError {
            addr,
            reason: e.to_string(),
        })
}

/// Accept control connections until the task is cancelled
pub async fn serve(instance: Arc<Instance>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "Control connection accepted");
                let instance = Arc::clone(&instance);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(instance, stream).await {
                        debug!(peer = %peer, error = %e, "Control connection closed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Control accept failed");
            }
        }
    }
}

async fn handle_connection(
    instance: Arc<Instance>,
    stream: TcpStream,
) -> Result<(), ControlError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ControlCommand>(&line) {
            Ok(command) => handle_command(&instance, command),
            Err(e) => ControlResponse::error(format!("malformed command: {e}")),
        };

        let mut reply = serde_json::to_string(&response)
            .map_err(|e| ControlError::Protocol(e.to_string()))?;
        reply.push('\n');
        writer.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}
