//! Worker node service
//!
//! A worker dials the master's worker port and then only reacts to frames:
//!
//! - `SET_TASK`: store the row block, answer `TASK_ACCEPTED`
//! - `ITERATION_VECTOR`: sweep the block, answer `PARTIAL_RESULT`
//! - `RESET`: drop the block
//!
//! Failures while handling a frame are reported back as `WORKER_ERROR` with a
//! text message; the connection stays open. When the master goes away the
//! service reconnects with a growing delay unless reconnecting is disabled.

pub mod task;

pub use task::WorkerTask;

use crate::compute::SolveMode;
use crate::config::WorkerNodeConfig;
use crate::error::ComputeError;
use crate::protocol::{
    read_frame, write_frame, Command, FrameError, IterationVector, PartialResult, TaskAssignment,
};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker node service
pub struct WorkerService {
    config: WorkerNodeConfig,

    /// Node identifier (hostname)
    node_id: String,
}

impl WorkerService {
    pub fn new(config: WorkerNodeConfig) -> Self {
        Self { config, node_id: get_node_id() }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Run until shutdown, or until the first session ends when reconnecting is off
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(node_id = %self.node_id, master = %self.config.master_address, "worker starting");

        loop {
            let stream = if self.config.reconnect {
                match self.connect_with_backoff(&shutdown).await {
                    Some(stream) => stream,
                    None => break,
                }
            } else {
                TcpStream::connect(&self.config.master_address)
                    .await
                    .with_context(|| format!("Failed to connect to master at {}", self.config.master_address))?
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "failed to set TCP_NODELAY");
            }
            info!(master = %self.config.master_address, "connected to master");

            let mut stream = stream;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = serve(&mut stream) => match result {
                    Ok(()) => info!("master closed the connection"),
                    Err(e) => warn!(error = %e, "connection to master lost"),
                },
            }

            if !self.config.reconnect {
                break;
            }
        }

        info!("worker stopped");
        Ok(())
    }

    /// Dial the master until it answers; `None` on shutdown
    async fn connect_with_backoff(&self, shutdown: &CancellationToken) -> Option<TcpStream> {
        let mut wait = Duration::from_millis(self.config.reconnect_delay_ms);
        let max = Duration::from_millis(self.config.max_reconnect_delay_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                result = TcpStream::connect(&self.config.master_address) => match result {
                    Ok(stream) => return Some(stream),
                    Err(e) => {
                        error!(master = %self.config.master_address, error = %e, retry_in = ?wait, "connection error");
                    }
                },
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
            wait = (wait * 2).min(max);
        }
    }
}

/// Handle frames from the master until it disconnects
///
/// Returns `Ok(())` on a clean close.
pub async fn serve<S>(stream: &mut S) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut task = WorkerTask::new();

    loop {
        let frame = match read_frame(stream).await {
            Ok(frame) => frame,
            Err(FrameError::EndOfStream) => return Ok(()),
            Err(e) => return Err(e),
        };

        match Command::from_byte(frame.command) {
            Some(Command::SetTask) => match TaskAssignment::decode(&frame.payload) {
                Ok(assignment) => {
                    info!(
                        start_row = assignment.start_row,
                        row_count = assignment.row_count,
                        matrix_size = assignment.matrix_size,
                        "task assigned"
                    );
                    task.assign(assignment);
                    write_frame(stream, Command::TaskAccepted.code(), &[]).await?;
                }
                Err(e) => {
                    warn!(error = %e, "rejecting malformed task");
                    write_frame(stream, Command::WorkerError.code(), e.to_string().as_bytes()).await?;
                }
            },

            Some(Command::IterationVector) => {
                match handle_iteration(&task, &frame.payload).await {
                    Ok(payload) => {
                        write_frame(stream, Command::PartialResult.code(), &payload).await?;
                    }
                    Err(message) => {
                        warn!(error = %message, "iteration failed");
                        write_frame(stream, Command::WorkerError.code(), message.as_bytes()).await?;
                    }
                }
            }

            Some(Command::Reset) => {
                debug!("task reset");
                task.reset();
            }

            _ => warn!(command = frame.command, "ignoring unknown command"),
        }
    }
}

/// Sweep the held block for one iteration-vector payload
async fn handle_iteration(task: &WorkerTask, payload: &[u8]) -> Result<Vec<u8>, String> {
    let vector = IterationVector::decode(payload).map_err(|e| e.to_string())?;
    let mode = match vector.mode {
        None => SolveMode::Sequential,
        Some(byte) => SolveMode::from_byte(byte)
            .ok_or(ComputeError::UnknownMode(byte))
            .map_err(|e| e.to_string())?,
    };

    let output = task.compute(vector.x, mode).await.map_err(|e| e.to_string())?;
    debug!(%mode, rows = output.values.len(), threads = output.threads_used, "sweep done");
    Ok(PartialResult::encode(output.threads_used as i32, &output.values))
}

/// Get node ID (hostname)
fn get_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
