//! Outbound channel to the connected client
//!
//! Every send is best effort. The first failed write detaches the writer and
//! later sends become no-ops, so a vanished client never fails a job.

use crate::protocol::{write_frame, Command, LinearResult, PoolState, Progress, ResultReady};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

type ClientWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Cloneable handle to one client connection
#[derive(Clone)]
pub struct Notifier {
    writer: Arc<Mutex<Option<ClientWriter>>>,
}

impl Notifier {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self { writer: Arc::new(Mutex::new(Some(Box::new(writer)))) }
    }

    /// A notifier with no peer; every send is dropped
    pub fn detached() -> Self {
        Self { writer: Arc::new(Mutex::new(None)) }
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Shut down and forget the writer
    pub async fn close(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn send(&self, command: Command, payload: &[u8]) {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return;
        };
        if let Err(e) = write_frame(writer, command.code(), payload).await {
            debug!(error = %e, ?command, "client write failed, detaching");
            *guard = None;
        }
    }

    pub async fn log(&self, message: impl AsRef<str>) {
        self.send(Command::Log, message.as_ref().as_bytes()).await;
    }

    pub async fn status(&self, status: impl AsRef<str>) {
        self.send(Command::Status, status.as_ref().as_bytes()).await;
    }

    pub async fn worker_status(&self, status: impl AsRef<str>) {
        self.send(Command::WorkerStatus, status.as_ref().as_bytes()).await;
    }

    pub async fn progress(&self, iteration: i32, error: f64) {
        self.send(Command::Progress, &Progress { iteration, error }.encode()).await;
    }

    pub async fn distributed_result(&self, result: &ResultReady) {
        self.send(Command::ResultReady, &result.encode()).await;
    }

    pub async fn linear_result(&self, result: LinearResult) {
        self.send(Command::LinearResultReady, &result.encode()).await;
    }

    pub async fn calculation_failed(&self) {
        self.send(Command::CalculationFailed, &[]).await;
    }

    pub async fn pool_state(&self, state: PoolState) {
        self.send(Command::PoolState, &state.encode()).await;
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
