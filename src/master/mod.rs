//! Master node
//!
//! The master listens on two ports:
//!
//! - **worker port**: every accepted connection becomes a pooled worker
//! - **client port**: one controlling client at a time; a new connection
//!   replaces the previous one
//!
//! Client commands are turned into jobs and run by the scheduler one at a
//! time. Pool changes are forwarded to whichever client is current.
//!
//! # Tasks
//!
//! ```text
//! worker accept loop --add--> WorkerPool <--reserve/return-- running job
//!                                 |                              ^
//!                          watch channel                         |
//!                                 v                              |
//! client accept loop --> client session --enqueue--> JobQueue -> Scheduler
//!                                 |
//!                        pool-state forwarder --> current client
//! ```

pub mod handler;
pub mod jobs;
pub mod notifier;
pub mod pool;
pub mod scheduler;

pub use handler::CommandHandler;
pub use notifier::Notifier;
pub use pool::{PoolSnapshot, WorkerHandle, WorkerPool};
pub use scheduler::{JobQueue, Scheduler};

use crate::config::MasterConfig;
use crate::log_if_err;
use crate::protocol::read_frame;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The notifier of the currently connected client
#[derive(Clone)]
struct ClientSlot {
    current: Arc<Mutex<Notifier>>,
}

impl ClientSlot {
    fn new() -> Self {
        Self { current: Arc::new(Mutex::new(Notifier::detached())) }
    }

    fn current(&self) -> Notifier {
        self.current.lock().clone()
    }

    /// Install a new client, returning the one it displaces
    fn replace(&self, notifier: Notifier) -> Notifier {
        std::mem::replace(&mut *self.current.lock(), notifier)
    }
}

pub struct MasterServer {
    config: MasterConfig,
}

impl MasterServer {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    /// Bind both ports from the config and serve until `shutdown`
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let worker_addr = self.config.worker_listen_addr();
        let client_addr = self.config.client_listen_addr();

        let workers = TcpListener::bind(&worker_addr)
            .await
            .with_context(|| format!("Failed to bind worker port {}", worker_addr))?;
        let clients = TcpListener::bind(&client_addr)
            .await
            .with_context(|| format!("Failed to bind client port {}", client_addr))?;

        self.serve(workers, clients, shutdown).await
    }

    /// Serve on already bound listeners until `shutdown`
    pub async fn serve(
        self,
        worker_listener: TcpListener,
        client_listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(
            workers = %worker_listener.local_addr()?,
            clients = %client_listener.local_addr()?,
            "master listening"
        );

        let pool = WorkerPool::new(self.config.pool_poll_interval());
        let queue = JobQueue::new();
        let clients = ClientSlot::new();
        let handler = Arc::new(CommandHandler::new(pool.clone(), queue.clone(), &self.config));

        let sweep = pool.spawn_liveness_sweep(self.config.liveness_interval(), shutdown.clone());
        let scheduler = Scheduler::start(queue, self.config.scheduler_idle(), shutdown.clone());
        let forwarder = tokio::spawn(forward_pool_state(pool.subscribe(), clients.clone(), shutdown.clone()));
        let acceptor = tokio::spawn(accept_workers(worker_listener, pool, clients.clone(), shutdown.clone()));

        accept_clients(client_listener, handler, clients.clone(), shutdown.clone()).await;

        info!("master shutting down");
        scheduler.shutdown().await;
        log_if_err!(acceptor.await, "worker accept loop");
        log_if_err!(sweep.await, "liveness sweep");
        log_if_err!(forwarder.await, "pool state forwarder");
        clients.current().close().await;
        info!("master stopped");
        Ok(())
    }
}

async fn accept_workers(
    listener: TcpListener,
    pool: WorkerPool,
    clients: ClientSlot,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "worker connected");
                    pool.add(WorkerHandle::new(stream, addr));
                    clients.current().log(format!("Worker {} connected", addr)).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept worker");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }
}

async fn accept_clients(
    listener: TcpListener,
    handler: Arc<CommandHandler>,
    clients: ClientSlot,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "client connected");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "failed to set TCP_NODELAY");
                    }
                    let (reader, writer) = stream.into_split();
                    let notifier = Notifier::new(writer);

                    let previous = clients.replace(notifier.clone());
                    previous.close().await;

                    notifier.log("Client connected").await;
                    notifier.pool_state(handler.pool().snapshot().into()).await;
                    tokio::spawn(client_session(reader, notifier, handler.clone(), shutdown.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept client");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }
}

async fn client_session(
    mut reader: OwnedReadHalf,
    notifier: Notifier,
    handler: Arc<CommandHandler>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame(&mut reader) => match frame {
                Ok(frame) => handler.handle(frame, &notifier).await,
                Err(e) if e.is_disconnect() => {
                    info!("client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "dropping client session");
                    notifier.log(format!("Protocol error: {}", e)).await;
                    notifier.calculation_failed().await;
                    break;
                }
            },
        }
    }
}

/// Push every pool change to the current client
async fn forward_pool_state(
    mut changes: watch::Receiver<PoolSnapshot>,
    clients: ClientSlot,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *changes.borrow_and_update();
                clients.current().pool_state(snapshot.into()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MasterClient, MasterEvent};
    use crate::config::WorkerNodeConfig;
    use crate::master::jobs::test_support::*;
    use crate::protocol::{Command, StartRequest};
    use crate::worker::WorkerService;

    fn test_config() -> MasterConfig {
        MasterConfig {
            bind_address: "127.0.0.1".to_string(),
            worker_port: 0,
            client_port: 0,
            acquire_timeout_ms: 5_000,
            pool_poll_interval_ms: 20,
            liveness_interval_ms: 100,
            scheduler_idle_ms: 20,
            round_timeout_ms: Some(5_000),
        }
    }

    async fn start_master(shutdown: &CancellationToken) -> (String, String, tokio::task::JoinHandle<Result<()>>) {
        let workers = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let clients = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let worker_addr = workers.local_addr().unwrap().to_string();
        let client_addr = clients.local_addr().unwrap().to_string();
        let server = MasterServer::new(test_config());
        let handle = tokio::spawn(server.serve(workers, clients, shutdown.clone()));
        (worker_addr, client_addr, handle)
    }

    fn spawn_worker(master: &str, shutdown: &CancellationToken) {
        let config = WorkerNodeConfig {
            master_address: master.to_string(),
            reconnect: false,
            reconnect_delay_ms: 10,
            max_reconnect_delay_ms: 10,
        };
        tokio::spawn(WorkerService::new(config).run(shutdown.clone()));
    }

    fn start_request(files: &SystemFiles, is_distributed: bool) -> StartRequest {
        StartRequest {
            is_distributed,
            matrix_file: files.params.matrix_file.display().to_string(),
            vector_file: files.params.vector_file.display().to_string(),
            nodes_file: files.params.nodes_file.display().to_string(),
            epsilon: 1e-9,
            max_iterations: 1000,
        }
    }

    #[tokio::test]
    async fn test_distributed_job_end_to_end() {
        let files = system_2x2();
        let shutdown = CancellationToken::new();
        let (worker_addr, client_addr, server) = start_master(&shutdown).await;

        spawn_worker(&worker_addr, &shutdown);
        spawn_worker(&worker_addr, &shutdown);

        let mut client = MasterClient::connect(&client_addr).await.unwrap();
        client
            .submit(Command::StartDistributed, &start_request(&files, true))
            .await
            .unwrap();

        let mut progress = 0;
        let result = loop {
            match client.next_event().await.unwrap() {
                MasterEvent::Progress(_) => progress += 1,
                MasterEvent::Result(result) => break result,
                MasterEvent::CalculationFailed => panic!("job failed"),
                _ => {}
            }
        };
        assert_eq!(result.iterations, progress);
        assert_eq!(result.resources, Some(2));
        assert_close(&result.x, &[3.0, 2.0], 1e-8);

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pool_state_reaches_client() {
        let shutdown = CancellationToken::new();
        let (worker_addr, client_addr, server) = start_master(&shutdown).await;

        let mut client = MasterClient::connect(&client_addr).await.unwrap();
        spawn_worker(&worker_addr, &shutdown);

        loop {
            client.request_pool_state().await.unwrap();
            if let MasterEvent::PoolState(state) = client.next_event().await.unwrap() {
                if state.available == 1 {
                    assert_eq!(state.total, 1);
                    break;
                }
            }
        }

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_new_client_replaces_old() {
        let files = system_2x2();
        let shutdown = CancellationToken::new();
        let (_worker_addr, client_addr, server) = start_master(&shutdown).await;

        let mut first = MasterClient::connect(&client_addr).await.unwrap();
        // Wait until the first client is installed
        assert!(matches!(first.next_event().await.unwrap(), MasterEvent::Log(_)));

        let mut second = MasterClient::connect(&client_addr).await.unwrap();
        second
            .submit(Command::StartGaussLinear, &start_request(&files, false))
            .await
            .unwrap();
        loop {
            if let MasterEvent::LinearResult(result) = second.next_event().await.unwrap() {
                assert_eq!(result.matrix_size, 2);
                break;
            }
        }

        // The displaced client only sees its stream end
        loop {
            match first.next_event().await {
                Ok(MasterEvent::LinearResult(_)) => panic!("old client got the result"),
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
