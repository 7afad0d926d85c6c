//! Client command dispatch
//!
//! Start commands become queued jobs; the job reports back through the
//! notifier of the client that submitted it.

use super::jobs::{AcquisitionPolicy, DistributedJob, Job, LinearJob, SeidelJob, SolveParams};
use super::notifier::Notifier;
use super::pool::WorkerPool;
use super::scheduler::JobQueue;
use crate::compute::SolveMode;
use crate::config::MasterConfig;
use crate::protocol::{Command, Frame, StartRequest};
use std::time::Duration;
use tracing::{info, warn};

pub struct CommandHandler {
    pool: WorkerPool,
    queue: JobQueue,
    acquire_timeout: Duration,
    round_timeout: Option<Duration>,
}

impl CommandHandler {
    pub fn new(pool: WorkerPool, queue: JobQueue, config: &MasterConfig) -> Self {
        Self {
            pool,
            queue,
            acquire_timeout: config.acquire_timeout(),
            round_timeout: config.round_timeout(),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Act on one frame from the client
    pub async fn handle(&self, frame: Frame, notifier: &Notifier) {
        let command = match Command::from_byte(frame.command) {
            Some(command) => command,
            None => {
                warn!(command = frame.command, "unknown client command");
                notifier
                    .log(format!("Unknown command 0x{:02X}", frame.command))
                    .await;
                return;
            }
        };

        if command == Command::RequestPoolState {
            notifier.pool_state(self.pool.snapshot().into()).await;
            return;
        }

        if !command.is_start() {
            warn!(?command, "command not accepted from a client");
            notifier
                .log(format!("Unexpected command 0x{:02X}", frame.command))
                .await;
            return;
        }

        let request = match StartRequest::decode(&frame.payload, command.start_has_flag()) {
            Ok(request) => request,
            Err(e) => {
                warn!(?command, error = %e, "malformed start request");
                notifier.log(format!("Malformed start request: {}", e)).await;
                notifier.calculation_failed().await;
                return;
            }
        };

        let job = self.build_job(command, &request, notifier.clone());
        let name = job.name();
        self.queue.enqueue(job);
        info!(job = %name, matrix = %request.matrix_file, queued = self.queue.len(), "job queued");
        notifier.log(format!("Job '{}' queued", name)).await;
    }

    /// Map a start command onto a job
    ///
    /// `StartDistributed` always waits for the nodes-file worker count. Seidel
    /// commands run on the pool with whatever workers exist when the request
    /// is flagged distributed, and on the master otherwise.
    pub fn build_job(&self, command: Command, request: &StartRequest, notifier: Notifier) -> Job {
        let params = SolveParams::from_request(request);
        match command.seidel_mode() {
            Some(mode) if request.is_distributed => {
                self.distributed(notifier, params, mode, AcquisitionPolicy::BestEffort)
            }
            Some(mode) => SeidelJob::new(notifier, params, mode).into(),
            None if command == Command::StartGaussLinear => LinearJob::new(notifier, params).into(),
            None => self.distributed(notifier, params, SolveMode::Sequential, AcquisitionPolicy::Exact),
        }
    }

    fn distributed(
        &self,
        notifier: Notifier,
        params: SolveParams,
        mode: SolveMode,
        policy: AcquisitionPolicy,
    ) -> Job {
        DistributedJob::new(self.pool.clone(), notifier, params, mode, policy)
            .with_acquire_timeout(self.acquire_timeout)
            .with_round_timeout(self.round_timeout)
            .into()
    }
}
