//! Distributed solve over pooled workers
//!
//! # Flow
//!
//! 1. Read the system (input errors fail before any network traffic)
//! 2. Reserve workers according to the [`AcquisitionPolicy`]
//! 3. Split the rows into contiguous blocks and hand one to each worker
//! 4. Each round broadcasts the current vector, gathers every block's new
//!    values and stitches them together in row order
//! 5. Reset and return every reserved worker, whatever happened
//!
//! A failed round leaves unread replies on some sockets, so after any error
//! in the distribute or iterate phases all reserved workers are marked out of
//! sync and closed on return. Workers with reconnect enabled come back fresh.

use super::{elapsed_ms, report_failure, Convergence, SolveParams, SolveReport};
use crate::compute::SolveMode;
use crate::error::JobError;
use crate::linalg::{euclidean_distance, input, partition_rows, LinearSystem, RowRange};
use crate::master::notifier::Notifier;
use crate::master::pool::{WorkerHandle, WorkerPool};
use crate::protocol::{Command, IterationVector, PartialResult, ResultReady, TaskAssignment};
use futures::future::{join_all, try_join_all};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How many workers a job asks the pool for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionPolicy {
    /// One worker per entry of the nodes file, waiting for all of them
    Exact,
    /// Whatever is available now, or the first one to arrive
    BestEffort,
}

#[derive(Debug)]
pub struct DistributedJob {
    pool: WorkerPool,
    notifier: Notifier,
    params: SolveParams,
    mode: SolveMode,
    policy: AcquisitionPolicy,
    acquire_timeout: Duration,
    round_timeout: Option<Duration>,
}

/// Outcome of the iterate phase
struct Rounds {
    x: Vec<f64>,
    convergence: Convergence,
    resources: usize,
    elapsed: Duration,
}

impl DistributedJob {
    pub fn new(
        pool: WorkerPool,
        notifier: Notifier,
        params: SolveParams,
        mode: SolveMode,
        policy: AcquisitionPolicy,
    ) -> Self {
        Self {
            pool,
            notifier,
            params,
            mode,
            policy,
            acquire_timeout: Duration::from_secs(30),
            round_timeout: None,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn mode(&self) -> SolveMode {
        self.mode
    }

    pub fn policy(&self) -> AcquisitionPolicy {
        self.policy
    }

    pub async fn execute(self) -> Result<SolveReport, JobError> {
        let result = self.run().await;
        if let Err(e) = &result {
            report_failure(&self.notifier, "Distributed", e).await;
        }
        result
    }

    async fn run(&self) -> Result<SolveReport, JobError> {
        self.notifier.status("Reading files").await;
        let system = input::read_system(&self.params.matrix_file, &self.params.vector_file).await?;
        let n = system.size();
        self.notifier.log(format!("Loaded {}x{} system", n, n)).await;

        self.notifier.status("Connecting nodes").await;
        let mut workers = Reservation::new(self.pool.clone(), self.acquire().await?);
        if workers.handles.len() > n {
            let surplus = workers.handles.split_off(n);
            debug!(surplus = surplus.len(), rows = n, "returning surplus workers");
            self.pool.return_workers(surplus);
        }
        self.notifier
            .log(format!("Reserved {} workers, strategy {}", workers.handles.len(), self.mode))
            .await;

        let result = self.solve(&system, &mut workers.handles).await;
        if result.is_err() {
            for worker in workers.handles.iter_mut() {
                worker.mark_out_of_sync();
            }
        }
        self.teardown(workers).await;

        let rounds = result?;
        self.report(n, rounds).await
    }

    async fn acquire(&self) -> Result<Vec<WorkerHandle>, JobError> {
        match self.policy {
            AcquisitionPolicy::Exact => {
                let nodes = input::read_nodes(&self.params.nodes_file).await?;
                self.notifier
                    .log(format!("Waiting for {} workers", nodes.len()))
                    .await;
                Ok(self.pool.reserve_exact(nodes.len(), self.acquire_timeout).await?)
            }
            AcquisitionPolicy::BestEffort => {
                let workers = self.pool.reserve_all_available();
                if !workers.is_empty() {
                    return Ok(workers);
                }
                self.notifier.log("No workers available, waiting for one").await;
                let mut workers = self.pool.reserve_exact(1, self.acquire_timeout).await?;
                workers.extend(self.pool.reserve_all_available());
                Ok(workers)
            }
        }
    }

    async fn solve(&self, system: &LinearSystem, workers: &mut [WorkerHandle]) -> Result<Rounds, JobError> {
        if workers.is_empty() {
            return Err(JobError::NoWorkers);
        }
        let n = system.size();
        let ranges = partition_rows(n, workers.len());

        self.notifier.status("Distributing").await;
        let count = workers.len();
        for (i, (worker, range)) in workers.iter_mut().zip(&ranges).enumerate() {
            self.notifier
                .worker_status(format!(
                    "Worker {}/{} ({}): rows {}..{}",
                    i + 1,
                    count,
                    worker.addr(),
                    range.start,
                    range.end()
                ))
                .await;
            assign_task(worker, system, *range).await?;
        }
        self.notifier.log("All workers accepted their tasks").await;

        self.notifier.status("Computing").await;
        let started = Instant::now();
        let mut x = vec![0.0; n];
        let mut convergence = Convergence::new(self.params.epsilon, self.params.max_iterations);
        let mut resources = workers.len();

        while convergence.should_continue() {
            let payload = IterationVector::encode(self.mode.code(), &x);
            let payload = &payload;
            try_join_all(workers.iter_mut().map(|worker| async move {
                worker
                    .send(Command::IterationVector, payload)
                    .await
                    .map_err(|e| JobError::protocol(worker.label(), e))
            }))
            .await?;

            let round_timeout = self.round_timeout;
            let partials = try_join_all(
                workers
                    .iter_mut()
                    .zip(&ranges)
                    .map(|(worker, range)| receive_partial(worker, *range, round_timeout)),
            )
            .await?;

            let mut next = vec![0.0; n];
            resources = 0;
            for ((values, threads), range) in partials.into_iter().zip(&ranges) {
                next[range.rows()].copy_from_slice(&values);
                resources += threads;
            }

            let error = euclidean_distance(&next, &x);
            x = next;
            convergence.record(error);
            self.notifier.progress(convergence.iteration as i32, error).await;
        }

        Ok(Rounds { x, convergence, resources, elapsed: started.elapsed() })
    }

    async fn report(&self, n: usize, rounds: Rounds) -> Result<SolveReport, JobError> {
        let Rounds { x, convergence, resources, elapsed } = rounds;
        if convergence.converged() {
            self.notifier
                .log(format!("Converged after {} iterations", convergence.iteration))
                .await;
        } else {
            self.notifier
                .log(format!(
                    "Iteration limit {} reached, error {:e}",
                    self.params.max_iterations, convergence.error
                ))
                .await;
        }
        info!(
            mode = %self.mode,
            iterations = convergence.iteration,
            converged = convergence.converged(),
            resources,
            elapsed_ms = elapsed_ms(elapsed),
            "distributed solve finished"
        );

        self.notifier
            .distributed_result(&ResultReady {
                elapsed_ms: elapsed_ms(elapsed),
                iterations: convergence.iteration as i32,
                matrix_size: n as i32,
                resources: Some(resources as i32),
                x: x.clone(),
            })
            .await;
        self.notifier.status("Done").await;

        Ok(SolveReport {
            x,
            iterations: Some(convergence.iteration),
            converged: convergence.converged(),
            elapsed,
            resources,
        })
    }

    /// Reset every worker and give it back to the pool
    async fn teardown(&self, mut workers: Reservation) {
        join_all(workers.handles.iter_mut().map(|worker| async move {
            if let Err(e) = worker.send(Command::Reset, &[]).await {
                debug!(worker = %worker.addr(), error = %e, "reset failed");
            }
        }))
        .await;

        let returned = workers.handles.len();
        self.pool.return_workers(workers.take());
        self.notifier
            .log(format!(
                "Returned {} workers, {} available",
                returned,
                self.pool.available_count()
            ))
            .await;
    }
}

/// Workers owned by a running job
///
/// Dropping it with handles still inside (a panic or a cancelled job) closes
/// them and gives their slots back, so the pool's reserved count stays exact.
struct Reservation {
    pool: WorkerPool,
    handles: Vec<WorkerHandle>,
}

impl Reservation {
    fn new(pool: WorkerPool, handles: Vec<WorkerHandle>) -> Self {
        Self { pool, handles }
    }

    fn take(&mut self) -> Vec<WorkerHandle> {
        std::mem::take(&mut self.handles)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        warn!(workers = self.handles.len(), "job ended without teardown, closing its workers");
        let mut handles = self.take();
        for handle in handles.iter_mut() {
            handle.mark_out_of_sync();
        }
        self.pool.return_workers(handles);
    }
}

async fn assign_task(worker: &mut WorkerHandle, system: &LinearSystem, range: RowRange) -> Result<(), JobError> {
    let payload = TaskAssignment::encode_rows(&system.a, &system.b, range);
    worker
        .send(Command::SetTask, &payload)
        .await
        .map_err(|e| JobError::protocol(worker.label(), e))?;

    let reply = worker
        .receive()
        .await
        .map_err(|e| JobError::protocol(worker.label(), e))?;
    match Command::from_byte(reply.command) {
        Some(Command::TaskAccepted) => Ok(()),
        Some(Command::WorkerError) => Err(JobError::WorkerReported {
            worker: worker.label(),
            message: String::from_utf8_lossy(&reply.payload).into_owned(),
        }),
        _ => Err(JobError::TaskNotAccepted { worker: worker.label(), command: reply.command }),
    }
}

/// Read one round's reply; returns the block values and the worker's thread count
async fn receive_partial(
    worker: &mut WorkerHandle,
    range: RowRange,
    round_timeout: Option<Duration>,
) -> Result<(Vec<f64>, usize), JobError> {
    let frame = match round_timeout {
        Some(timeout) => tokio::time::timeout(timeout, worker.receive())
            .await
            .map_err(|_| JobError::RoundTimeout { worker: worker.label(), timeout })?,
        None => worker.receive().await,
    }
    .map_err(|e| JobError::protocol(worker.label(), e))?;

    match Command::from_byte(frame.command) {
        Some(Command::PartialResult) => {
            let partial =
                PartialResult::decode(&frame.payload).map_err(|e| JobError::payload(worker.label(), e))?;
            if partial.values.len() != range.count {
                return Err(JobError::PartialLength {
                    worker: worker.label(),
                    expected: range.count,
                    actual: partial.values.len(),
                });
            }
            let threads = partial.used_threads.unwrap_or(1).max(0) as usize;
            Ok((partial.values, threads))
        }
        Some(Command::WorkerError) => {
            let message = String::from_utf8_lossy(&frame.payload).into_owned();
            warn!(worker = %worker.addr(), %message, "worker reported an error");
            Err(JobError::WorkerReported { worker: worker.label(), message })
        }
        _ => Err(JobError::UnexpectedReply { worker: worker.label(), command: frame.command }),
    }
}
