//! Job queue and the loop that drains it
//!
//! Jobs run strictly one at a time in submission order. Each job runs inside
//! its own tokio task so a panic is contained and reported like an error.

use super::jobs::Job;
use crossbeam::queue::SegQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lock-free FIFO shared by the client handlers and the scheduler
#[derive(Clone, Default)]
pub struct JobQueue {
    jobs: Arc<SegQueue<Job>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, job: Job) {
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn pop(&self) -> Option<Job> {
        self.jobs.pop()
    }
}

/// Background loop executing queued jobs
pub struct Scheduler {
    queue: JobQueue,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the loop; it sleeps `idle` between polls of an empty queue
    pub fn start(queue: JobQueue, idle: Duration, shutdown: CancellationToken) -> Self {
        let handle = tokio::spawn(run_loop(queue.clone(), idle, shutdown.clone()));
        Self { queue, shutdown, handle }
    }

    /// Jobs waiting to run
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Ask the loop to stop after the job in flight (if any)
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.handle.await {
            error!(error = %e, "scheduler loop panicked");
        }
        let left = self.queue.len();
        if left > 0 {
            warn!(left, "scheduler stopped with jobs still queued");
        }
    }
}

async fn run_loop(queue: JobQueue, idle: Duration, shutdown: CancellationToken) {
    info!("scheduler started");

    while !shutdown.is_cancelled() {
        let job = match queue.pop() {
            Some(job) => job,
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(idle) => {}
                }
                continue;
            }
        };

        let name = job.name();
        info!(job = %name, queued = queue.len(), "job starting");
        let started = Instant::now();

        match tokio::spawn(job.execute()).await {
            Ok(Ok(report)) => info!(
                job = %name,
                converged = report.converged,
                iterations = ?report.iterations,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job finished"
            ),
            Ok(Err(e)) => error!(job = %name, error = %e, "job failed"),
            Err(e) => error!(job = %name, error = %e, "job panicked"),
        }
    }

    info!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::jobs::test_support::*;
    use crate::master::jobs::{LinearJob, SeidelJob};
    use crate::master::notifier::Notifier;
    use crate::compute::SolveMode;
    use crate::protocol::{read_frame, Command};

    #[tokio::test]
    async fn test_runs_jobs_in_order_after_failure() {
        let files = system_2x2();
        let mut broken = files.params.clone();
        broken.matrix_file = files.dir.path().join("missing.txt");

        let (writer, mut reader) = tokio::io::duplex(1 << 20);
        let notifier = Notifier::new(writer);
        let queue = JobQueue::new();
        queue.enqueue(LinearJob::new(notifier.clone(), broken).into());
        queue.enqueue(SeidelJob::new(notifier.clone(), files.params.clone(), SolveMode::Sequential).into());
        assert_eq!(queue.len(), 2);

        let scheduler = Scheduler::start(queue.clone(), Duration::from_millis(10), CancellationToken::new());

        let mut seen = Vec::new();
        loop {
            let frame = read_frame(&mut reader).await.unwrap();
            if frame.command == Command::CalculationFailed.code() || frame.command == Command::ResultReady.code() {
                seen.push(frame.command);
            }
            if frame.command == Command::ResultReady.code() {
                break;
            }
        }
        assert_eq!(seen, vec![Command::CalculationFailed.code(), Command::ResultReady.code()]);
        assert!(scheduler.is_empty());

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_ends_idle_loop() {
        let scheduler = Scheduler::start(JobQueue::new(), Duration::from_secs(60), CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_jobs_queued_after_stop_stay_queued() {
        let token = CancellationToken::new();
        token.cancel();
        let queue = JobQueue::new();
        let scheduler = Scheduler::start(queue.clone(), Duration::from_millis(10), token);
        queue.enqueue(LinearJob::new(Notifier::detached(), system_2x2().params).into());
        scheduler.shutdown().await;
        assert_eq!(queue.len(), 1);
    }
}
