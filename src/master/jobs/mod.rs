//! Jobs run by the master's scheduler
//!
//! Three kinds exist:
//!
//! - [`LinearJob`]: direct Gaussian elimination on the master
//! - [`SeidelJob`]: iterative solve on the master with one sweep strategy
//! - [`DistributedJob`]: iterative solve spread over pooled workers
//!
//! Every job reads its input files itself, reports through its [`Notifier`]
//! and, on failure, sends a log line, an "Error" status and a
//! calculation-failed frame before handing the error to the scheduler.

pub mod distributed;
pub mod linear;
pub mod seidel;

pub use distributed::{AcquisitionPolicy, DistributedJob};
pub use linear::LinearJob;
pub use seidel::SeidelJob;

use super::notifier::Notifier;
use crate::error::JobError;
use crate::protocol::StartRequest;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

/// Input files and stopping rule shared by all job kinds
#[derive(Debug, Clone, PartialEq)]
pub struct SolveParams {
    pub matrix_file: PathBuf,
    pub vector_file: PathBuf,
    pub nodes_file: PathBuf,
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl SolveParams {
    pub fn from_request(request: &StartRequest) -> Self {
        Self {
            matrix_file: PathBuf::from(&request.matrix_file),
            vector_file: PathBuf::from(&request.vector_file),
            nodes_file: PathBuf::from(&request.nodes_file),
            epsilon: request.epsilon,
            max_iterations: request.max_iterations.max(0) as usize,
        }
    }
}

/// What a finished job produced
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    pub x: Vec<f64>,
    /// Rounds run; `None` for a direct solve
    pub iterations: Option<usize>,
    pub converged: bool,
    pub elapsed: Duration,
    /// Threads (local) or summed worker threads (distributed)
    pub resources: usize,
}

/// A queued unit of work
#[derive(Debug)]
pub enum Job {
    Linear(LinearJob),
    Seidel(SeidelJob),
    Distributed(DistributedJob),
}

impl Job {
    pub fn name(&self) -> String {
        match self {
            Job::Linear(_) => "gauss-linear".to_string(),
            Job::Seidel(job) => format!("seidel-{}", job.mode()),
            Job::Distributed(job) => format!("distributed-{}", job.mode()),
        }
    }

    pub async fn execute(self) -> Result<SolveReport, JobError> {
        match self {
            Job::Linear(job) => job.execute().await,
            Job::Seidel(job) => job.execute().await,
            Job::Distributed(job) => job.execute().await,
        }
    }
}

impl From<LinearJob> for Job {
    fn from(job: LinearJob) -> Self {
        Job::Linear(job)
    }
}

impl From<SeidelJob> for Job {
    fn from(job: SeidelJob) -> Self {
        Job::Seidel(job)
    }
}

impl From<DistributedJob> for Job {
    fn from(job: DistributedJob) -> Self {
        Job::Distributed(job)
    }
}

/// Tell the client a job failed
pub(crate) async fn report_failure(notifier: &Notifier, job: &str, err: &JobError) {
    error!(job, error = %err, "job failed");
    notifier.log(format!("{} job failed: {}", job, err)).await;
    notifier.status("Error").await;
    notifier.calculation_failed().await;
}

fn elapsed_ms(elapsed: Duration) -> i64 {
    elapsed.as_millis().min(i64::MAX as u128) as i64
}

/// Iterative stopping state shared by the local and distributed loops
#[derive(Debug, Clone, Copy)]
struct Convergence {
    epsilon: f64,
    max_iterations: usize,
    iteration: usize,
    error: f64,
}

impl Convergence {
    fn new(epsilon: f64, max_iterations: usize) -> Self {
        Self { epsilon, max_iterations, iteration: 0, error: f64::INFINITY }
    }

    fn should_continue(&self) -> bool {
        !self.converged() && self.iteration < self.max_iterations
    }

    fn record(&mut self, error: f64) {
        self.iteration += 1;
        self.error = error;
    }

    fn converged(&self) -> bool {
        self.error < self.epsilon
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    /// Files for `[[5,2],[1,3]]·x = [19,9]`, solution `[3,2]`
    pub(crate) struct SystemFiles {
        pub dir: TempDir,
        pub params: SolveParams,
    }

    pub(crate) fn write_files(matrix: &str, vector: &str, nodes: &str) -> SystemFiles {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, text: &str| {
            let path = dir.path().join(name);
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(text.as_bytes()).unwrap();
            path
        };
        let params = SolveParams {
            matrix_file: write("A.txt", matrix),
            vector_file: write("b.txt", vector),
            nodes_file: write("nodes.txt", nodes),
            epsilon: 1e-9,
            max_iterations: 1000,
        };
        SystemFiles { dir, params }
    }

    pub(crate) fn system_2x2() -> SystemFiles {
        write_files("5 2\n1 3\n", "19\n9\n", "127.0.0.1:1\n127.0.0.1:2\n")
    }

    pub(crate) fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < tol, "{:?} != {:?}", actual, expected);
        }
    }
}
