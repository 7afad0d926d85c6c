//! Iterative solve on the master

use super::{elapsed_ms, report_failure, Convergence, SolveParams, SolveReport};
use crate::compute::{self, RowBlock, SolveMode};
use crate::error::JobError;
use crate::linalg::{euclidean_distance, input};
use crate::master::notifier::Notifier;
use crate::protocol::ResultReady;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Progress is reported every this many iterations, plus once at the end
const PROGRESS_EVERY: usize = 10;

/// Gauss-Seidel style iteration over the whole system with one sweep strategy
#[derive(Debug)]
pub struct SeidelJob {
    notifier: Notifier,
    params: SolveParams,
    mode: SolveMode,
}

impl SeidelJob {
    pub fn new(notifier: Notifier, params: SolveParams, mode: SolveMode) -> Self {
        Self { notifier, params, mode }
    }

    pub fn mode(&self) -> SolveMode {
        self.mode
    }

    pub async fn execute(self) -> Result<SolveReport, JobError> {
        let result = self.run().await;
        if let Err(e) = &result {
            report_failure(&self.notifier, "Seidel", e).await;
        }
        result
    }

    async fn run(&self) -> Result<SolveReport, JobError> {
        self.notifier.status("Reading files").await;
        let system = input::read_system(&self.params.matrix_file, &self.params.vector_file).await?;
        let n = system.size();
        self.notifier
            .log(format!("Loaded {}x{} system, strategy {}", n, n, self.mode))
            .await;

        self.notifier.status("Computing").await;
        let block = Arc::new(RowBlock::from_system(&system));
        let mut x = vec![0.0; n];
        let mut convergence = Convergence::new(self.params.epsilon, self.params.max_iterations);
        let mut threads_used = 1;
        let started = Instant::now();

        while convergence.should_continue() {
            let output = compute::sweep(&block, x.clone(), self.mode).await?;
            let error = euclidean_distance(&output.values, &x);
            x = output.values;
            threads_used = output.threads_used;
            convergence.record(error);

            if convergence.iteration % PROGRESS_EVERY == 0 {
                debug!(iteration = convergence.iteration, error, "progress");
                self.notifier.progress(convergence.iteration as i32, error).await;
            }
        }
        let elapsed = started.elapsed();

        // The loop already reported a final iteration on the interval
        if convergence.iteration == 0 || convergence.iteration % PROGRESS_EVERY != 0 {
            self.notifier
                .progress(convergence.iteration as i32, convergence.error)
                .await;
        }

        if convergence.converged() {
            self.notifier
                .log(format!("Converged after {} iterations", convergence.iteration))
                .await;
        } else {
            self.notifier
                .log(format!("Iteration limit {} reached", self.params.max_iterations))
                .await;
        }
        info!(
            mode = %self.mode,
            iterations = convergence.iteration,
            converged = convergence.converged(),
            elapsed_ms = elapsed_ms(elapsed),
            "local solve finished"
        );

        self.notifier
            .distributed_result(&ResultReady {
                elapsed_ms: elapsed_ms(elapsed),
                iterations: convergence.iteration as i32,
                matrix_size: n as i32,
                resources: Some(threads_used as i32),
                x: x.clone(),
            })
            .await;
        self.notifier.status("Done").await;

        Ok(SolveReport {
            x,
            iterations: Some(convergence.iteration),
            converged: convergence.converged(),
            elapsed,
            resources: threads_used,
        })
    }
}
