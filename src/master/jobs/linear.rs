//! Direct solve on the master

use super::{elapsed_ms, report_failure, SolveParams, SolveReport};
use crate::error::JobError;
use crate::linalg::{gauss, input};
use crate::master::notifier::Notifier;
use crate::protocol::LinearResult;
use std::time::Instant;
use tracing::info;

/// Gaussian elimination with partial pivoting
#[derive(Debug)]
pub struct LinearJob {
    notifier: Notifier,
    params: SolveParams,
}

impl LinearJob {
    pub fn new(notifier: Notifier, params: SolveParams) -> Self {
        Self { notifier, params }
    }

    pub async fn execute(self) -> Result<SolveReport, JobError> {
        let result = self.run().await;
        if let Err(e) = &result {
            report_failure(&self.notifier, "Gauss", e).await;
        }
        result
    }

    async fn run(&self) -> Result<SolveReport, JobError> {
        self.notifier.status("Reading files").await;
        let system = input::read_system(&self.params.matrix_file, &self.params.vector_file).await?;
        let n = system.size();
        self.notifier.log(format!("Loaded {}x{} system", n, n)).await;

        self.notifier.status("Computing").await;
        let started = Instant::now();
        let x = tokio::task::spawn_blocking(move || gauss::solve(&system))
            .await
            .map_err(|e| JobError::Join(e.to_string()))??;
        let elapsed = started.elapsed();

        info!(size = n, elapsed_ms = elapsed_ms(elapsed), "direct solve finished");
        self.notifier
            .log(format!("Gaussian elimination finished in {} ms", elapsed_ms(elapsed)))
            .await;
        self.notifier
            .linear_result(LinearResult {
                elapsed_ms: elapsed_ms(elapsed),
                iterations: -1,
                matrix_size: n as i32,
            })
            .await;
        self.notifier.status("Done").await;

        Ok(SolveReport { x, iterations: None, converged: true, elapsed, resources: 1 })
    }
}
