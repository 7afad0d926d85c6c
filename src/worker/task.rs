//! Worker task state
//!
//! ```text
//!            SET_TASK              RESET
//!   Unset ------------> Set ----------------> Unset
//!                        |  ^
//!                        +--+ SET_TASK (replaces block)
//! ```

use crate::compute::{self, RowBlock, SolveMode, SweepOutput};
use crate::error::ComputeError;
use crate::protocol::TaskAssignment;
use std::sync::Arc;

/// Row block currently held by this worker, if any
#[derive(Debug, Default)]
pub enum WorkerTask {
    #[default]
    Unset,
    Set(Arc<RowBlock>),
}

impl WorkerTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new block, replacing any previous one
    pub fn assign(&mut self, task: TaskAssignment) {
        *self = WorkerTask::Set(Arc::new(RowBlock::from_assignment(task)));
    }

    pub fn reset(&mut self) {
        *self = WorkerTask::Unset;
    }

    pub fn is_set(&self) -> bool {
        matches!(self, WorkerTask::Set(_))
    }

    pub fn block(&self) -> Option<&Arc<RowBlock>> {
        match self {
            WorkerTask::Set(block) => Some(block),
            WorkerTask::Unset => None,
        }
    }

    /// Sweep the held rows against `x`
    ///
    /// Fails with [`ComputeError::InvalidState`] when no task is assigned.
    pub async fn compute(&self, x: Vec<f64>, mode: SolveMode) -> Result<SweepOutput, ComputeError> {
        let block = self.block().ok_or(ComputeError::InvalidState)?;
        compute::sweep(block, x, mode).await
    }
}
