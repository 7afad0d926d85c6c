//! Row sweep engine
//!
//! One sweep recomputes every row of a [`RowBlock`] from the previous
//! iteration vector:
//!
//! ```text
//! x_i = (b_i - sum_{j != i} A[i][j] * x_j) / A[i][i]
//! ```
//!
//! All off-diagonal terms read the vector passed in, never values updated
//! earlier in the same sweep, so rows are independent and can be split across
//! threads freely. Every [`SolveMode`] produces bit-identical output.

use crate::error::ComputeError;
use crate::linalg::{partition_rows, LinearSystem};
use crate::protocol::TaskAssignment;
use rayon::prelude::*;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Diagonal entries below this magnitude produce a zero update
pub const DIAGONAL_EPSILON: f64 = 1e-12;

/// Concurrency strategy for one sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SolveMode {
    /// Plain loop on one thread
    #[default]
    Sequential = 0,
    /// rayon parallel iterator over rows
    DataParallel = 1,
    /// One scoped OS thread per contiguous chunk
    ManualThreads = 2,
    /// One blocking runtime task per chunk, awaited together
    TaskFanOut = 3,
}

impl SolveMode {
    pub const ALL: [SolveMode; 4] = [
        SolveMode::Sequential,
        SolveMode::DataParallel,
        SolveMode::ManualThreads,
        SolveMode::TaskFanOut,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SolveMode::Sequential),
            1 => Some(SolveMode::DataParallel),
            2 => Some(SolveMode::ManualThreads),
            3 => Some(SolveMode::TaskFanOut),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SolveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolveMode::Sequential => "sequential",
            SolveMode::DataParallel => "data-parallel",
            SolveMode::ManualThreads => "manual-threads",
            SolveMode::TaskFanOut => "task-fan-out",
        };
        f.write_str(name)
    }
}

/// Result of one sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutput {
    /// New values for the block's rows, in row order
    pub values: Vec<f64>,
    /// Threads or tasks the sweep actually used
    pub threads_used: usize,
}

/// Contiguous rows of a system together with their right-hand side
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock {
    start_row: usize,
    row_count: usize,
    matrix_size: usize,
    /// `row_count * matrix_size`, row-major
    matrix: Vec<f64>,
    b: Vec<f64>,
}

impl RowBlock {
    /// Block covering the whole system
    pub fn from_system(system: &LinearSystem) -> Self {
        let n = system.size();
        let mut matrix = Vec::with_capacity(n * n);
        for i in 0..n {
            matrix.extend_from_slice(system.a.row(i));
        }
        Self {
            start_row: 0,
            row_count: n,
            matrix_size: n,
            matrix,
            b: system.b.clone(),
        }
    }

    pub fn from_assignment(task: TaskAssignment) -> Self {
        Self {
            start_row: task.start_row,
            row_count: task.row_count,
            matrix_size: task.matrix_size,
            matrix: task.matrix,
            b: task.b,
        }
    }

    pub fn start_row(&self) -> usize {
        self.start_row
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn matrix_size(&self) -> usize {
        self.matrix_size
    }

    fn check_vector(&self, x: &[f64]) -> Result<(), ComputeError> {
        if x.len() != self.matrix_size {
            return Err(ComputeError::VectorLength {
                expected: self.matrix_size,
                actual: x.len(),
            });
        }
        Ok(())
    }

    /// New value for local row `local`
    fn update_row(&self, local: usize, x: &[f64]) -> f64 {
        let n = self.matrix_size;
        let row = &self.matrix[local * n..(local + 1) * n];
        let global = self.start_row + local;

        let diagonal = row[global];
        if diagonal.abs() < DIAGONAL_EPSILON {
            return 0.0;
        }

        let mut sum = 0.0;
        for (j, (a, v)) in row.iter().zip(x).enumerate() {
            if j != global {
                sum += a * v;
            }
        }
        (self.b[local] - sum) / diagonal
    }

    /// Fill `out` with updates for local rows `rows`
    fn sweep_range(&self, rows: Range<usize>, x: &[f64], out: &mut [f64]) {
        for (slot, local) in out.iter_mut().zip(rows) {
            *slot = self.update_row(local, x);
        }
    }

    /// Number of chunks used by the threaded strategies
    fn chunk_count(&self) -> usize {
        num_cpus::get().min(self.row_count).max(1)
    }

    pub fn sweep_sequential(&self, x: &[f64]) -> Result<SweepOutput, ComputeError> {
        self.check_vector(x)?;
        let mut values = vec![0.0; self.row_count];
        self.sweep_range(0..self.row_count, x, &mut values);
        Ok(SweepOutput { values, threads_used: 1 })
    }

    pub fn sweep_data_parallel(&self, x: &[f64]) -> Result<SweepOutput, ComputeError> {
        self.check_vector(x)?;
        let values = (0..self.row_count)
            .into_par_iter()
            .map(|local| self.update_row(local, x))
            .collect();
        Ok(SweepOutput {
            values,
            threads_used: rayon::current_num_threads(),
        })
    }

    pub fn sweep_manual_threads(&self, x: &[f64]) -> Result<SweepOutput, ComputeError> {
        self.check_vector(x)?;
        let chunks = partition_rows(self.row_count, self.chunk_count());
        let mut values = vec![0.0; self.row_count];

        crossbeam::thread::scope(|scope| {
            let mut rest = values.as_mut_slice();
            for chunk in &chunks {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(chunk.count);
                rest = tail;
                scope.spawn(move |_| self.sweep_range(chunk.rows(), x, head));
            }
        })
        .map_err(|_| ComputeError::Join("sweep thread panicked".to_string()))?;

        Ok(SweepOutput { values, threads_used: chunks.len() })
    }

    /// Spread chunks over the blocking pool and await them together
    pub async fn sweep_task_fan_out(
        self: &Arc<Self>,
        x: Arc<Vec<f64>>,
    ) -> Result<SweepOutput, ComputeError> {
        self.check_vector(&x)?;
        let chunks = partition_rows(self.row_count, self.chunk_count());
        let tasks = chunks.len();

        let handles = chunks.into_iter().map(|chunk| {
            let block = Arc::clone(self);
            let x = Arc::clone(&x);
            tokio::task::spawn_blocking(move || {
                let mut out = vec![0.0; chunk.count];
                block.sweep_range(chunk.rows(), &x, &mut out);
                out
            })
        });

        let parts = futures::future::try_join_all(handles)
            .await
            .map_err(|e| ComputeError::Join(e.to_string()))?;

        Ok(SweepOutput { values: parts.concat(), threads_used: tasks })
    }
}

/// Run one sweep of `block` with `mode`
///
/// CPU-bound strategies run on the blocking pool so the calling runtime
/// worker stays free for I/O.
pub async fn sweep(
    block: &Arc<RowBlock>,
    x: Vec<f64>,
    mode: SolveMode,
) -> Result<SweepOutput, ComputeError> {
    if mode == SolveMode::TaskFanOut {
        return block.sweep_task_fan_out(Arc::new(x)).await;
    }

    let block = Arc::clone(block);
    tokio::task::spawn_blocking(move || match mode {
        SolveMode::Sequential => block.sweep_sequential(&x),
        SolveMode::DataParallel => block.sweep_data_parallel(&x),
        _ => block.sweep_manual_threads(&x),
    })
    .await
    .map_err(|e| ComputeError::Join(e.to_string()))?
}
