//! Error types shared across the solver
//!
//! Frame and payload errors live next to their codecs in [`crate::protocol`].

use crate::protocol::{FrameError, PayloadError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Problems with the matrix, vector or nodes files
#[derive(Error, Debug)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: cannot parse '{token}' as a number")]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },

    #[error("dimension mismatch: {0}")]
    Dimension(String),

    #[error("{path} contains no data")]
    Empty { path: PathBuf },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("timed out after {waited:?} waiting for {requested} workers ({available} available)")]
    Timeout {
        requested: usize,
        available: usize,
        waited: Duration,
    },
}

/// Direct (elimination) solver failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("matrix is singular or nearly singular (pivot in column {column})")]
    Singular { column: usize },
}

/// Row sweep failures on a worker or in a local job
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error("no task assigned")]
    InvalidState,

    #[error("iteration vector has {actual} entries, matrix size is {expected}")]
    VectorLength { expected: usize, actual: usize },

    #[error("unknown solve mode {0}")]
    UnknownMode(u8),

    #[error("compute task failed: {0}")]
    Join(String),
}

/// Anything that aborts a job
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Solve(#[from] SolveError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("no workers available")]
    NoWorkers,

    #[error("worker {worker}: {source}")]
    Protocol {
        worker: String,
        #[source]
        source: FrameError,
    },

    #[error("worker {worker} sent a malformed payload: {source}")]
    Payload {
        worker: String,
        #[source]
        source: PayloadError,
    },

    #[error("worker {worker} did not accept its task (replied 0x{command:02X})")]
    TaskNotAccepted { worker: String, command: u8 },

    #[error("worker {worker} reported an error: {message}")]
    WorkerReported { worker: String, message: String },

    #[error("worker {worker} sent unexpected command 0x{command:02X}")]
    UnexpectedReply { worker: String, command: u8 },

    #[error("worker {worker} returned {actual} values for {expected} rows")]
    PartialLength {
        worker: String,
        expected: usize,
        actual: usize,
    },

    #[error("worker {worker} did not answer within {timeout:?}")]
    RoundTimeout { worker: String, timeout: Duration },

    #[error("job task failed: {0}")]
    Join(String),
}

impl JobError {
    pub fn protocol(worker: impl Into<String>, source: FrameError) -> Self {
        JobError::Protocol { worker: worker.into(), source }
    }

    pub fn payload(worker: impl Into<String>, source: PayloadError) -> Self {
        JobError::Payload { worker: worker.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = JobError::TaskNotAccepted { worker: "10.0.0.2:5123".into(), command: 0xFE };
        assert_eq!(
            err.to_string(),
            "worker 10.0.0.2:5123 did not accept its task (replied 0xFE)"
        );

        let err: JobError = PoolError::Timeout {
            requested: 3,
            available: 1,
            waited: Duration::from_millis(500),
        }
        .into();
        assert!(err.to_string().contains("3 workers"));
    }
}
