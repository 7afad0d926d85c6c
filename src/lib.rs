//! slae-cluster - distributed Gauss-Seidel solver for dense linear systems
//!
//! A master node accepts worker nodes and one controlling client over TCP.
//! The client submits solve jobs naming a matrix, a right-hand side and a
//! nodes file; the master runs them one at a time, either locally or by
//! splitting the rows of `A` across pooled workers and iterating until the
//! solution vector settles.
//!
//! # Architecture
//!
//! - **Wire protocol**: `u8 command | u32 LE length | payload` frames
//! - **Worker pool**: reservable connections with liveness probing
//! - **Scheduler**: lock-free FIFO drained by one background loop
//! - **Compute engine**: one row update, four concurrency strategies
//! - **Notifier**: best-effort status, progress and results to the client

pub mod client;
pub mod compute;
pub mod config;
pub mod error;
pub mod linalg;
pub mod master;
pub mod protocol;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use compute::SolveMode;
pub use config::Config;
pub use error::JobError;
pub use linalg::LinearSystem;

/// Result type used at the application edges
pub type Result<T> = anyhow::Result<T>;
