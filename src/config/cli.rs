//! CLI argument parsing using clap

use crate::compute::SolveMode;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Master - accept workers and a client, run jobs
    Master,
    /// Worker - connect to a master and compute row blocks
    Worker,
    /// Submit - send one job to a master and print the result
    Submit,
    /// Generate - write a random diagonally dominant system to disk
    Generate,
}

/// Job kind for submit mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobKind {
    /// Distributed Gauss-Seidel with the exact worker count from the nodes file
    Distributed,
    /// Direct Gaussian elimination on the master
    Gauss,
    /// Gauss-Seidel with a chosen strategy, local or best-effort distributed
    Seidel,
}

/// Sweep strategy on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Sequential,
    DataParallel,
    ManualThreads,
    TaskFanOut,
}

/// slae-cluster - distributed Gauss-Seidel solver
#[derive(Parser, Debug)]
#[command(name = "slae-cluster")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: master, worker, submit, or generate
    #[arg(long, value_enum, default_value = "master")]
    pub mode: ExecutionMode,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log filter directive (e.g., info, debug, slae_cluster=trace)
    #[arg(long, env = "SLAE_LOG")]
    pub log_level: Option<String>,

    // === Master Options ===
    /// Address to bind the listeners to
    #[arg(long)]
    pub bind: Option<String>,

    /// Port workers connect to
    #[arg(long)]
    pub worker_port: Option<u16>,

    /// Port the client connects to
    #[arg(long)]
    pub client_port: Option<u16>,

    /// Seconds a distributed job waits for workers
    #[arg(long)]
    pub acquire_timeout: Option<u64>,

    /// Per-round receive timeout in milliseconds
    #[arg(long)]
    pub round_timeout_ms: Option<u64>,

    // === Worker / Submit Options ===
    /// Master address (host:port). Worker port in worker mode, client port in submit mode
    #[arg(long)]
    pub master: Option<String>,

    /// Exit instead of reconnecting when the master goes away (worker mode)
    #[arg(long)]
    pub no_reconnect: bool,

    // === Job Options (submit mode) ===
    /// Job to submit
    #[arg(long, value_enum, default_value = "seidel")]
    pub job: JobKind,

    /// Sweep strategy for seidel jobs
    #[arg(long, value_enum, default_value = "sequential")]
    pub strategy: StrategyArg,

    /// Run a seidel job on the worker pool instead of on the master
    #[arg(long)]
    pub distributed: bool,

    /// Matrix file (submit: path as seen by the master; generate: output path)
    #[arg(long)]
    pub matrix: Option<PathBuf>,

    /// Right-hand side vector file
    #[arg(long)]
    pub vector: Option<PathBuf>,

    /// Nodes file, one worker address per line
    #[arg(long)]
    pub nodes: Option<PathBuf>,

    /// Convergence threshold
    #[arg(long, default_value = "1e-6")]
    pub epsilon: f64,

    /// Iteration limit
    #[arg(long, default_value = "1000")]
    pub max_iterations: i32,

    // === Generate Options ===
    /// System size
    #[arg(short = 'n', long, default_value = "100")]
    pub size: usize,

    /// Number of nodes written to the nodes file
    #[arg(long, default_value = "2")]
    pub node_count: usize,

    /// RNG seed for reproducible systems
    #[arg(long)]
    pub seed: Option<u64>,
}

impl From<StrategyArg> for SolveMode {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sequential => SolveMode::Sequential,
            StrategyArg::DataParallel => SolveMode::DataParallel,
            StrategyArg::ManualThreads => SolveMode::ManualThreads,
            StrategyArg::TaskFanOut => SolveMode::TaskFanOut,
        }
    }
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.mode {
            ExecutionMode::Master | ExecutionMode::Worker => Ok(()),
            ExecutionMode::Submit => {
                if self.matrix.is_none() || self.vector.is_none() {
                    anyhow::bail!("submit mode requires --matrix and --vector");
                }
                if self.job == JobKind::Distributed && self.nodes.is_none() {
                    anyhow::bail!("distributed jobs require --nodes");
                }
                if !(self.epsilon > 0.0) {
                    anyhow::bail!("epsilon must be positive, got {}", self.epsilon);
                }
                if self.max_iterations <= 0 {
                    anyhow::bail!("max_iterations must be at least 1");
                }
                Ok(())
            }
            ExecutionMode::Generate => {
                if self.matrix.is_none() || self.vector.is_none() {
                    anyhow::bail!("generate mode requires --matrix and --vector output paths");
                }
                if self.size == 0 {
                    anyhow::bail!("size must be at least 1");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("slae-cluster").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_mode_is_master() {
        let cli = parse(&[]);
        assert_eq!(cli.mode, ExecutionMode::Master);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_submit_requires_files() {
        let cli = parse(&["--mode", "submit"]);
        assert!(cli.validate().is_err());

        let cli = parse(&["--mode", "submit", "--matrix", "A.txt", "--vector", "b.txt"]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_distributed_submit_requires_nodes() {
        let cli = parse(&[
            "--mode", "submit", "--job", "distributed", "--matrix", "A.txt", "--vector", "b.txt",
        ]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_epsilon() {
        let cli = parse(&[
            "--mode", "submit", "--matrix", "A.txt", "--vector", "b.txt", "--epsilon", "0",
        ]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_strategy_values() {
        let cli = parse(&["--strategy", "task-fan-out"]);
        assert_eq!(cli.strategy, StrategyArg::TaskFanOut);
        assert_eq!(SolveMode::from(cli.strategy), SolveMode::TaskFanOut);
    }
}
