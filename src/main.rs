//! slae-cluster CLI entry point

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use slae_cluster::client::{MasterClient, MasterEvent};
use slae_cluster::config::cli::{Cli, ExecutionMode, JobKind};
use slae_cluster::config::{toml::load_config, validator::validate_config, Config};
use slae_cluster::linalg::generate::{diagonally_dominant, write_system_files};
use slae_cluster::master::MasterServer;
use slae_cluster::protocol::{Command, StartRequest};
use slae_cluster::util::logger;
use slae_cluster::worker::WorkerService;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Solution entries printed in submit mode
const PREVIEW_LEN: usize = 10;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    let config = load_config(&cli)?;
    validate_config(&config).context("Configuration validation failed")?;
    logger::init(&config.logging)?;

    match cli.mode {
        ExecutionMode::Master => run_master(config),
        ExecutionMode::Worker => run_worker(config),
        ExecutionMode::Submit => run_submit(&cli, &config),
        ExecutionMode::Generate => run_generate(&cli),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create tokio runtime")
}

/// Token cancelled on ctrl-c
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received, shutting down");
                trigger.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });
    token
}

fn run_master(config: Config) -> Result<()> {
    runtime()?.block_on(async {
        let shutdown = shutdown_on_ctrl_c();
        MasterServer::new(config.master).run(shutdown).await
    })
}

fn run_worker(config: Config) -> Result<()> {
    runtime()?.block_on(async {
        let shutdown = shutdown_on_ctrl_c();
        WorkerService::new(config.worker).run(shutdown).await
    })
}

fn run_submit(cli: &Cli, config: &Config) -> Result<()> {
    let master = cli
        .master
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", config.master.client_port));

    let path_arg = |p: &Option<std::path::PathBuf>| {
        p.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
    };
    let request = StartRequest {
        is_distributed: cli.distributed,
        matrix_file: path_arg(&cli.matrix),
        vector_file: path_arg(&cli.vector),
        nodes_file: path_arg(&cli.nodes),
        epsilon: cli.epsilon,
        max_iterations: cli.max_iterations,
    };
    let command = match cli.job {
        JobKind::Distributed => Command::StartDistributed,
        JobKind::Gauss => Command::StartGaussLinear,
        JobKind::Seidel => Command::seidel_start(cli.strategy.into()),
    };

    runtime()?.block_on(async {
        let mut client = MasterClient::connect(&master).await?;
        client.submit(command, &request).await?;
        println!("Submitted {:?} to {}", command, master);

        loop {
            let event = client.next_event().await?;
            print_event(&event);
            match event {
                MasterEvent::CalculationFailed => anyhow::bail!("calculation failed on the master"),
                e if e.is_terminal() => return Ok(()),
                _ => {}
            }
        }
    })
}

fn print_event(event: &MasterEvent) {
    match event {
        MasterEvent::Status(s) => println!("[status] {}", s),
        MasterEvent::WorkerStatus(s) => println!("[worker] {}", s),
        MasterEvent::Log(s) => println!("[log] {}", s),
        MasterEvent::Progress(p) => println!("[progress] iteration {} error {:.3e}", p.iteration, p.error),
        MasterEvent::PoolState(p) => println!("[pool] {}/{} workers available", p.available, p.total),
        MasterEvent::Result(r) => {
            println!();
            println!("Result: {}x{} system", r.matrix_size, r.matrix_size);
            println!("  Iterations: {}", r.iterations);
            println!("  Elapsed:    {} ms", r.elapsed_ms);
            if let Some(resources) = r.resources {
                println!("  Threads:    {}", resources);
            }
            let shown: Vec<String> = r.x.iter().take(PREVIEW_LEN).map(|v| format!("{:.6}", v)).collect();
            let more = if r.x.len() > PREVIEW_LEN { ", ..." } else { "" };
            println!("  x = [{}{}]", shown.join(", "), more);
        }
        MasterEvent::LinearResult(r) => {
            println!();
            println!("Gaussian elimination: {}x{} system in {} ms", r.matrix_size, r.matrix_size, r.elapsed_ms);
        }
        MasterEvent::CalculationFailed => println!("[failed] calculation failed"),
        MasterEvent::Unknown(frame) => println!("[unknown] command 0x{:02X}", frame.command),
    }
}

fn run_generate(cli: &Cli) -> Result<()> {
    let (matrix, vector) = match (&cli.matrix, &cli.vector) {
        (Some(m), Some(v)) => (m, v),
        _ => anyhow::bail!("generate mode requires --matrix and --vector output paths"),
    };

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let (system, _) = diagonally_dominant(cli.size, &mut rng);

    let node_address = cli.master.clone().unwrap_or_else(|| "127.0.0.1".to_string());
    let nodes = cli
        .nodes
        .as_deref()
        .map(|path| (path, cli.node_count, node_address.as_str()));
    write_system_files(&system, matrix, vector, nodes)?;

    println!("Wrote {}x{} system to {} and {}", cli.size, cli.size, matrix.display(), vector.display());
    if let Some(nodes) = &cli.nodes {
        println!("Wrote {} node entries to {}", cli.node_count, nodes.display());
    }
    println!("Exact solution: x[i] = i + 1");
    Ok(())
}
