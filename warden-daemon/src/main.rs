use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use warden_daemon::default_service_dirs;
use warden_daemon::env::ProcessEnv;
use warden_daemon::graph::ServiceGraph;
use warden_daemon::loader::ServiceLoader;
use warden_daemon::source::DirServiceSource;
use warden_daemon::supervisor::create_supervisor;

type Loader = ServiceLoader<DirServiceSource, ProcessEnv>;

/// Warden - dependency-aware service supervisor
#[derive(Parser)]
#[command(name = "warden-daemon", version, about = "Dependency-aware service supervisor")]
struct Args {
    /// Directory containing service descriptions (repeatable; earlier wins)
    #[arg(short = 'd', long = "services-dir", value_name = "DIR")]
    services_dirs: Vec<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start services and supervise them until SIGINT or SIGTERM
    Run {
        #[arg(default_value = "boot")]
        services: Vec<String>,
    },
    /// Load services and report every problem found in their descriptions
    Check {
        #[arg(default_value = "boot")]
        services: Vec<String>,
    },
    /// Print the dependency graph in Graphviz format
    Graph {
        /// Services to include along with their dependencies
        #[arg(default_value = "boot")]
        services: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(args.log_level.into()),
        )
        .init();

    let dirs = if args.services_dirs.is_empty() {
        default_service_dirs()
    } else {
        args.services_dirs
    };
    let loader = ServiceLoader::new(DirServiceSource::new(dirs), ProcessEnv);

    match args.command {
        Command::Run { services } => run(loader, &services).await,
        Command::Check { services } => check(&loader, &services),
        Command::Graph { services } => graph(&loader, &services),
    }
}

async fn run(loader: Loader, services: &[String]) -> Result<()> {
    let base_dir = std::env::current_dir().context("Cannot determine working directory")?;
    info!("Starting warden daemon");
    let (handle, task) = create_supervisor(loader, base_dir);

    for name in services {
        // A service that fails to load is reported and skipped
        if let Err(e) = handle.start(name).await {
            error!("Cannot start service {}: {}", name, e);
        }
    }

    let mut sigterm = signal(SignalKind::terminate()).context("Cannot install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Cannot install SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    handle.shutdown().await?;
    task.await.context("Supervisor task panicked")?;
    info!("All services stopped");
    Ok(())
}

/// Check every reachable description independently, so one broken service does
/// not hide problems in the others. Cycles are checked by loading the roots.
fn check(loader: &Loader, roots: &[String]) -> Result<()> {
    let mut problems = 0;
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = roots.iter().cloned().collect();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        println!("Checking service: {}...", name);
        match loader.read_service(&name) {
            Ok((_, deps)) => queue.extend(deps.into_iter().map(|dep| dep.name)),
            Err(e) => {
                println!("  {}", e);
                problems += 1;
            }
        }
    }

    if problems == 0 {
        let mut graph = ServiceGraph::new();
        for root in roots {
            if let Err(e) = loader.load(&mut graph, root) {
                println!("{}", e);
                problems += 1;
            }
        }
    }

    if problems > 0 {
        bail!("{} problem(s) found", problems);
    }
    println!("No problems found.");
    Ok(())
}

fn graph(loader: &Loader, roots: &[String]) -> Result<()> {
    let mut graph = ServiceGraph::new();
    let mut ids = Vec::with_capacity(roots.len());
    for root in roots {
        ids.push(loader.load(&mut graph, root)?);
    }
    print!("{}", graph.to_dot(&ids));
    Ok(())
}
