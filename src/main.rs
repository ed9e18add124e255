use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mpmd_coupler::comm::{CommunicationBackend, LocalUniverse};
use mpmd_coupler::config::{RoleConfig, SolverConfig, TrackerConfig};
use mpmd_coupler::coupling;
use mpmd_coupler::demo;
use mpmd_coupler::error::{CouplerError, Result};
use mpmd_coupler::stats::Stats;

/// Coupled solver/tracker run over a shared process universe
#[derive(Parser)]
#[command(name = "mpmd-coupler", version)]
struct Cli {
    /// Print exchange stats to stderr
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Produce the velocity field (one process per solver rank)
    #[command(allow_negative_numbers = true)]
    Solver {
        /// Seconds of simulated compute per iteration
        delay: f64,
        iterations: usize,
        grid_points: i64,
        /// Group label; defaults to "solver"
        #[arg(long)]
        label: Option<String>,
    },
    /// Track particles through the received field (requires a solver)
    #[command(allow_negative_numbers = true)]
    Tracker {
        /// Seconds of simulated compute per iteration
        delay: f64,
        iterations: usize,
        grid_points: i64,
        particles: i64,
        /// Group label; defaults to "tracker"
        #[arg(long)]
        label: Option<String>,
    },
    /// Run solver and tracker ranks together inside this process
    #[command(allow_negative_numbers = true)]
    Local {
        #[arg(long, default_value_t = 1)]
        solvers: usize,
        #[arg(long, default_value_t = 1)]
        trackers: usize,
        /// Fail a rank whose receive waits longer than this many seconds
        #[arg(long)]
        timeout: Option<f64>,
        delay: f64,
        iterations: usize,
        grid_points: i64,
        particles: i64,
    },
    /// Broadcast between the two halves of the universe, fenced by barriers
    Collectives {
        /// Run this many ranks inside this process instead of under a launcher
        #[arg(long)]
        local: Option<usize>,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version print to stdout and succeed.
            let failed = e.use_stderr();
            let _ = e.print();
            return if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let ok = match cli.command {
        Command::Solver {
            delay,
            iterations,
            grid_points,
            label,
        } => {
            let config = RoleConfig::Solver(SolverConfig {
                delay_secs: delay,
                iterations,
                grid_points,
            });
            run_launched(&config, label.as_deref(), cli.stats)
        }
        Command::Tracker {
            delay,
            iterations,
            grid_points,
            particles,
            label,
        } => {
            let config = RoleConfig::Tracker(TrackerConfig {
                delay_secs: delay,
                iterations,
                grid_points,
                particles,
            });
            run_launched(&config, label.as_deref(), cli.stats)
        }
        Command::Local {
            solvers,
            trackers,
            timeout,
            delay,
            iterations,
            grid_points,
            particles,
        } => {
            let solver = SolverConfig {
                delay_secs: delay,
                iterations,
                grid_points,
            };
            let tracker = TrackerConfig {
                delay_secs: delay,
                iterations,
                grid_points,
                particles,
            };
            run_local(solvers, trackers, timeout, &solver, &tracker, cli.stats)
        }
        Command::Collectives { local: Some(size) } => match local_universe(size, None) {
            Ok(universe) => all_ranks_ok(universe.run(|comm| demo_rank(&comm))),
            Err(e) => {
                eprintln!("{e}");
                false
            }
        },
        Command::Collectives { local: None } => with_launched_comm(demo_rank),
    };

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run `body` as one process of a universe assigned by the launcher.
#[cfg(feature = "distributed")]
fn with_launched_comm(body: impl FnOnce(&dyn CommunicationBackend) -> bool) -> bool {
    use mpmd_coupler::comm::mpi_backend::MpiComm;

    let Some(_universe) = mpi::initialize() else {
        eprintln!("MPI initialization failed");
        return false;
    };
    body(&MpiComm::new())
}

/// Without MPI the universe holds only this process.
#[cfg(not(feature = "distributed"))]
fn with_launched_comm(body: impl FnOnce(&dyn CommunicationBackend) -> bool) -> bool {
    body(&mpmd_coupler::comm::SingleProcessComm)
}

fn run_launched(config: &RoleConfig, label: Option<&str>, show_stats: bool) -> bool {
    with_launched_comm(|comm| run_rank(comm, config, label, show_stats))
}

fn run_local(
    solvers: usize,
    trackers: usize,
    timeout: Option<f64>,
    solver: &SolverConfig,
    tracker: &TrackerConfig,
    show_stats: bool,
) -> bool {
    let universe = match local_universe(solvers + trackers, timeout) {
        Ok(universe) => universe,
        Err(e) => {
            eprintln!("{e}");
            return false;
        }
    };

    let outcomes = universe.run(|comm| {
        let config = if comm.rank() < solvers {
            RoleConfig::Solver(solver.clone())
        } else {
            RoleConfig::Tracker(tracker.clone())
        };
        run_rank(&comm, &config, None, show_stats)
    });

    all_ranks_ok(outcomes)
}

fn all_ranks_ok(outcomes: Result<Vec<bool>>) -> bool {
    match outcomes {
        Ok(outcomes) => outcomes.into_iter().all(|ok| ok),
        Err(e) => {
            eprintln!("Local universe error: {e}");
            false
        }
    }
}

fn local_universe(size: usize, timeout: Option<f64>) -> Result<LocalUniverse> {
    if size == 0 {
        return Err(CouplerError::Usage(
            "the local universe needs at least one process".into(),
        ));
    }
    match timeout {
        None => Ok(LocalUniverse::new(size)),
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map(|timeout| LocalUniverse::with_timeout(size, timeout))
            .map_err(|e| CouplerError::Usage(format!("invalid --timeout {secs}: {e}"))),
    }
}

fn run_rank(
    comm: &dyn CommunicationBackend,
    config: &RoleConfig,
    label: Option<&str>,
    show_stats: bool,
) -> bool {
    let _span = tracing::info_span!("rank", global = comm.rank()).entered();
    let mut stats = show_stats.then(Stats::new);

    match coupling::run(comm, config, label, stats.as_mut()) {
        Ok(_) => {
            if let Some(ref stats) = stats {
                stats.display(config.role(), comm.rank());
            }
            true
        }
        Err(e) => {
            tracing::error!("{e}. Exiting.");
            false
        }
    }
}

fn demo_rank(comm: &dyn CommunicationBackend) -> bool {
    let _span = tracing::info_span!("rank", global = comm.rank()).entered();
    match demo::run_broadcasts(comm) {
        Ok(_) => true,
        Err(e) => {
            tracing::error!("{e}. Exiting.");
            false
        }
    }
}
