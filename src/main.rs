use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use meshmon::breaker::CircuitBreaker;
use meshmon::catalog::{Period, Role};
use meshmon::charts::{self, ChartOptions, NoopRenderer};
use meshmon::config::Config;
use meshmon::report;
use meshmon::store::MemoryStore;

/// Mesh-radio node monitor.
#[derive(Parser)]
#[command(name = "meshmon", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute chart statistics and report rollups from the stored metrics.
    Report,

    /// Show circuit breaker state per node.
    Status,

    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Target OS.
    pub fn target_os() -> &'static str {
        std::env::consts::OS
    }

    /// Target architecture.
    pub fn target_arch() -> &'static str {
        std::env::consts::ARCH
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            target_os(),
            target_arch(),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Command::Version = &cli.command {
        println!("meshmon {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Report => run_report(&cfg),
        Command::Status => run_status(&cfg),
        Command::Version => unreachable!("handled above"),
    }
}

fn run_report(cfg: &Config) -> Result<()> {
    let store = MemoryStore::load(&cfg.db_path)
        .with_context(|| format!("loading metric store from {}", cfg.db_path.display()))?;

    let options = ChartOptions::from_config(cfg);
    let now = Utc::now();
    let now_ts = now.timestamp();
    let today = now.date_naive();

    let mut renderer = NoopRenderer;

    for role in Role::ALL {
        let (artifacts, stats) =
            charts::render_all(&store, &mut renderer, role, &options, now_ts, None)?;
        let stats_path = charts::save_chart_stats(&cfg.out_dir, role, &stats)?;

        tracing::info!(
            %role,
            charts = artifacts.len(),
            metrics = stats.len(),
            stats_file = %stats_path.display(),
            "chart statistics written",
        );

        for period in Period::ALL {
            let groups = charts::build_chart_groups(role, period, &stats);
            let chart_count: usize = groups.iter().map(|g| g.charts.len()).sum();
            println!(
                "{role} {period}: {chart_count} charts in {} groups",
                groups.len(),
            );
        }

        let monthly =
            report::aggregate_monthly(&store, role, today.year(), today.month(), today)?;
        for (metric, summary) in &monthly.summary {
            if !summary.has_data() {
                continue;
            }
            match summary.total {
                Some(total) => println!(
                    "{role} {metric}: total {total} ({} samples, {} reboots)",
                    summary.count, summary.reboot_count,
                ),
                None => println!(
                    "{role} {metric}: mean {:.2} min {:?} max {:?} ({} samples)",
                    summary.mean.unwrap_or(0.0),
                    summary.min_value,
                    summary.max_value,
                    summary.count,
                ),
            }
        }
    }

    Ok(())
}

fn run_status(cfg: &Config) -> Result<()> {
    for role in Role::ALL {
        let breaker = CircuitBreaker::new(cfg.circuit_state_file(role));
        let snapshot = breaker.snapshot();

        if snapshot.is_open {
            println!(
                "{role}: OPEN ({} consecutive failures, {}s cooldown remaining)",
                snapshot.consecutive_failures, snapshot.cooldown_remaining_secs,
            );
        } else {
            println!(
                "{role}: closed ({} consecutive failures, last success at {})",
                snapshot.consecutive_failures,
                if snapshot.last_success == 0 {
                    "never".to_string()
                } else {
                    snapshot.last_success.to_string()
                },
            );
        }
    }

    Ok(())
}
