//! gridcrawld: entry point for both sides of a gridcrawl job.
//!
//! - `submit` hands the job to the cluster and follows it to a terminal
//!   state.
//! - `master` is the application master the cluster starts for the job.
//!
//! # Usage
//!
//! ```text
//! gridcrawld submit /data/urls.tsv /data/pages /apps/crawler --workers 4
//! gridcrawld --config gridcrawl.toml master /data/urls.tsv /data/pages /apps/crawler
//! ```

mod master_mode;
mod submit_mode;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use gridcrawl_core::{GridcrawlConfig, JobSpec};
use tokio::sync::watch;
use tracing::info;

/// Environment variable naming the configuration file when `--config` is
/// absent.
pub const CONFIG_ENV: &str = "GRIDCRAWL_CONFIG";

#[derive(Parser)]
#[command(name = "gridcrawld", about = "gridcrawl job submitter and application master")]
struct Cli {
    /// Path to gridcrawl.toml. Falls back to $GRIDCRAWL_CONFIG, then to
    /// built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a job and wait until the cluster reports it finished.
    Submit(JobArgs),

    /// Run the application master for one job.
    Master(JobArgs),

    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Args)]
struct JobArgs {
    /// Input dataset.
    input: String,

    /// Output location handed to every task.
    output: String,

    /// Executable artifact staged onto every container host.
    artifact: String,

    /// Number of containers to run. Overrides `[job] worker_count`.
    #[arg(long)]
    workers: Option<u32>,
}

impl JobArgs {
    fn into_job(self, config: &GridcrawlConfig) -> JobSpec {
        let workers = self.workers.unwrap_or(config.job.worker_count);
        JobSpec::new(self.input, self.output, self.artifact, workers)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let config = GridcrawlConfig::load(config_path.as_deref())?;
    if let Some(path) = &config_path {
        info!(path = %path.display(), "configuration loaded");
    }

    match cli.command {
        Command::Submit(args) => {
            let job = args.into_job(&config);
            submit_mode::run_submit(config, config_path, job).await
        }
        Command::Master(args) => {
            let job = args.into_job(&config);
            master_mode::run_master_mode(config, job).await
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// `RUST_LOG` picks the filter; `GRIDCRAWL_LOG_FORMAT=json` switches to
/// JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gridcrawld=debug,gridcrawl=debug"));

    let json = std::env::var("GRIDCRAWL_LOG_FORMAT").is_ok_and(|format| format == "json");
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Flip the returned receiver to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });
    shutdown_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_flag_overrides_config() {
        let cli = Cli::try_parse_from([
            "gridcrawld",
            "master",
            "/in.tsv",
            "/out",
            "/apps/crawler",
            "--workers",
            "5",
        ])
        .unwrap();
        let Command::Master(args) = cli.command else {
            panic!("expected master");
        };

        let job = args.into_job(&GridcrawlConfig::default());
        assert_eq!(job, JobSpec::new("/in.tsv", "/out", "/apps/crawler", 5));
    }

    #[test]
    fn worker_count_defaults_to_config() {
        let cli = Cli::try_parse_from([
            "gridcrawld",
            "--config",
            "gridcrawl.toml",
            "submit",
            "in",
            "out",
            "artifact",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("gridcrawl.toml")));

        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        let mut config = GridcrawlConfig::default();
        config.job.worker_count = 3;
        assert_eq!(args.into_job(&config).worker_count, 3);
    }

    #[test]
    fn missing_artifact_is_a_usage_error() {
        assert!(Cli::try_parse_from(["gridcrawld", "submit", "in", "out"]).is_err());
    }
}
