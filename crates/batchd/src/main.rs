//! batchd: the batchgrid daemon.
//!
//! Loads a `batchgrid.toml`, validates it, and drives the scheduler
//! against the in-memory simulated cluster, either in virtual time
//! (`simulate`) or in wall-clock time until Ctrl-C (`run-sim`).
//!
//! # Usage
//!
//! ```text
//! batchd check-config --config batchgrid.toml --print
//! batchd simulate --ticks 3000 --realistic --json
//! batchd run-sim --config batchgrid.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use batchgrid_core::BatchConfig;

mod sim_mode;
mod world;

#[derive(Parser)]
#[command(name = "batchd", about = "batchgrid daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a configuration file.
    CheckConfig {
        /// Path to batchgrid.toml.
        #[arg(long)]
        config: PathBuf,

        /// Print the effective configuration, defaults included.
        #[arg(long)]
        print: bool,
    },
    /// Run the scheduler against the demo cluster in virtual time.
    Simulate {
        /// Path to batchgrid.toml (defaults apply when omitted).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of ticks to run.
        #[arg(long, default_value = "3000")]
        ticks: u64,

        /// Fix action durations when they start instead of at dispatch.
        #[arg(long)]
        realistic: bool,

        /// Print the final status as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run the scheduler against the demo cluster in wall-clock time.
    RunSim {
        /// Path to batchgrid.toml (defaults apply when omitted).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Fix action durations when they start instead of at dispatch.
        #[arg(long)]
        realistic: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::CheckConfig { config, print } => check_config(&config, print),
        Command::Simulate {
            config,
            ticks,
            realistic,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            sim_mode::simulate(config, ticks, realistic, json)
        }
        Command::RunSim { config, realistic } => {
            let config = load_config(config.as_deref())?;
            sim_mode::run_sim(config, realistic).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,batchd=debug,batchgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read and validate a config file, or fall back to defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<BatchConfig> {
    let config = match path {
        Some(path) => BatchConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => BatchConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn check_config(path: &Path, print: bool) -> anyhow::Result<()> {
    let config = load_config(Some(path))?;
    info!(path = %path.display(), "configuration is valid");
    if print {
        print!("{}", config.to_toml_string()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_simulate_flags() {
        let cli = Cli::try_parse_from(["batchd", "simulate", "--ticks", "10", "--json"]).unwrap();
        match cli.command {
            Command::Simulate {
                ticks,
                json,
                realistic,
                config,
            } => {
                assert_eq!(ticks, 10);
                assert!(json);
                assert!(!realistic);
                assert!(config.is_none());
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn load_config_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batchgrid.toml");
        std::fs::write(&path, "[capacity]\nweaken_cost = 0.0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("weaken"));
    }

    #[test]
    fn load_config_reads_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batchgrid.toml");
        std::fs::write(&path, "[limits]\nper_target_cap = 12\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.limits.per_target_cap, 12);
        assert_eq!(config.timing.gap_ms, 200);
    }

    #[test]
    fn missing_file_mentions_path() {
        let err = load_config(Some(Path::new("/nonexistent/batchgrid.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/batchgrid.toml"));
    }
}
