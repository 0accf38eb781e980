//! nickreg - Replicated nick registration
//!
//! Usage:
//!   nickreg init                 - Write a default configuration file
//!   nickreg show-config          - Load, validate and print the configuration
//!   nickreg run                  - Host a standalone replica until interrupted
//!   nickreg simulate             - Run an in-process partition simulation

use anyhow::Context;
use clap::{Parser, Subcommand};
use nickreg::{
    config::{Config, RegistrationMode},
    simulation::{self, SimulationConfig},
    RegistrationService,
};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "nickreg")]
#[command(author = "nickreg Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replicated nick registration")]
struct Cli {
    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Server name (defaults to the hostname)
        #[arg(long)]
        server_name: Option<String>,

        /// Who may register nicks
        #[arg(long, value_parser = ["services", "opers", "users"])]
        mode: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load, validate and print the effective configuration
    ShowConfig,

    /// Host a standalone replica, sweeping expired nicks until interrupted
    Run,

    /// Run replicas in-process through a partition and check they converge
    Simulate {
        /// Number of replicas
        #[arg(long, default_value_t = 4)]
        replicas: usize,

        /// Distinct nicks to fight over
        #[arg(long, default_value_t = 16)]
        names: usize,

        /// Distinct accounts claiming them
        #[arg(long, default_value_t = 4)]
        accounts: usize,

        /// Registrations issued while partitioned
        #[arg(long, default_value_t = 200)]
        rounds: usize,

        /// RNG seed
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Expiry window for the final sweep (seconds)
        #[arg(long, default_value_t = 100)]
        expiry_window: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    // Setup logging: --verbose wins, then the config file, then info
    let directive = if cli.verbose {
        "debug".to_string()
    } else {
        Config::load(&config_path)
            .map(|config| config.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Init {
            server_name,
            mode,
            force,
        } => cmd_init(config_path, server_name, mode, force),

        Commands::ShowConfig => cmd_show_config(config_path),

        Commands::Run => cmd_run(config_path),

        Commands::Simulate {
            replicas,
            names,
            accounts,
            rounds,
            seed,
            expiry_window,
            json,
        } => cmd_simulate(
            SimulationConfig {
                replicas,
                names,
                accounts,
                rounds,
                seed,
                expiry_window_secs: expiry_window,
            },
            json,
        ),
    }
}

fn cmd_init(
    config_path: &Path,
    server_name: Option<String>,
    mode: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let mut config = Config::default();
    if let Some(name) = server_name {
        config.server.name = name;
    }
    if let Some(mode) = mode {
        config.registration.mode = mode.parse::<RegistrationMode>()?;
    }
    config.validate()?;
    config
        .save(config_path)
        .with_context(|| format!("writing {}", config_path.display()))?;

    info!("Configuration saved to {:?}", config_path);
    info!("Server name: {}", config.server.name);
    info!("Registration mode: {:?}", config.registration.mode);
    Ok(())
}

fn cmd_show_config(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let service = RegistrationService::new(&config)?;

    println!("Configuration ({})", config_path.display());
    println!("=============");
    println!("Server name:       {}", service.server_name());
    println!("Registration mode: {:?}", config.registration.mode);
    println!("Max per account:   {}", config.registration.max_per_account);
    println!("Max nick length:   {}", config.registration.nick_max_len);
    let window = service.sweeper().window();
    if window.is_zero() {
        println!("Expiry:            disabled");
    } else {
        println!(
            "Expiry:            {} ({}s), swept every {}s",
            config.expiry.expire_time,
            window.as_secs(),
            config.expiry.sweep_interval_secs
        );
    }
    println!("Log level:         {}", config.logging.level);
    Ok(())
}

fn cmd_run(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let service = RegistrationService::new(&config)?;
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;

    runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = service.spawn_sweeper(config.expiry.sweep_interval(), shutdown_rx);
        info!(
            "Replica {} running, press Ctrl+C to stop",
            service.server_name()
        );

        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl+C")?;
        info!("Shutting down");

        let _ = shutdown_tx.send(true);
        sweeper.await.context("joining expiry sweeper")?;
        info!("{} nicks registered at shutdown", service.store().len());
        Ok::<(), anyhow::Error>(())
    })
}

fn cmd_simulate(config: SimulationConfig, json: bool) -> anyhow::Result<()> {
    info!(
        "Simulating {} replicas, {} nicks, {} rounds (seed {})",
        config.replicas, config.names, config.rounds, config.seed
    );
    let report = simulation::run(&config);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Simulation Report");
        println!("=================");
        println!("Diverged while partitioned: {}", report.diverged_during_partition);
        println!("Converged after healing:    {}", report.converged);
        println!("Converged after sweep:      {}", report.converged_after_sweep);
        println!("Records after healing:      {}", report.records);
        println!("Purged per replica:         {:?}", report.purged);
        println!("Messages delivered:         {}", report.messages_delivered);
        for (i, digest) in report.digests.iter().enumerate() {
            println!("  replica {}: {}", i, digest);
        }
    }

    if !report.converged || !report.converged_after_sweep {
        warn!("Replicas did not converge");
        anyhow::bail!("replicas did not converge");
    }
    Ok(())
}
