use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pgmux_config::{Config, ConfigAndUsers, Users};
use schemars::schema_for;

/// pgmux multiplexes PostgreSQL client sessions over a few backends.
#[derive(Parser, Debug)]
#[command(name = "", version)]
pub struct Cli {
    /// Path to the configuration file. Default: "pgmux.toml"
    #[arg(short, long, default_value = "pgmux.toml")]
    pub config: PathBuf,
    /// Path to the users.toml file. Default: "users.toml"
    #[arg(short, long, default_value = "users.toml")]
    pub users: PathBuf,
    /// Subcommand.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start pgmux.
    Run {
        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,

        /// Number of proxy engines.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Backends per (database, user) pool.
        #[arg(long)]
        pool_size: Option<usize>,
    },

    /// Check configuration files for errors.
    Configcheck,

    /// Print the JSON schema of pgmux.toml and users.toml.
    Schema,
}

impl Cli {
    /// Apply command-line overrides.
    pub fn apply(&self, config: &mut Config) {
        if let Some(Commands::Run {
            port,
            workers,
            pool_size,
        }) = &self.command
        {
            if let Some(port) = port {
                config.general.port = *port;
            }
            if let Some(workers) = workers {
                config.general.workers = *workers;
            }
            if let Some(pool_size) = pool_size {
                config.general.session_pool_size = *pool_size;
            }
        }
    }
}

/// Confirm that the configuration and users files are valid.
pub fn config_check(cli: &Cli) -> Result<(), pgmux_config::Error> {
    let loaded = ConfigAndUsers::check(&cli.config, &cli.users)?;
    println!(
        "\"{}\" and \"{}\" are valid ({} users)",
        loaded.config_path.display(),
        loaded.users_path.display(),
        loaded.users.users.len()
    );
    Ok(())
}

/// Both schemas as one JSON document.
pub fn schema() -> Result<String, serde_json::Error> {
    let schemas = serde_json::json!({
        "pgmux": schema_for!(Config),
        "users": schema_for!(Users),
    });
    serde_json::to_string_pretty(&schemas)
}
