//! pgmux entry point.

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use pgmux::cli::{self, Cli, Commands};
use pgmux::logger;
use pgmux::stats::{http_server, Logger, Registry};
use pgmux::worker::Workers;
use pgmux_config::ConfigAndUsers;
use tokio::runtime::Builder;
use tokio::{select, signal::ctrl_c};
use tracing::{error, info};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> ExitCode {
    let args = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = match &args.command {
        Some(Commands::Configcheck) => cli::config_check(&args).map_err(|err| err.into()),
        Some(Commands::Schema) => cli::schema()
            .map(|schema| println!("{}", schema))
            .map_err(|err| err.into()),
        Some(Commands::Run { .. }) | None => run(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ConfigAndUsers::load(&args.config, &args.users)?;
    args.apply(&mut config.config);
    config.config.general.check()?;

    let general = &config.config.general;
    logger::init(general.log_format);

    info!(
        "pgmux v{} [config: \"{}\", workers: {}, pool size: {}, upstream: {}:{}]",
        env!("CARGO_PKG_VERSION"),
        config.config_path.display(),
        general.workers,
        general.session_pool_size,
        config.config.upstream.host,
        config.config.upstream.port,
    );

    let registry = Registry::default();
    let workers = Workers::spawn(&config, &registry)?;
    let shutdown = workers.shutdown_flag();

    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("pgmux-stats")
        .enable_all()
        .build()?;

    let openmetrics_port = general.openmetrics_port;
    let stats_period = general.stats_period_duration();

    let failed = runtime.block_on(async move {
        if let Some(port) = openmetrics_port {
            let registry = registry.clone();
            tokio::spawn(async move {
                if let Err(err) = http_server::server(port, registry).await {
                    error!("OpenMetrics endpoint stopped: {}", err);
                }
            });
        }

        if let Some(period) = stats_period {
            tokio::spawn(Logger::new(registry, period).run());
        }

        let mut handle = tokio::task::spawn_blocking(move || workers.join());

        let exited = select! {
            _ = ctrl_c() => None,
            joined = &mut handle => Some(joined),
        };

        let joined = match exited {
            Some(joined) => {
                error!("workers exited");
                joined
            }
            None => {
                info!("shutting down");
                shutdown.store(true, Ordering::Relaxed);
                handle.await
            }
        };

        joined.unwrap_or(1)
    });

    if failed > 0 {
        return Err(format!("{} worker(s) failed", failed).into());
    }

    Ok(())
}
