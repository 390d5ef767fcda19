use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::join;
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use depot_server::config::{self, Config};

/// Multi-format artifact server.
#[derive(Debug, Parser)]
#[clap(version)]
#[clap(propagate_version = true)]
struct Opts {
    /// Path to the config file.
    #[clap(short = 'f', long)]
    config: Option<PathBuf>,

    /// Socket address to listen on.
    ///
    /// This overrides `listen` in the config.
    #[clap(short = 'l', long)]
    listen: Option<SocketAddr>,

    /// Mode to run.
    #[clap(long, default_value = "monolithic")]
    mode: ServerMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServerMode {
    /// Run all components.
    Monolithic,

    /// Run the API server.
    ApiServer,

    /// Run the garbage collector periodically.
    GarbageCollector,

    /// Run the database migrations then exit.
    DbMigrations,

    /// Run garbage collection then exit.
    GarbageCollectorOnce,

    /// Check the configuration then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    init_logging();
    dump_version();

    let config = load_config(&opts)?;

    match opts.mode {
        ServerMode::Monolithic => {
            depot_server::run_migrations(config.clone()).await?;

            let (api_server, _) = join!(
                depot_server::run_api_server(opts.listen, config.clone()),
                depot_server::gc::run_garbage_collection(config.clone()),
            );

            api_server?;
        }
        ServerMode::ApiServer => {
            depot_server::run_api_server(opts.listen, config).await?;
        }
        ServerMode::GarbageCollector => {
            depot_server::gc::run_garbage_collection(config.clone()).await;
        }
        ServerMode::DbMigrations => {
            depot_server::run_migrations(config).await?;
        }
        ServerMode::GarbageCollectorOnce => {
            depot_server::gc::run_garbage_collection_once(config).await?;
        }
        ServerMode::CheckConfig => {
            // config is valid, let's just exit :)
        }
    }

    Ok(())
}

fn load_config(opts: &Opts) -> Result<Config> {
    if let Some(path) = &opts.config {
        return Ok(config::load_config_from_path(path));
    }

    if let Ok(s) = env::var("DEPOT_SERVER_CONFIG") {
        return Ok(config::load_config_from_str(&s));
    }

    let path = config::get_xdg_config_path()?;
    Ok(config::load_config_from_path(&path))
}

fn init_logging() {
    let env_filter = EnvFilter::from_default_env();
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(env_filter);

    let error_layer = ErrorLayer::default();

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(error_layer)
        .init();
}

fn dump_version() {
    #[cfg(debug_assertions)]
    eprintln!("Depot Server {} (debug)", env!("CARGO_PKG_VERSION"));

    #[cfg(not(debug_assertions))]
    eprintln!("Depot Server {} (release)", env!("CARGO_PKG_VERSION"));
}
