mod command;

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use enum_as_inner::EnumAsInner;

use command::make_token::{self, MakeToken};
use depot_server::config::{self, Config};

/// Depot server administration utilities.
#[derive(Debug, Parser)]
#[clap(version)]
#[clap(propagate_version = true)]
pub struct Opts {
    /// Path to the config file.
    #[clap(short = 'f', long)]
    config: Option<PathBuf>,

    /// The sub-command.
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, EnumAsInner)]
pub enum Command {
    MakeToken(MakeToken),
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    let config = load_config(&opts)?;

    match opts.command {
        Command::MakeToken(_) => make_token::run(config, opts).await?,
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
