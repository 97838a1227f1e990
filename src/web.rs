#![cfg(not(tarpaulin_include))]

use clap::Parser;
use datacollab::app;
use datacollab::config::{Config, DEFAULT_ENV};
use std::path::PathBuf;

/// Data collaboration web server
#[derive(Parser, Debug)]
#[command(name = "website", version)]
struct Args {
    /// Environment whose `config/<env>.toml` is loaded
    #[arg(long, env = "DATACOLLAB_ENV", default_value = DEFAULT_ENV)]
    env: String,

    /// Explicit config file, overrides `--env`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    bind: Option<String>,
}

/// Main entry point for the web application
///
/// Loads `.env`, reads the environment's config file and serves until the
/// listener fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let path = args.config.unwrap_or_else(|| Config::path_for_env(&args.env));
    log::info!("loading config from {}", path.display());

    let mut config = Config::load(&path)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    app::run(config).await?;
    Ok(())
}
