use chrony_api::cli::{Cli, Command};
use clap::Parser;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "chrony_api=info,tower_http=info";

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.resolve_config()?;

    match cli.command() {
        Command::Serve => chrony_api::server::run(config).await?,
        Command::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}
