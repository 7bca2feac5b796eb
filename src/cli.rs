use crate::config::{self, ConfigError, ServiceConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "chrony-api",
    about = "HTTP control plane for a local chrony daemon",
    version
)]
pub struct Cli {
    /// TOML file with service settings
    #[arg(long, env = "CHRONY_API_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(long, env = "PORT", global = true)]
    pub port: Option<u16>,

    /// Path of chrony's configuration file
    #[arg(long, global = true)]
    pub chrony_conf: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Print the effective configuration and exit
    Config,
}

impl Cli {
    /// Defaults, then the config file, then flags and environment.
    pub fn resolve_config(&self) -> Result<ServiceConfig, ConfigError> {
        let mut config = match self.config {
            Some(ref path) => config::load_config(path)?,
            None => ServiceConfig::default(),
        };

        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ref chrony_conf) = self.chrony_conf {
            config.chrony_conf = chrony_conf.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}
