use crate::command::CommandLine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 17003;
pub const DEFAULT_CHRONY_CONF: &str = "/etc/chrony/chrony.conf";
pub const DEFAULT_SERVER: &str = "pool.ntp.org";
pub const DEFAULT_BUILD_INFO: &str = "/build-info.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub chrony_conf: PathBuf,
    /// Command line for the diagnostic tool, e.g. `chronyc -h 127.0.0.1`.
    pub chronyc: String,
    /// Command line for the daemon. `-f <chrony_conf>` is appended.
    pub chronyd: String,
    pub pid_file: PathBuf,
    /// Name matched with `pkill -x` when there is no pid file. Empty disables.
    pub process_name: String,
    pub default_server: String,
    pub build_info: PathBuf,
    pub command_timeout_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            chrony_conf: PathBuf::from(DEFAULT_CHRONY_CONF),
            chronyc: "chronyc".to_string(),
            chronyd: "chronyd".to_string(),
            pid_file: PathBuf::from("/run/chrony/chronyd.pid"),
            process_name: "chronyd".to_string(),
            default_server: DEFAULT_SERVER.to_string(),
            build_info: PathBuf::from(DEFAULT_BUILD_INFO),
            command_timeout_ms: 5000,
            stop_timeout_ms: 3000,
        }
    }
}

impl ServiceConfig {
    pub fn chronyc_command(&self) -> Result<CommandLine, ConfigError> {
        CommandLine::parse(&self.chronyc)
            .map_err(|e| ConfigError::Invalid(format!("chronyc: {e}")))
    }

    pub fn chronyd_command(&self) -> Result<CommandLine, ConfigError> {
        let mut command = CommandLine::parse(&self.chronyd)
            .map_err(|e| ConfigError::Invalid(format!("chronyd: {e}")))?;
        command.args.push("-f".to_string());
        command
            .args
            .push(self.chrony_conf.to_string_lossy().into_owned());
        Ok(command)
    }

    pub fn process_name(&self) -> Option<String> {
        let name = self.process_name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chronyc_command()?;
        self.chronyd_command()?;

        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "command_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.stop_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "stop_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.default_server.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_server must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    TomlParse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("{0}")]
    IoError(String),
}

pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig =
        toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
