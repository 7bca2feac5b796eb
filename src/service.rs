use crate::chrony_conf::ServerModeStore;
use crate::command::{CommandRunner, SystemRunner};
use crate::config::{ConfigError, ServiceConfig};
use crate::protocol::{
    self, DeleteServersResponse, ServerModeResponse, ServerResult, ServersResponse,
    SetServerModeResponse, SetServersResponse, VersionResponse,
};
use crate::status::{self, StatusAggregator, StatusSnapshot};
use crate::supervisor::{Daemon, DaemonSupervisor};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const VERSION_ARGS: &[&str] = &["--version"];
pub const DELETE_SOURCES_ARGS: &[&str] = &["delete", "sources"];

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("servers must be a non-empty list")]
    EmptyServerList,
}

/// Every operation of the HTTP API.
///
/// Reads go straight to disk and to `chronyc`. Anything that changes the
/// configuration file, the source list or the daemon process holds
/// `write_lock` for its whole read-modify-write-restart sequence.
#[derive(Clone)]
pub struct ChronyService {
    config: Arc<ServiceConfig>,
    runner: Arc<dyn CommandRunner>,
    daemon: Arc<dyn Daemon>,
    store: ServerModeStore,
    status: StatusAggregator,
    write_lock: Arc<Mutex<()>>,
}

impl ChronyService {
    pub fn new(
        config: ServiceConfig,
        runner: Arc<dyn CommandRunner>,
        daemon: Arc<dyn Daemon>,
    ) -> Self {
        let store = ServerModeStore::new(config.chrony_conf.clone());
        let status = StatusAggregator::new(Arc::clone(&runner), store.clone());
        Self {
            config: Arc::new(config),
            runner,
            daemon,
            store,
            status,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Wire up the real `chronyc` runner and `chronyd` supervisor.
    pub fn from_config(config: ServiceConfig) -> Result<Self, ConfigError> {
        let runner = SystemRunner::new(config.chronyc_command()?, config.command_timeout());
        let supervisor = DaemonSupervisor::new(
            config.chronyd_command()?,
            config.pid_file.clone(),
            config.process_name(),
            config.stop_timeout(),
        );
        Ok(Self::new(config, Arc::new(runner), Arc::new(supervisor)))
    }

    pub async fn chrony_version(&self) -> VersionResponse {
        let (out, build_info) = tokio::join!(
            self.runner.run(VERSION_ARGS),
            protocol::load_build_info(&self.config.build_info),
        );
        VersionResponse {
            version: out.output,
            build_info,
            error: out.error,
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.status.snapshot().await
    }

    pub async fn servers(&self) -> ServersResponse {
        let out = self.runner.run(status::SOURCES_ARGS).await;
        ServersResponse {
            servers: out.output,
            error: out.error,
        }
    }

    /// Replace every source with `servers`, in order, then restart chronyd
    /// once. Per-server failures are reported, not fatal.
    pub async fn set_servers(
        &self,
        servers: Vec<String>,
    ) -> Result<SetServersResponse, ServiceError> {
        if servers.is_empty() {
            return Err(ServiceError::EmptyServerList);
        }
        Ok(self.replace_servers(servers).await)
    }

    async fn replace_servers(&self, servers: Vec<String>) -> SetServersResponse {
        let _guard = self.write_lock.lock().await;

        let deleted = self.runner.run(DELETE_SOURCES_ARGS).await;
        if !deleted.is_success() {
            tracing::warn!(error = %deleted.error, "failed to delete sources");
        }

        let mut result = Vec::with_capacity(servers.len());
        for server in servers {
            let out = self.runner.run(&["add", "server", server.as_str()]).await;
            if out.is_success() {
                tracing::info!(%server, "added server");
            } else {
                tracing::warn!(%server, error = %out.error, "failed to add server");
            }
            result.push(ServerResult {
                server,
                output: out.output,
                error: out.error,
            });
        }

        let restart = self.daemon.restart().await;
        SetServersResponse {
            result,
            restart_success: restart.success(),
        }
    }

    pub async fn delete_servers(&self) -> DeleteServersResponse {
        let _guard = self.write_lock.lock().await;

        let out = self.runner.run(DELETE_SOURCES_ARGS).await;
        if out.is_success() {
            tracing::info!("deleted all sources");
        } else {
            tracing::warn!(error = %out.error, "failed to delete sources");
        }

        let restart = self.daemon.restart().await;
        DeleteServersResponse {
            output: out.output,
            error: out.error,
            restart_success: restart.success(),
        }
    }

    pub async fn reset_default_servers(&self) -> SetServersResponse {
        self.replace_servers(vec![self.config.default_server.clone()])
            .await
    }

    pub async fn server_mode(&self) -> ServerModeResponse {
        ServerModeResponse {
            server_mode_enabled: self.store.read().await,
        }
    }

    /// Rewrite the `allow` directive and restart chronyd to apply it. A
    /// failed write skips the restart; a failed restart leaves the write in
    /// place.
    pub async fn set_server_mode(&self, enabled: bool) -> SetServerModeResponse {
        let _guard = self.write_lock.lock().await;

        let success = match self.store.write(enabled).await {
            Ok(()) => self.daemon.restart().await.success(),
            Err(e) => {
                tracing::warn!(error = %e, enabled, "failed to update server mode");
                false
            }
        };

        SetServerModeResponse {
            success,
            server_mode_enabled: enabled,
        }
    }
}
