use crate::chrony_conf::ServerModeStore;
use crate::command::{CommandOutput, CommandRunner};
use crate::parse::{self, ActivityCounts, ClientRecord, SourceRecord, TrackingSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const TRACKING_ARGS: &[&str] = &["tracking"];
pub const SOURCES_ARGS: &[&str] = &["sources"];
pub const ACTIVITY_ARGS: &[&str] = &["activity"];
pub const CLIENTS_ARGS: &[&str] = &["clients"];

/// Everything `GET /chrony/status` reports. Each section carries its own
/// error; a failed section holds an empty value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub server_mode_enabled: bool,
    pub tracking: TrackingSnapshot,
    pub tracking_error: String,
    pub sources: Vec<SourceRecord>,
    pub sources_error: String,
    pub activity: ActivityCounts,
    pub activity_error: String,
    pub clients: Vec<ClientRecord>,
    pub clients_error: String,
}

fn section<T: Default>(name: &str, result: CommandOutput, parse: fn(&str) -> T) -> (T, String) {
    if result.is_success() {
        (parse(&result.output), String::new())
    } else {
        tracing::warn!(section = name, error = %result.error, "status section unavailable");
        (T::default(), result.error)
    }
}

#[derive(Clone)]
pub struct StatusAggregator {
    runner: Arc<dyn CommandRunner>,
    store: ServerModeStore,
}

impl StatusAggregator {
    pub fn new(runner: Arc<dyn CommandRunner>, store: ServerModeStore) -> Self {
        Self { runner, store }
    }

    /// Query every section concurrently. Never fails as a whole.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let (server_mode_enabled, tracking, sources, activity, clients) = tokio::join!(
            self.store.read(),
            self.runner.run(TRACKING_ARGS),
            self.runner.run(SOURCES_ARGS),
            self.runner.run(ACTIVITY_ARGS),
            self.runner.run(CLIENTS_ARGS),
        );

        let (tracking, tracking_error) = section("tracking", tracking, parse::parse_tracking);
        let (sources, sources_error) = section("sources", sources, parse::parse_sources);
        let (activity, activity_error) = section("activity", activity, parse::parse_activity);
        let (clients, clients_error) = section("clients", clients, parse::parse_clients);

        StatusSnapshot {
            server_mode_enabled,
            tracking,
            tracking_error,
            sources,
            sources_error,
            activity,
            activity_error,
            clients,
            clients_error,
        }
    }
}
