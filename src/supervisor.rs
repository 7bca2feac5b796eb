use crate::command::CommandLine;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const SIGKILL_GRACE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to the previous daemon instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Nothing was running.
    NotRunning,
    /// The listed instances were stopped. Empty when the pid is unknown
    /// (matched by name).
    Stopped { pids: Vec<u32> },
    /// An instance may still be running.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct RestartOutcome {
    pub termination: Termination,
    /// Pid of the new instance on success.
    pub spawned: Result<Option<u32>, SpawnError>,
}

impl RestartOutcome {
    /// A restart only fails when the new instance could not be started.
    pub fn success(&self) -> bool {
        self.spawned.is_ok()
    }
}

/// A process we may not signal still exists.
fn is_alive(pid: Pid) -> bool {
    matches!(signal::kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

/// Map a `pkill` exit code onto a termination result.
pub fn termination_from_pkill(code: Option<i32>) -> Termination {
    match code {
        Some(0) => Termination::Stopped { pids: Vec::new() },
        Some(1) => Termination::NotRunning,
        Some(code) => Termination::Failed(format!("pkill exited with code {code}")),
        None => Termination::Failed("pkill terminated by signal".to_string()),
    }
}

// ---------------------------------------------------------------------------
// DaemonSupervisor
// ---------------------------------------------------------------------------

/// Something that can restart the time daemon.
#[async_trait]
pub trait Daemon: Send + Sync {
    async fn restart(&self) -> RestartOutcome;
}

/// Restarts chronyd: stop whatever instance is running, then start a fresh
/// one detached from the caller. The new instance is never awaited.
#[derive(Debug, Clone)]
pub struct DaemonSupervisor {
    command: CommandLine,
    pid_file: PathBuf,
    process_name: Option<String>,
    stop_timeout: Duration,
}

impl DaemonSupervisor {
    pub fn new(
        command: CommandLine,
        pid_file: impl Into<PathBuf>,
        process_name: Option<String>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            command,
            pid_file: pid_file.into(),
            process_name,
            stop_timeout,
        }
    }

    /// Pid recorded by the running daemon, if it looks like a real process.
    pub async fn read_pid(&self) -> Option<u32> {
        let contents = tokio::fs::read_to_string(&self.pid_file).await.ok()?;
        contents
            .trim()
            .parse::<i32>()
            .ok()
            // 0, 1 and negative values address process groups or init
            .filter(|&pid| pid > 1)
            .map(|pid| pid as u32)
    }

    async fn remove_pid_file(&self) {
        let _ = tokio::fs::remove_file(&self.pid_file).await;
    }

    pub async fn restart(&self) -> RestartOutcome {
        let termination = self.terminate().await;
        match &termination {
            Termination::NotRunning => tracing::info!("chronyd was not running"),
            Termination::Stopped { pids } => tracing::info!(?pids, "stopped chronyd"),
            Termination::Failed(reason) => {
                tracing::warn!(%reason, "could not stop chronyd, starting anyway")
            }
        }

        let spawned = self.spawn();
        match &spawned {
            Ok(pid) => tracing::info!(?pid, "chronyd started"),
            Err(e) => tracing::error!(error = %e, "chronyd failed to start"),
        }

        RestartOutcome {
            termination,
            spawned,
        }
    }

    pub async fn terminate(&self) -> Termination {
        if let Some(pid) = self.read_pid().await {
            return self.terminate_pid(pid).await;
        }

        match self.process_name.as_deref() {
            Some(name) => self.terminate_by_name(name).await,
            None => Termination::NotRunning,
        }
    }

    async fn terminate_pid(&self, raw_pid: u32) -> Termination {
        let Ok(pid) = i32::try_from(raw_pid).map(Pid::from_raw) else {
            return Termination::Failed(format!("invalid pid {raw_pid}"));
        };

        match signal::kill(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                // Stale pid file
                self.remove_pid_file().await;
                return Termination::NotRunning;
            }
            Err(e) => return Termination::Failed(format!("failed to signal pid {raw_pid}: {e}")),
        }

        let deadline = tokio::time::Instant::now() + self.stop_timeout;
        while is_alive(pid) {
            if tokio::time::Instant::now() >= deadline {
                return self.kill_pid(pid, raw_pid).await;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        Termination::Stopped {
            pids: vec![raw_pid],
        }
    }

    async fn kill_pid(&self, pid: Pid, raw_pid: u32) -> Termination {
        tracing::warn!(pid = raw_pid, "chronyd ignored SIGTERM, sending SIGKILL");

        match signal::kill(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Termination::Failed(format!("failed to kill pid {raw_pid}: {e}")),
        }

        tokio::time::sleep(SIGKILL_GRACE).await;
        if is_alive(pid) {
            return Termination::Failed(format!("pid {raw_pid} still running after SIGKILL"));
        }

        Termination::Stopped {
            pids: vec![raw_pid],
        }
    }

    async fn terminate_by_name(&self, name: &str) -> Termination {
        let status = Command::new("pkill")
            .arg("-x")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.stop_timeout, status).await {
            Ok(Ok(status)) => termination_from_pkill(status.code()),
            Ok(Err(e)) => Termination::Failed(format!("failed to run pkill: {e}")),
            Err(_) => Termination::Failed("pkill timed out".to_string()),
        }
    }

    pub fn spawn(&self) -> Result<Option<u32>, SpawnError> {
        let mut cmd = std::process::Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);

        // tokio reaps the child in the background once it is dropped
        let child = Command::from(cmd)
            .spawn()
            .map_err(|source| SpawnError::Io {
                program: self.command.program.clone(),
                source,
            })?;

        Ok(child.id())
    }
}

#[async_trait]
impl Daemon for DaemonSupervisor {
    async fn restart(&self) -> RestartOutcome {
        DaemonSupervisor::restart(self).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn supervisor(pid_file: &Path, program: &str, args: &[&str]) -> DaemonSupervisor {
        DaemonSupervisor::new(
            CommandLine {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
            },
            pid_file,
            None,
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_pkill_exit_codes() {
        assert_eq!(
            termination_from_pkill(Some(0)),
            Termination::Stopped { pids: vec![] }
        );
        assert_eq!(termination_from_pkill(Some(1)), Termination::NotRunning);
        assert!(matches!(
            termination_from_pkill(Some(3)),
            Termination::Failed(_)
        ));
        assert!(matches!(termination_from_pkill(None), Termination::Failed(_)));
    }

    #[tokio::test]
    async fn test_read_pid() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("chronyd.pid");
        let sup = supervisor(&pid_file, "true", &[]);

        assert_eq!(sup.read_pid().await, None);
        std::fs::write(&pid_file, "1234\n").unwrap();
        assert_eq!(sup.read_pid().await, Some(1234));
        std::fs::write(&pid_file, "garbage").unwrap();
        assert_eq!(sup.read_pid().await, None);
    }

    #[tokio::test]
    async fn test_read_pid_rejects_group_targets() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("chronyd.pid");
        let sup = supervisor(&pid_file, "true", &[]);

        // Each of these would reach kill(2) as init, our own group, every
        // process, or a negative process group
        for contents in ["0", "1", "-1", "-4242", "4294967295\n", "3000000000", "2147483648"] {
            std::fs::write(&pid_file, contents).unwrap();
            assert_eq!(sup.read_pid().await, None, "pid file: {contents:?}");
        }

        std::fs::write(&pid_file, "2147483647").unwrap();
        assert_eq!(sup.read_pid().await, Some(i32::MAX as u32));
    }

    #[tokio::test]
    async fn test_terminate_rejects_out_of_range_pid() {
        let dir = tempdir().unwrap();
        let sup = supervisor(&dir.path().join("chronyd.pid"), "true", &[]);

        assert!(matches!(
            sup.terminate_pid(u32::MAX).await,
            Termination::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_restart_when_nothing_running() {
        let dir = tempdir().unwrap();
        let sup = supervisor(&dir.path().join("chronyd.pid"), "sh", &["-c", "exit 0"]);

        let outcome = sup.restart().await;
        assert_eq!(outcome.termination, Termination::NotRunning);
        assert!(outcome.success());
        assert!(outcome.spawned.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_pid_file_is_not_running() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("chronyd.pid");
        // A pid that almost certainly doesn't exist
        std::fs::write(&pid_file, "4194300").unwrap();

        let sup = supervisor(&pid_file, "true", &[]);
        assert_eq!(sup.terminate().await, Termination::NotRunning);
        assert!(!pid_file.exists());
    }

    /// Start `script` under `sh`, record its pid like chronyd would and reap
    /// it on a background thread as soon as it exits.
    fn spawn_reaped(script: &str, pid_file: &Path) -> u32 {
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        std::fs::write(pid_file, pid.to_string()).unwrap();
        std::thread::spawn(move || child.wait());
        pid
    }

    #[tokio::test]
    async fn test_terminate_running_instance() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("chronyd.pid");
        let pid = spawn_reaped("exec sleep 30", &pid_file);

        let sup = supervisor(&pid_file, "true", &[]);
        assert_eq!(sup.read_pid().await, Some(pid));
        assert_eq!(
            sup.terminate().await,
            Termination::Stopped { pids: vec![pid] }
        );
        assert!(!is_alive(Pid::from_raw(pid as i32)));
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_sigkill() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("chronyd.pid");
        let pid = spawn_reaped("trap '' TERM; exec sleep 30", &pid_file);
        // Let the shell install the trap before signalling
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stop_timeout = Duration::from_millis(200);
        let sup = DaemonSupervisor::new(
            CommandLine::parse("true").unwrap(),
            &pid_file,
            None,
            stop_timeout,
        );

        let started = std::time::Instant::now();
        assert_eq!(
            sup.terminate().await,
            Termination::Stopped { pids: vec![pid] }
        );
        assert!(started.elapsed() >= stop_timeout);
        assert!(!is_alive(Pid::from_raw(pid as i32)));
    }

    #[tokio::test]
    async fn test_terminate_reports_survivor_as_failed() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("chronyd.pid");

        // An exited child nobody waits on stays in the process table and
        // keeps answering kill(pid, 0) through SIGTERM and SIGKILL
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        std::fs::write(&pid_file, pid.to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sup = DaemonSupervisor::new(
            CommandLine::parse("true").unwrap(),
            &pid_file,
            None,
            Duration::from_millis(100),
        );

        let termination = sup.terminate().await;
        child.wait().unwrap();
        match termination {
            Termination::Failed(reason) => {
                assert!(reason.contains("still running after SIGKILL"), "got: {reason}")
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let dir = tempdir().unwrap();
        let sup = supervisor(
            &dir.path().join("chronyd.pid"),
            "chrony-api-definitely-missing-chronyd",
            &["-f", "/etc/chrony/chrony.conf"],
        );

        let outcome = sup.restart().await;
        assert_eq!(outcome.termination, Termination::NotRunning);
        assert!(!outcome.success());
        let err = outcome.spawned.unwrap_err();
        assert!(
            err.to_string()
                .starts_with("failed to spawn chrony-api-definitely-missing-chronyd")
        );
    }
}
