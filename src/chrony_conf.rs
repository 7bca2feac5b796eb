use std::path::{Path, PathBuf};

/// Directive that makes chronyd answer NTP requests from other hosts.
pub const ALLOW_DIRECTIVE: &str = "allow";

/// Line appended when server mode is switched on and no directive exists.
pub const DEFAULT_ALLOW_LINE: &str = "allow 0.0.0.0/0";

#[derive(Debug, thiserror::Error)]
pub enum ServerModeError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

pub fn is_allow_directive(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.starts_with(ALLOW_DIRECTIVE)
}

pub fn server_mode_enabled(contents: &str) -> bool {
    contents.lines().any(is_allow_directive)
}

/// Rewrite `contents` so that server mode is `enabled`.
///
/// Every other line is kept byte-for-byte, terminators included. Disabling
/// drops all directive lines; enabling keeps existing directives or appends
/// [`DEFAULT_ALLOW_LINE`] when there are none.
pub fn apply_server_mode(contents: &str, enabled: bool) -> String {
    let mut out = String::with_capacity(contents.len() + DEFAULT_ALLOW_LINE.len() + 1);
    let mut found = false;

    for line in contents.split_inclusive('\n') {
        if is_allow_directive(line) {
            found = true;
            if !enabled {
                continue;
            }
        }
        out.push_str(line);
    }

    if enabled && !found {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(DEFAULT_ALLOW_LINE);
        out.push('\n');
    }

    out
}

/// Reads and toggles the server-mode directive in chrony's configuration file.
///
/// Nothing is cached: every call goes back to disk. Callers serialize
/// [`ServerModeStore::write`] themselves.
#[derive(Debug, Clone)]
pub struct ServerModeStore {
    path: PathBuf,
}

impl ServerModeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<String, ServerModeError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ServerModeError::Read {
                path: self.path.display().to_string(),
                source,
            })
    }

    /// An unreadable file counts as server mode off.
    pub async fn read(&self) -> bool {
        match self.load().await {
            Ok(contents) => server_mode_enabled(&contents),
            Err(e) => {
                tracing::warn!(error = %e, "could not read server mode");
                false
            }
        }
    }

    /// The file is rewritten in place so a bind-mounted file keeps its inode.
    /// Truncation and the new contents are not atomic: an unlocked
    /// [`ServerModeStore::read`] racing this call can see an empty file and
    /// report server mode off, and a write failing part-way leaves the file
    /// truncated.
    pub async fn write(&self, enabled: bool) -> Result<(), ServerModeError> {
        let contents = self.load().await?;
        let updated = apply_server_mode(&contents, enabled);
        if updated == contents {
            return Ok(());
        }

        tokio::fs::write(&self.path, updated)
            .await
            .map_err(|source| ServerModeError::Write {
                path: self.path.display().to_string(),
                source,
            })?;

        tracing::info!(path = %self.path.display(), enabled, "updated server mode");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONF: &str = "\
# Use public servers from the pool.ntp.org project.
pool pool.ntp.org iburst
  allow 192.168.0.0/16
driftfile /var/lib/chrony/drift
# allow 10.0.0.0/8
makestep 1.0 3
allow 10.0.0.0/8
rtcsync
";

    fn non_directive_lines(contents: &str) -> Vec<&str> {
        contents.lines().filter(|l| !is_allow_directive(l)).collect()
    }

    #[test]
    fn test_directive_detection() {
        assert!(is_allow_directive("allow"));
        assert!(is_allow_directive("   allow 0.0.0.0/0"));
        assert!(!is_allow_directive("# allow 0.0.0.0/0"));
        assert!(!is_allow_directive("   "));
        assert!(!is_allow_directive("deny all"));
    }

    #[test]
    fn test_server_mode_enabled() {
        assert!(server_mode_enabled(CONF));
        assert!(!server_mode_enabled("pool pool.ntp.org\n# allow all\n"));
        assert!(!server_mode_enabled(""));
    }

    #[test]
    fn test_disable_removes_every_directive() {
        let out = apply_server_mode(CONF, false);
        assert!(!server_mode_enabled(&out));
        assert_eq!(out.lines().count(), CONF.lines().count() - 2);
        assert!(out.contains("# allow 10.0.0.0/8\n"));
    }

    #[test]
    fn test_enable_keeps_existing_directives_in_place() {
        assert_eq!(apply_server_mode(CONF, true), CONF);
    }

    #[test]
    fn test_enable_twice_appends_once() {
        let input = "pool pool.ntp.org iburst\n";
        let once = apply_server_mode(input, true);
        let twice = apply_server_mode(&once, true);
        assert_eq!(once, "pool pool.ntp.org iburst\nallow 0.0.0.0/0\n");
        assert_eq!(twice, once);
    }

    #[test]
    fn test_toggle_preserves_order_and_appends_at_end() {
        let off = apply_server_mode(CONF, false);
        let on = apply_server_mode(&off, true);

        assert_eq!(non_directive_lines(&on), non_directive_lines(CONF));
        assert_eq!(on.lines().last(), Some(DEFAULT_ALLOW_LINE));
        assert_eq!(on.lines().filter(|l| is_allow_directive(l)).count(), 1);
    }

    #[test]
    fn test_toggle_does_not_accumulate() {
        let mut contents = "rtcsync\n".to_string();
        for _ in 0..3 {
            contents = apply_server_mode(&contents, false);
            contents = apply_server_mode(&contents, true);
        }
        assert_eq!(contents, "rtcsync\nallow 0.0.0.0/0\n");
    }

    #[test]
    fn test_enable_without_trailing_newline() {
        assert_eq!(
            apply_server_mode("rtcsync", true),
            "rtcsync\nallow 0.0.0.0/0\n"
        );
    }

    #[test]
    fn test_enable_empty_file() {
        assert_eq!(apply_server_mode("", true), "allow 0.0.0.0/0\n");
    }

    #[test]
    fn test_preserves_crlf_lines() {
        let input = "pool a.ntp.org\r\nallow all\r\nrtcsync\r\n";
        assert_eq!(apply_server_mode(input, false), "pool a.ntp.org\r\nrtcsync\r\n");
    }

    #[tokio::test]
    async fn test_store_read_and_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chrony.conf");
        std::fs::write(&path, "pool pool.ntp.org iburst\n").unwrap();

        let store = ServerModeStore::new(&path);
        assert!(!store.read().await);

        store.write(true).await.unwrap();
        assert!(store.read().await);
        store.write(true).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "pool pool.ntp.org iburst\nallow 0.0.0.0/0\n"
        );

        store.write(false).await.unwrap();
        assert!(!store.read().await);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "pool pool.ntp.org iburst\n"
        );
    }

    #[tokio::test]
    async fn test_store_missing_file() {
        let dir = tempdir().unwrap();
        let store = ServerModeStore::new(dir.path().join("missing.conf"));

        assert!(!store.read().await);
        let err = store.write(true).await.unwrap_err();
        assert!(matches!(err, ServerModeError::Read { .. }));
        assert!(err.to_string().contains("missing.conf"));
        assert!(!store.path().exists());
    }
}
