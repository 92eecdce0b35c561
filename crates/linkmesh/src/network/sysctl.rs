//! Per-interface sysctls with a re-apply watchdog.
//!
//! Other agents on the node (CNI plugins, network managers) may reset
//! interface sysctls. Every value written through [`Sysctl`] is remembered
//! and periodically written again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{IpFamily, NetworkError, Result};

/// Re-apply period of the watchdog.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(30);

/// Writer for `/proc/sys` entries.
#[derive(Debug, Clone)]
pub struct Sysctl {
    root: PathBuf,
    watched: Arc<Mutex<BTreeMap<PathBuf, String>>>,
}

impl Default for Sysctl {
    fn default() -> Self {
        Self::new()
    }
}

impl Sysctl {
    pub fn new() -> Self {
        Self::with_root("/proc/sys")
    }

    /// Use a different root, e.g. a scratch directory in tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            watched: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Path of `net.<family>.conf.<dev>.<name>`.
    ///
    /// Built by path segment so device names containing dots
    /// (`vxlan.calico`) stay intact.
    pub fn conf_path(&self, family: IpFamily, dev: &str, name: &str) -> PathBuf {
        let family = match family {
            IpFamily::V4 => "ipv4",
            IpFamily::V6 => "ipv6",
        };
        self.root
            .join("net")
            .join(family)
            .join("conf")
            .join(dev)
            .join(name)
    }

    /// Write `value` and keep it under watch.
    pub async fn set_and_watch(&self, path: PathBuf, value: &str) -> Result<()> {
        self.watched
            .lock()
            .await
            .insert(path.clone(), value.to_string());
        write_if_changed(&path, value).await.map(drop)
    }

    /// Loose reverse-path filtering (`rp_filter=2`).
    pub async fn enable_loose_mode(&self, dev: &str) -> Result<()> {
        self.set_and_watch(self.conf_path(IpFamily::V4, dev, "rp_filter"), "2")
            .await
    }

    /// `disable_ipv6=0`.
    pub async fn enable_ipv6(&self, dev: &str) -> Result<()> {
        self.set_and_watch(self.conf_path(IpFamily::V6, dev, "disable_ipv6"), "0")
            .await
    }

    /// Write every watched entry again. Failures are logged.
    pub async fn reapply(&self) {
        let watched = self.watched.lock().await.clone();
        for (path, value) in watched {
            match write_if_changed(&path, &value).await {
                Ok(true) => debug!(path = %path.display(), %value, "sysctl restored"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "sysctl watchdog"),
            }
        }
    }

    /// Run [`reapply`](Self::reapply) every `interval` until aborted.
    pub fn spawn_watchdog(&self, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.reapply().await;
            }
        })
    }

    pub async fn watched_len(&self) -> usize {
        self.watched.lock().await.len()
    }
}

/// Returns whether the file was written. Surrounding newlines are ignored
/// when comparing.
async fn write_if_changed(path: &Path, value: &str) -> Result<bool> {
    let err = |source| NetworkError::Sysctl {
        key: path.display().to_string(),
        source,
    };
    let existing = tokio::fs::read_to_string(path).await.map_err(err)?;
    if existing.trim_matches('\n') == value {
        return Ok(false);
    }
    tokio::fs::write(path, value).await.map_err(err)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scratch(name: &str) -> Sysctl {
        let root = std::env::temp_dir().join(format!(
            "linkmesh-sysctl-{}-{}",
            name,
            std::process::id()
        ));
        let _ = tokio::fs::remove_dir_all(&root).await;
        let sysctl = Sysctl::with_root(&root);
        let dir = sysctl.conf_path(IpFamily::V4, "vxlan.calico", "rp_filter");
        tokio::fs::create_dir_all(dir.parent().unwrap()).await.unwrap();
        tokio::fs::write(&dir, "1\n").await.unwrap();
        sysctl
    }

    #[test]
    fn test_conf_path_keeps_dotted_names() {
        let sysctl = Sysctl::with_root("/proc/sys");
        assert_eq!(
            sysctl.conf_path(IpFamily::V4, "vxlan.calico", "rp_filter"),
            PathBuf::from("/proc/sys/net/ipv4/conf/vxlan.calico/rp_filter")
        );
        assert_eq!(
            sysctl.conf_path(IpFamily::V6, "vx-bridge-6", "disable_ipv6"),
            PathBuf::from("/proc/sys/net/ipv6/conf/vx-bridge-6/disable_ipv6")
        );
    }

    #[tokio::test]
    async fn test_write_and_skip_unchanged() {
        let sysctl = scratch("write").await;
        let path = sysctl.conf_path(IpFamily::V4, "vxlan.calico", "rp_filter");

        assert!(write_if_changed(&path, "2").await.unwrap());
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "2");
        assert!(!write_if_changed(&path, "2").await.unwrap());
    }

    #[tokio::test]
    async fn test_reapply_restores_drift() {
        let sysctl = scratch("reapply").await;
        sysctl.enable_loose_mode("vxlan.calico").await.unwrap();
        assert_eq!(sysctl.watched_len().await, 1);

        let path = sysctl.conf_path(IpFamily::V4, "vxlan.calico", "rp_filter");
        tokio::fs::write(&path, "1\n").await.unwrap();
        sysctl.reapply().await;
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "2");
    }

    #[tokio::test]
    async fn test_missing_entry_is_error() {
        let sysctl = scratch("missing").await;
        let err = sysctl.enable_loose_mode("no-such-dev").await.unwrap_err();
        assert!(matches!(err, NetworkError::Sysctl { .. }));
        // Still watched, so it is applied once the device appears.
        assert_eq!(sysctl.watched_len().await, 1);
    }
}
