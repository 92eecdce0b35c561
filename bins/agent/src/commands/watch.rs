//! Turns a node config file into a stream of desired-state events.

use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use linkmesh::{ClusterCidrs, DesiredState};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::read_node_config;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Missing,
    Modified(SystemTime),
}

/// Polls a file and reports it as present (on every change) or absent.
pub struct FileWatcher {
    path: PathBuf,
    cidrs: ClusterCidrs,
    seen: Option<Seen>,
}

impl FileWatcher {
    pub fn new(path: PathBuf, cidrs: ClusterCidrs) -> Self {
        Self {
            path,
            cidrs,
            seen: None,
        }
    }

    /// Check the file once; `None` if nothing changed.
    ///
    /// An unreadable or malformed file is logged and retried on the next
    /// poll.
    pub async fn poll(&mut self) -> Option<DesiredState> {
        let now = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Seen::Modified(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Seen::Missing,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot stat node config");
                return None;
            }
        };
        if self.seen.as_ref() == Some(&now) {
            return None;
        }

        match now {
            Seen::Missing => {
                self.seen = Some(now);
                Some(DesiredState::Absent)
            }
            Seen::Modified(_) => match read_node_config(&self.path).await {
                Ok(spec) => {
                    debug!(path = %self.path.display(), "node config changed");
                    self.seen = Some(now);
                    Some(DesiredState::Present {
                        spec,
                        cidrs: Some(self.cidrs.clone()),
                    })
                }
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "ignoring node config");
                    None
                }
            },
        }
    }

    /// Poll every `interval` on a background task until `shutdown` fires.
    pub fn spawn(
        mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> ReceiverStream<DesiredState> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(event) = self.poll().await {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("linkmesh-agent-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("node.yaml")
    }

    #[tokio::test]
    async fn test_missing_then_present() {
        let path = scratch("present");
        let _ = std::fs::remove_file(&path);
        let mut watcher = FileWatcher::new(path.clone(), ClusterCidrs::default());

        assert_eq!(watcher.poll().await, Some(DesiredState::Absent));
        assert_eq!(watcher.poll().await, None);

        std::fs::write(&path, "routes:\n  - cidr: 10.0.0.0/8\n    gw: 220.0.0.7\n    dev: vx-bridge\n")
            .unwrap();
        match watcher.poll().await {
            Some(DesiredState::Present { spec, cidrs }) => {
                assert_eq!(spec.routes.len(), 1);
                assert_eq!(cidrs, Some(ClusterCidrs::default()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(watcher.poll().await, None);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(watcher.poll().await, Some(DesiredState::Absent));
    }

    #[tokio::test]
    async fn test_malformed_is_retried() {
        let path = scratch("malformed");
        std::fs::write(&path, "routes: [").unwrap();
        let mut watcher = FileWatcher::new(path.clone(), ClusterCidrs::default());

        assert_eq!(watcher.poll().await, None);
        assert_eq!(watcher.poll().await, None);
        std::fs::remove_file(&path).unwrap();
    }
}
