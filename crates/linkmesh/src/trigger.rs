//! Event sources that drive the [`NetworkManager`].
//!
//! Two paths reach the manager: desired-state events, coalesced through a
//! [`Debouncer`], and a periodic [`Checker`] that re-syncs to heal drift.
//! Both only log the resulting status; the manager keeps the reason.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::manager::{NetworkManager, SyncStatus};
use crate::network::Network;
use crate::nodeconfig::{ClusterCidrs, NodeConfigSpec};

/// Delay before a desired-state change is applied.
pub const DEBOUNCE_DELAY: Duration = Duration::from_secs(5);

/// Interval between drift checks.
pub const REQUEUE_TIME: Duration = Duration::from_secs(30);

/// Runs only the last of a burst of actions.
///
/// Each [`call`](Debouncer::call) cancels the previously scheduled action if
/// its delay has not yet elapsed. Once an action has started it runs to
/// completion on its own task.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `action` after the delay, replacing any pending one.
    pub fn call<F>(&mut self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            // Detached so that a later cancel cannot interrupt it.
            tokio::spawn(action);
        }));
    }

    /// Drop the pending action, if it has not started.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            if !handle.is_finished() {
                debug!("superseding pending update");
            }
            handle.abort();
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_DELAY)
    }
}

/// A change of the desired configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredState {
    /// The node config exists. `cidrs` carries the cluster's overlay ranges
    /// when known.
    Present {
        spec: NodeConfigSpec,
        cidrs: Option<ClusterCidrs>,
    },
    /// The node config was removed.
    Absent,
}

/// Log a sync outcome.
pub async fn log_result<N: Network>(manager: &NetworkManager<N>, status: SyncStatus) {
    match status {
        SyncStatus::Exception => {
            let reason = manager.get_reason().await;
            warn!(%reason, "sync failed");
        }
        SyncStatus::Success => info!("sync succeeded"),
    }
}

/// Applies desired-state events to a manager.
pub struct Reconciler<N> {
    manager: Arc<NetworkManager<N>>,
    debouncer: Debouncer,
}

impl<N: Network + 'static> Reconciler<N> {
    pub fn new(manager: Arc<NetworkManager<N>>, debounce: Duration) -> Self {
        Self {
            manager,
            debouncer: Debouncer::new(debounce),
        }
    }

    /// Handle one event.
    ///
    /// Removal is applied at once and drops any pending update. A present
    /// config first updates the overlay CIDRs, then schedules a debounced
    /// sync.
    pub async fn handle(&mut self, event: DesiredState) {
        match event {
            DesiredState::Absent => {
                info!("node config removed, clearing desired state");
                self.debouncer.cancel();
                let status = self
                    .manager
                    .update_from_crd(&NodeConfigSpec::default())
                    .await;
                log_result(&self.manager, status).await;
            }
            DesiredState::Present { spec, cidrs } => {
                if let Some(cidrs) = cidrs {
                    self.manager.update_config(&cidrs).await;
                }
                let manager = Arc::clone(&self.manager);
                self.debouncer.call(async move {
                    let status = manager.update_from_crd(&spec).await;
                    log_result(&manager, status).await;
                });
            }
        }
    }

    /// Consume events until the stream ends.
    pub async fn run<S>(mut self, events: S)
    where
        S: Stream<Item = DesiredState>,
    {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            self.handle(event).await;
        }
        debug!("desired-state stream closed");
    }
}

/// Periodic drift check.
pub struct Checker<N> {
    manager: Arc<NetworkManager<N>>,
    interval: Duration,
}

impl<N: Network + 'static> Checker<N> {
    pub fn new(manager: Arc<NetworkManager<N>>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Re-sync every interval until `shutdown` changes or its sender drops.
    ///
    /// The first check runs one full interval after start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!("checking for drift");
                    let status = self.manager.update_from_checker().await;
                    log_result(&self.manager, status).await;
                }
                _ = shutdown.changed() => {
                    info!("checker stopped");
                    return;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_runs_last_only() {
        let hits = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_secs(5));

        for i in 1..=3 {
            let (hits, last) = (Arc::clone(&hits), Arc::clone(&last));
            debouncer.call(async move {
                hits.fetch_add(1, Ordering::SeqCst);
                last.store(i, Ordering::SeqCst);
            });
            time::sleep(Duration::from_secs(1)).await;
        }

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_waits_for_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::default();
        let counter = Arc::clone(&hits);
        debouncer.call(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_action_not_cancelled() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_secs(1));
        let counter = Arc::clone(&done);
        debouncer.call(async move {
            time::sleep(Duration::from_secs(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Let the first action start, then supersede it.
        time::sleep(Duration::from_secs(2)).await;
        debouncer.call(async {});
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_secs(1));
        let counter = Arc::clone(&hits);
        debouncer.call(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
