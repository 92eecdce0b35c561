//! `run`: the long-lived agent loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use linkmesh::network::sysctl::WATCH_INTERVAL;
use linkmesh::trigger::{Checker, Reconciler};
use linkmesh::{ClusterCidrs, DefaultNetwork, Network, NetworkManager};
use tokio::sync::watch;
use tracing::info;

use super::watch::FileWatcher;

#[derive(Args)]
pub struct RunCmd {
    /// Node config file (YAML or JSON). A missing file means no desired state.
    #[arg(long, short)]
    config: PathBuf,

    /// Seconds between drift checks.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    check_interval: u64,

    /// Seconds to wait for further changes before applying one.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    debounce: u64,

    /// Seconds between polls of the config file.
    #[arg(long, value_name = "SECS", default_value_t = 2)]
    poll_interval: u64,

    /// Skip one-time sysctl and firewall chain setup.
    #[arg(long)]
    skip_init: bool,
}

impl RunCmd {
    pub async fn run(self, cidrs: ClusterCidrs) -> anyhow::Result<()> {
        let network = DefaultNetwork::new(cidrs.clone()).await?;
        if !self.skip_init {
            network.init_sys().await;
        }
        let watchdog = network.sysctl().spawn_watchdog(WATCH_INTERVAL);
        let manager = Arc::new(NetworkManager::new(network));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let checker = Checker::new(
            Arc::clone(&manager),
            Duration::from_secs(self.check_interval),
        )
        .spawn(shutdown_rx.clone());

        let events = FileWatcher::new(self.config.clone(), cidrs)
            .spawn(Duration::from_secs(self.poll_interval), shutdown_rx);
        let reconciler = Reconciler::new(manager, Duration::from_secs(self.debounce));

        info!(config = %self.config.display(), "agent started");
        tokio::select! {
            _ = reconciler.run(events) => {}
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutting down");
            }
        }

        let _ = shutdown_tx.send(true);
        checker.await?;
        watchdog.abort();
        Ok(())
    }
}
