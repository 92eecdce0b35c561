//! `diff`: plan a node config against the live state without applying it.

use std::path::PathBuf;

use clap::Args;
use linkmesh::{ClusterCidrs, DefaultNetwork, NetworkManager};

use super::{Format, print, read_node_config};

#[derive(Args)]
pub struct DiffCmd {
    /// Node config file (YAML or JSON).
    #[arg(long, short)]
    config: PathBuf,

    /// Output format.
    #[arg(long, short, value_enum, default_value_t = Format::Yaml)]
    format: Format,
}

impl DiffCmd {
    pub async fn run(self, cidrs: ClusterCidrs) -> anyhow::Result<()> {
        let desired = read_node_config(&self.config).await?;
        let manager = NetworkManager::new(DefaultNetwork::new(cidrs).await?);
        let plan = manager.plan(&desired).await?;
        if plan.is_empty() {
            eprintln!("live state matches {}", self.config.display());
        }
        print(&plan, self.format)
    }
}
