//! `capture`: dump the live overlay state.

use clap::Args;
use linkmesh::{ClusterCidrs, DefaultNetwork, Network};

use super::{Format, print};

#[derive(Args)]
pub struct CaptureCmd {
    /// Output format.
    #[arg(long, short, value_enum, default_value_t = Format::Yaml)]
    format: Format,
}

impl CaptureCmd {
    pub async fn run(self, cidrs: ClusterCidrs) -> anyhow::Result<()> {
        let network = DefaultNetwork::new(cidrs).await?;
        let live = network.load().await?;
        print(&live, self.format)
    }
}
