//! Agent subcommands and the pieces they share.

pub mod capture;
pub mod diff;
pub mod run;
mod watch;

use std::path::Path;

use anyhow::Context;
use clap::{Args, ValueEnum};
use linkmesh::{ClusterCidrs, NodeConfig, NodeConfigSpec};
use serde::Serialize;

/// Overlay address ranges the VXLAN devices are numbered from.
#[derive(Args, Debug, Clone)]
pub struct CidrArgs {
    /// IPv4 range of the bridge overlay.
    #[arg(long, global = true, env = "LINKMESH_BRIDGE_CIDR_V4", default_value = "220.0.0.0/8")]
    bridge_cidr_v4: String,

    /// IPv6 range of the bridge overlay.
    #[arg(long, global = true, env = "LINKMESH_BRIDGE_CIDR_V6", default_value = "9480::0/16")]
    bridge_cidr_v6: String,

    /// IPv4 range of the local overlay.
    #[arg(long, global = true, env = "LINKMESH_LOCAL_CIDR_V4", default_value = "210.0.0.0/8")]
    local_cidr_v4: String,

    /// IPv6 range of the local overlay.
    #[arg(long, global = true, env = "LINKMESH_LOCAL_CIDR_V6", default_value = "9470::0/16")]
    local_cidr_v6: String,
}

impl CidrArgs {
    pub fn into_cidrs(self) -> ClusterCidrs {
        ClusterCidrs {
            bridge_v4: self.bridge_cidr_v4,
            bridge_v6: self.bridge_cidr_v6,
            local_v4: self.local_cidr_v4,
            local_v6: self.local_cidr_v6,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

/// Print `value` to stdout.
pub fn print<T: Serialize>(value: &T, format: Format) -> anyhow::Result<()> {
    let out = match format {
        Format::Yaml => serde_yaml::to_string(value)?,
        Format::Json => serde_json::to_string_pretty(value)? + "\n",
    };
    print!("{out}");
    Ok(())
}

/// Parse a node config document.
///
/// Accepts either the full object (`metadata` + `spec`) or a bare spec.
/// JSON parses as YAML.
pub fn parse_node_config(text: &str) -> anyhow::Result<NodeConfigSpec> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    let is_object = value
        .as_mapping()
        .is_some_and(|m| m.contains_key("spec") || m.contains_key("metadata"));
    if is_object {
        Ok(serde_yaml::from_value::<NodeConfig>(value)?.spec)
    } else if value.is_null() {
        Ok(NodeConfigSpec::default())
    } else {
        Ok(serde_yaml::from_value(value)?)
    }
}

pub async fn read_node_config(path: &Path) -> anyhow::Result<NodeConfigSpec> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_node_config(&text).with_context(|| format!("parsing {}", path.display()))
}
