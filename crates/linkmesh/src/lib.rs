//! Overlay network reconciliation for Linux nodes.
//!
//! This crate keeps a node's overlay networking in line with a declared
//! [`NodeConfigSpec`]: VXLAN devices, routes in the overlay table, bridge
//! FDB and ARP entries, firewall rules, IPsec policies and states, and the
//! masquerade-exemption IP set.
//!
//! - [`nodeconfig`] - the desired/observed data model
//! - [`diff`] - set difference between two configurations
//! - [`network`] - the kernel adapter trait and its netlink implementation
//! - [`manager`] - load, diff and apply cycles with status reporting
//! - [`trigger`] - debounced desired-state events and the drift checker
//! - [`netlink`] - the async rtnetlink/xfrm layer underneath
//!
//! # Features
//!
//! - `lab` - [`lab::FakeNetwork`], an in-memory backend for tests and dry runs
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use linkmesh::{ClusterCidrs, DefaultNetwork, NetworkManager, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let network = DefaultNetwork::new(ClusterCidrs::default()).await?;
//!     network.init_sys().await;
//!
//!     let manager = Arc::new(NetworkManager::new(network));
//!     let config: NodeConfig = serde_yaml::from_str(&std::fs::read_to_string("node.yaml")?)?;
//!     let status = manager.update_from_crd(&config.spec).await;
//!     println!("{status}: {}", manager.get_reason().await);
//!     Ok(())
//! }
//! ```

pub mod diff;
pub mod manager;
pub mod netlink;
pub mod network;
pub mod nodeconfig;
pub mod trigger;
pub mod util;

#[cfg(feature = "lab")]
pub mod lab;

pub use diff::{ConfigDiff, diff};
pub use manager::{ApplyError, NetworkManager, SyncError, SyncStatus};
pub use network::{DefaultNetwork, Network, NetworkError, Op};
pub use nodeconfig::{
    Arp, Category, CategoryKind, ClusterCidrs, Device, Fdb, IpSet, Iptables, NodeConfig,
    NodeConfigSpec, Route, XfrmPolicy, XfrmState,
};
pub use trigger::{Checker, Debouncer, DesiredState, Reconciler};
