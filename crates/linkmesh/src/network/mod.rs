//! Kernel adapter contract and its Linux implementation.
//!
//! A [`Network`] performs add/delete for each resource category and loads
//! the full live state. Every category operation attempts all of its items
//! and reports the failures together as [`NetworkError::Batch`].

use std::fmt;
use std::future::Future;
use std::io;
use std::net::IpAddr;

use async_trait::async_trait;

use crate::netlink;
use crate::nodeconfig::{
    Arp, Category, CategoryKind, ClusterCidrs, Device, Fdb, IpSet, Iptables, NodeConfigSpec,
    Route, XfrmPolicy, XfrmState,
};
use crate::util::addr::AddrError;
use crate::util::hex::HexError;

mod command;
mod default;
mod device;
pub mod ipset;
pub mod iptables;
mod neigh;
mod route;
pub mod sysctl;
mod xfrm;

pub use default::{
    CatalogDevice, DEFAULT_REQID, DefaultNetwork, ROUTE_TABLE, RULE_PRIORITY, VXLAN_OVERHEAD,
};
pub use iptables::{Backend, Firewall};
pub use sysctl::Sysctl;

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Address family of an overlay resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// `AF_INET` / `AF_INET6`.
    pub fn af(self) -> u8 {
        match self {
            IpFamily::V4 => libc::AF_INET as u8,
            IpFamily::V6 => libc::AF_INET6 as u8,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("ipv4"),
            IpFamily::V6 => f.write_str("ipv6"),
        }
    }
}

/// Direction of a category operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Add => f.write_str("add"),
            Op::Delete => f.write_str("delete"),
        }
    }
}

/// Errors from the kernel adapter.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error(transparent)]
    Netlink(#[from] netlink::Error),

    /// An external tool (iptables, ipset) exited unsuccessfully.
    #[error("{command}: {message}")]
    Command {
        command: String,
        status: Option<i32>,
        message: String,
    },

    #[error("sysctl {key}: {source}")]
    Sysctl {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Addr(#[from] AddrError),

    #[error("invalid PSK: {0}")]
    Hex(#[from] HexError),

    /// An element that cannot be applied as written.
    #[error("{0}")]
    Invalid(String),

    #[error("only support ipv4, can't avoid cidr {0} masq")]
    Ipv4Only(String),

    /// Per-item failures of one category operation.
    #[error("{}", join_items(.0))]
    Batch(Vec<ItemError>),
}

impl NetworkError {
    /// True if the failure means the object is already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            NetworkError::Netlink(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// True if the failure means the object is already present.
    pub fn is_already_exists(&self) -> bool {
        match self {
            NetworkError::Netlink(e) => e.is_already_exists(),
            _ => false,
        }
    }
}

/// One failed item of a category operation.
#[derive(Debug)]
pub struct ItemError {
    /// The item's [`Category::key`].
    pub item: String,
    pub error: NetworkError,
}

impl ItemError {
    pub fn new<T: Category>(item: &T, error: NetworkError) -> Self {
        Self {
            item: item.key(),
            error,
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.error)
    }
}

fn join_items(items: &[ItemError]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Ok if no item failed, otherwise a [`NetworkError::Batch`].
pub fn batch(errors: Vec<ItemError>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(NetworkError::Batch(errors))
    }
}

/// Treat EEXIST as success.
pub(crate) fn exists_ok(result: netlink::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other.map_err(NetworkError::from),
    }
}

/// Treat ENOENT/ESRCH/ENODEV as success.
pub(crate) fn missing_ok(result: netlink::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other.map_err(NetworkError::from),
    }
}

/// Per-category failures of one live-state load.
///
/// Every loader runs; a failed category contributes an empty collection
/// and one [`ItemError`] named after the category.
#[derive(Debug, Default)]
pub struct LoadErrors(Vec<ItemError>);

impl LoadErrors {
    /// The loaded items, or empty with the failure recorded.
    pub fn take<T: Default>(&mut self, kind: CategoryKind, result: Result<T>) -> T {
        result.unwrap_or_else(|error| {
            self.record(kind, error);
            T::default()
        })
    }

    pub fn record(&mut self, kind: CategoryKind, error: NetworkError) {
        self.0.push(ItemError {
            item: kind.name().to_string(),
            error,
        });
    }

    /// `value` if no category failed, otherwise all failures together.
    pub fn finish<T>(self, value: T) -> Result<T> {
        batch(self.0).map(|()| value)
    }
}

/// Run `f` on every item, collecting failures keyed by item.
pub async fn for_each_item<'a, T, F, Fut>(items: &'a [T], f: F) -> Result<()>
where
    T: Category,
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut errors = Vec::new();
    for item in items {
        if let Err(error) = f(item).await {
            errors.push(ItemError::new(item, error));
        }
    }
    batch(errors)
}

/// Kernel-state backend.
///
/// Implementations must treat idempotent conflicts as success: adding
/// something already present and deleting something already absent.
#[async_trait]
pub trait Network: Send + Sync {
    /// Read every category's live state.
    async fn load(&self) -> Result<NodeConfigSpec>;

    async fn devices(&self, op: Op, items: &[Device]) -> Result<()>;
    async fn routes(&self, op: Op, items: &[Route]) -> Result<()>;
    async fn iptables(&self, op: Op, items: &[Iptables]) -> Result<()>;
    async fn fdbs(&self, op: Op, items: &[Fdb]) -> Result<()>;
    async fn arps(&self, op: Op, items: &[Arp]) -> Result<()>;
    async fn xfrm_policies(&self, op: Op, items: &[XfrmPolicy]) -> Result<()>;
    async fn xfrm_states(&self, op: Op, items: &[XfrmState]) -> Result<()>;
    async fn ipsets(&self, op: Op, items: &[IpSet]) -> Result<()>;

    /// Replace the overlay CIDRs the devices are numbered from.
    async fn update_cidr_config(&self, cidrs: &ClusterCidrs);

    /// One-time baseline setup. Failures are logged, never returned.
    async fn init_sys(&self);
}

/// Run `op` for one category of `spec`.
pub async fn apply<N: Network + ?Sized>(
    network: &N,
    kind: CategoryKind,
    op: Op,
    spec: &NodeConfigSpec,
) -> Result<()> {
    match kind {
        CategoryKind::Device => network.devices(op, &spec.devices).await,
        CategoryKind::Route => network.routes(op, &spec.routes).await,
        CategoryKind::Iptables => network.iptables(op, &spec.iptables).await,
        CategoryKind::Fdb => network.fdbs(op, &spec.fdbs).await,
        CategoryKind::Arp => network.arps(op, &spec.arps).await,
        CategoryKind::XfrmPolicy => network.xfrm_policies(op, &spec.xfrm_policies).await,
        CategoryKind::XfrmState => network.xfrm_states(op, &spec.xfrm_states).await,
        CategoryKind::IpSet => network.ipsets(op, &spec.ipsets).await,
    }
}
