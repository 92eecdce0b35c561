//! Linux [`Network`] backed by netlink, iptables, ipset and sysctl.
//!
//! The category operations live next to their kernel plumbing in the
//! sibling modules (`device`, `route`, `neigh`, `xfrm`, `iptables`,
//! `ipset`), each as an `impl DefaultNetwork` block. This file owns the
//! shared handles, the device catalog and the trait dispatch.

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use super::ipset::AVOID_MASQ_RULE;
use super::iptables::Firewall;
use super::sysctl::Sysctl;
use super::{
    IpFamily, ItemError, LoadErrors, Network, NetworkError, Op, Result, batch, for_each_item,
};
use crate::netlink::{Connection, Protocol};
use crate::nodeconfig::{
    Arp, CategoryKind, ClusterCidrs, Device, Fdb, IpSet, Iptables, NodeConfigSpec, Route,
    XfrmPolicy, XfrmState,
};

/// Routing table holding overlay routes.
pub const ROUTE_TABLE: u32 = 200;
/// Priority of the policy rule that looks up [`ROUTE_TABLE`].
pub const RULE_PRIORITY: u32 = 200;
/// Request ID of IPsec objects the agent owns. Others are never deleted.
pub const DEFAULT_REQID: i32 = 336;
/// Bytes of VXLAN encapsulation subtracted from the bind device MTU.
pub const VXLAN_OVERHEAD: u32 = 50;
pub use crate::nodeconfig::AUTO_SELECT_INTERFACE;
/// Comma-separated extra interfaces to treat like the overlay devices.
pub const RP_FILTER_DEVICES_ENV: &str = "AGENT_RP_FILTER_DEVICES";

const EXTRA_NICS: [&str; 2] = ["tunl0", "vxlan.calico"];
const FLANNEL_PREFIX: &str = "flannel";

/// One of the four VXLAN devices the agent manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDevice {
    pub name: &'static str,
    pub vni: u32,
    pub port: u16,
    pub family: IpFamily,
    /// Overlay range the device address is taken from.
    pub cidr: String,
}

/// The managed devices for the given overlay ranges.
pub fn catalog(cidrs: &ClusterCidrs) -> Vec<CatalogDevice> {
    vec![
        CatalogDevice {
            name: "vx-bridge",
            vni: 54,
            port: 4876,
            family: IpFamily::V4,
            cidr: cidrs.bridge_v4.clone(),
        },
        CatalogDevice {
            name: "vx-local",
            vni: 55,
            port: 4877,
            family: IpFamily::V4,
            cidr: cidrs.local_v4.clone(),
        },
        CatalogDevice {
            name: "vx-bridge-6",
            vni: 64,
            port: 4866,
            family: IpFamily::V6,
            cidr: cidrs.bridge_v6.clone(),
        },
        CatalogDevice {
            name: "vx-local-6",
            vni: 65,
            port: 4867,
            family: IpFamily::V6,
            cidr: cidrs.local_v6.clone(),
        },
    ]
}

/// `tunl0`, `vxlan.calico` and the entries of `env`.
pub fn extra_nics(env: Option<&str>) -> Vec<String> {
    EXTRA_NICS
        .iter()
        .map(|s| s.to_string())
        .chain(
            env.unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
        .collect()
}

/// The production kernel adapter.
///
/// One route and one xfrm netlink connection are shared by all
/// operations; each is locked for the duration of one item.
pub struct DefaultNetwork {
    route: Mutex<Connection>,
    xfrm: Mutex<Connection>,
    firewall: Firewall,
    sysctl: Sysctl,
    cidrs: RwLock<ClusterCidrs>,
    extra_nics: Vec<String>,
}

impl DefaultNetwork {
    /// Open the netlink connections and pick the iptables backend.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(cidrs: ClusterCidrs) -> Result<Self> {
        let route = Connection::new(Protocol::Route)?;
        let xfrm = Connection::new(Protocol::Xfrm)?;
        let firewall = Firewall::detect().await;
        let env = std::env::var(RP_FILTER_DEVICES_ENV).ok();

        Ok(Self {
            route: Mutex::new(route),
            xfrm: Mutex::new(xfrm),
            firewall,
            sysctl: Sysctl::new(),
            cidrs: RwLock::new(cidrs),
            extra_nics: extra_nics(env.as_deref()),
        })
    }

    /// The sysctl writer, for starting its watchdog.
    pub fn sysctl(&self) -> &Sysctl {
        &self.sysctl
    }

    pub(super) fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    pub(super) fn extra_nics(&self) -> &[String] {
        &self.extra_nics
    }

    pub(super) async fn route_conn(&self) -> MutexGuard<'_, Connection> {
        self.route.lock().await
    }

    pub(super) async fn xfrm_conn(&self) -> MutexGuard<'_, Connection> {
        self.xfrm.lock().await
    }

    pub async fn catalog(&self) -> Vec<CatalogDevice> {
        catalog(&*self.cidrs.read().await)
    }

    /// Forwarding accept and sysctl baseline for one interface.
    pub(super) async fn open_interface(&self, dev: &str, family: IpFamily) -> Result<()> {
        self.accept_forward(dev, family).await?;
        match family {
            IpFamily::V4 => self.sysctl.enable_loose_mode(dev).await,
            IpFamily::V6 => self.sysctl.enable_ipv6(dev).await,
        }
    }

    async fn loosen_flannel(&self) -> Result<()> {
        let links = self.route_conn().await.get_links().await?;
        for name in links
            .iter()
            .filter_map(|l| l.name())
            .filter(|n| n.starts_with(FLANNEL_PREFIX))
        {
            if let Err(e) = self.sysctl.enable_loose_mode(name).await {
                warn!(dev = name, error = %e, "cannot set flannel rp_filter");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Network for DefaultNetwork {
    async fn load(&self) -> Result<NodeConfigSpec> {
        let mut errors = LoadErrors::default();
        let spec = NodeConfigSpec {
            devices: errors.take(CategoryKind::Device, self.load_devices().await),
            routes: errors.take(CategoryKind::Route, self.load_routes().await),
            iptables: errors.take(CategoryKind::Iptables, self.load_iptables().await),
            fdbs: errors.take(CategoryKind::Fdb, self.load_fdbs().await),
            arps: errors.take(CategoryKind::Arp, self.load_arps().await),
            xfrm_policies: errors.take(CategoryKind::XfrmPolicy, self.load_xfrm_policies().await),
            xfrm_states: errors.take(CategoryKind::XfrmState, self.load_xfrm_states().await),
            ipsets: errors.take(CategoryKind::IpSet, self.load_ipsets().await),
        };
        errors.finish(spec)
    }

    async fn devices(&self, op: Op, items: &[Device]) -> Result<()> {
        match op {
            Op::Add => for_each_item(items, |d| self.add_device(d)).await,
            Op::Delete => for_each_item(items, |d| self.delete_device(d)).await,
        }
    }

    async fn routes(&self, op: Op, items: &[Route]) -> Result<()> {
        match op {
            Op::Add => for_each_item(items, |r| self.add_route(r)).await,
            Op::Delete => for_each_item(items, |r| self.delete_route(r)).await,
        }
    }

    async fn iptables(&self, op: Op, items: &[Iptables]) -> Result<()> {
        match op {
            Op::Add => for_each_item(items, |r| self.add_iptables(r)).await,
            Op::Delete => for_each_item(items, |r| self.delete_iptables(r)).await,
        }
    }

    async fn fdbs(&self, op: Op, items: &[Fdb]) -> Result<()> {
        match op {
            Op::Add => for_each_item(items, |f| self.add_fdb(f)).await,
            Op::Delete => for_each_item(items, |f| self.delete_fdb(f)).await,
        }
    }

    async fn arps(&self, op: Op, items: &[Arp]) -> Result<()> {
        match op {
            Op::Add => for_each_item(items, |a| self.add_arp(a)).await,
            Op::Delete => for_each_item(items, |a| self.delete_arp(a)).await,
        }
    }

    async fn xfrm_policies(&self, op: Op, items: &[XfrmPolicy]) -> Result<()> {
        match op {
            Op::Add => for_each_item(items, |p| self.add_xfrm_policy(p)).await,
            Op::Delete => for_each_item(items, |p| self.delete_xfrm_policy(p)).await,
        }
    }

    async fn xfrm_states(&self, op: Op, items: &[XfrmState]) -> Result<()> {
        match op {
            Op::Add => for_each_item(items, |s| self.add_xfrm_state(s)).await,
            Op::Delete => for_each_item(items, |s| self.delete_xfrm_state(s)).await,
        }
    }

    async fn ipsets(&self, op: Op, items: &[IpSet]) -> Result<()> {
        match op {
            Op::Delete => for_each_item(items, |s| self.delete_ipset(s)).await,
            Op::Add => {
                let mut errors = match for_each_item(items, |s| self.add_ipset(s)).await {
                    Ok(()) => Vec::new(),
                    Err(NetworkError::Batch(errors)) => errors,
                    Err(e) => return Err(e),
                };
                if !items.is_empty() {
                    if let Err(error) = self.ensure_avoid_masq_rule().await {
                        errors.push(ItemError {
                            item: format!("nat POSTROUTING {}", AVOID_MASQ_RULE.join(" ")),
                            error,
                        });
                    }
                }
                batch(errors)
            }
        }
    }

    async fn update_cidr_config(&self, cidrs: &ClusterCidrs) {
        info!(
            bridge_v4 = %cidrs.bridge_v4,
            bridge_v6 = %cidrs.bridge_v6,
            local_v4 = %cidrs.local_v4,
            local_v6 = %cidrs.local_v6,
            "update cidr"
        );
        *self.cidrs.write().await = cidrs.clone();
    }

    async fn init_sys(&self) {
        if let Err(e) = self.init_chains().await {
            warn!(error = %e, "cannot create agent iptables chains");
        }
        if let Err(e) = self.loosen_flannel().await {
            warn!(error = %e, "cannot set rp_filter on flannel devices");
        }
    }
}
