//! Desired and observed per-node network configuration.
//!
//! A [`NodeConfigSpec`] holds one unordered collection per resource
//! category. Field names on the wire match the control-plane object, so a
//! spec can be read straight from its YAML or JSON form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::addr::normalize_cidr;

/// A VXLAN tunnel endpoint device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    /// Device type; always `vxlan` for the overlay devices.
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// Interface address in CIDR form, host bits kept (`220.0.0.5/8`).
    pub addr: String,
    pub mac: String,
    /// Underlay device; `*` selects the default-route interface.
    #[serde(rename = "bindDev")]
    pub bind_dev: String,
    /// VXLAN network identifier.
    pub id: i32,
    /// VXLAN UDP port.
    pub port: i32,
}

/// A route in the overlay routing table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    pub cidr: String,
    pub gw: String,
    pub dev: String,
}

/// A firewall rule in one of the agent-owned chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Iptables {
    pub table: String,
    pub chain: String,
    pub rule: String,
}

/// A bridge forwarding entry on a VXLAN device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fdb {
    pub ip: String,
    pub mac: String,
    pub dev: String,
}

/// A static ARP/NDP entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Arp {
    pub ip: String,
    pub mac: String,
    pub dev: String,
}

/// An IPsec tunnel policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XfrmPolicy {
    #[serde(rename = "leftip")]
    pub left_ip: String,
    #[serde(rename = "leftnet")]
    pub left_net: String,
    #[serde(rename = "rightip")]
    pub right_ip: String,
    #[serde(rename = "rightnet")]
    pub right_net: String,
    pub reqid: i32,
    /// 0 in, 1 out, 2 fwd.
    pub dir: i32,
}

/// An IPsec security association.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XfrmState {
    #[serde(rename = "leftip")]
    pub left_ip: String,
    #[serde(rename = "rightip")]
    pub right_ip: String,
    pub reqid: i32,
    pub spi: u32,
    /// Hex-encoded AEAD key.
    #[serde(rename = "PSK")]
    pub psk: String,
}

/// A CIDR exempted from masquerading through the agent's IP set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpSet {
    pub cidr: String,
    pub name: String,
}

/// Full per-node configuration, one collection per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfigSpec {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<Device>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub iptables: Vec<Iptables>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fdbs: Vec<Fdb>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arps: Vec<Arp>,
    #[serde(rename = "xfrmpolicies", skip_serializing_if = "Vec::is_empty")]
    pub xfrm_policies: Vec<XfrmPolicy>,
    #[serde(rename = "xfrmstates", skip_serializing_if = "Vec::is_empty")]
    pub xfrm_states: Vec<XfrmState>,
    #[serde(rename = "ipsetsavoidmasq", skip_serializing_if = "Vec::is_empty")]
    pub ipsets: Vec<IpSet>,
}

impl NodeConfigSpec {
    /// True if every category is empty.
    pub fn is_empty(&self) -> bool {
        CategoryKind::ALL.iter().all(|k| k.len(self) == 0)
    }

    /// Copy with CIDR-valued fields in canonical network form and MACs in
    /// lowercase.
    ///
    /// Route CIDRs, policy subnets and IP set CIDRs are normalized so that
    /// values written by hand compare equal to what the kernel reports.
    /// Device addresses keep their host part. Unparseable values are left
    /// untouched; the adapter rejects them when applied.
    pub fn normalized(&self) -> NodeConfigSpec {
        let norm = |s: &str| normalize_cidr(s).unwrap_or_else(|_| s.to_string());
        let mut out = self.clone();
        for r in &mut out.routes {
            r.cidr = norm(&r.cidr);
        }
        for p in &mut out.xfrm_policies {
            p.left_net = norm(&p.left_net);
            p.right_net = norm(&p.right_net);
        }
        for s in &mut out.ipsets {
            s.cidr = norm(&s.cidr);
        }
        for d in &mut out.devices {
            d.mac.make_ascii_lowercase();
        }
        for f in &mut out.fdbs {
            f.mac.make_ascii_lowercase();
        }
        for a in &mut out.arps {
            a.mac.make_ascii_lowercase();
        }
        out
    }
}

/// Object metadata of the node-config envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
}

/// A named node configuration as stored by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub metadata: ObjectMeta,
    pub spec: NodeConfigSpec,
}

/// Overlay address ranges the VXLAN devices are numbered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterCidrs {
    pub bridge_v4: String,
    pub bridge_v6: String,
    pub local_v4: String,
    pub local_v6: String,
}

impl Default for ClusterCidrs {
    fn default() -> Self {
        Self {
            bridge_v4: "220.0.0.0/8".into(),
            bridge_v6: "9480::0/16".into(),
            local_v4: "210.0.0.0/8".into(),
            local_v6: "9470::0/16".into(),
        }
    }
}

/// The eight resource categories, in apply order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CategoryKind {
    Device,
    Route,
    Iptables,
    Fdb,
    Arp,
    XfrmPolicy,
    XfrmState,
    IpSet,
}

impl CategoryKind {
    pub const ALL: [CategoryKind; 8] = [
        CategoryKind::Device,
        CategoryKind::Route,
        CategoryKind::Iptables,
        CategoryKind::Fdb,
        CategoryKind::Arp,
        CategoryKind::XfrmPolicy,
        CategoryKind::XfrmState,
        CategoryKind::IpSet,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CategoryKind::Device => "device",
            CategoryKind::Route => "route",
            CategoryKind::Iptables => "iptables",
            CategoryKind::Fdb => "fdb",
            CategoryKind::Arp => "arp",
            CategoryKind::XfrmPolicy => "xfrm policy",
            CategoryKind::XfrmState => "xfrm state",
            CategoryKind::IpSet => "ipset",
        }
    }

    /// Number of elements of this category in `spec`.
    pub fn len(self, spec: &NodeConfigSpec) -> usize {
        match self {
            CategoryKind::Device => spec.devices.len(),
            CategoryKind::Route => spec.routes.len(),
            CategoryKind::Iptables => spec.iptables.len(),
            CategoryKind::Fdb => spec.fdbs.len(),
            CategoryKind::Arp => spec.arps.len(),
            CategoryKind::XfrmPolicy => spec.xfrm_policies.len(),
            CategoryKind::XfrmState => spec.xfrm_states.len(),
            CategoryKind::IpSet => spec.ipsets.len(),
        }
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Broadcast MAC used by flood entries that must never be removed.
pub const BROADCAST_MAC: &str = "ff:ff:ff:ff:ff:ff";

/// `bindDev` value selecting the default-route interface.
pub const AUTO_SELECT_INTERFACE: &str = "*";

/// An element type of one resource category.
///
/// Implemented once per element type; the diff and the adapter dispatch
/// through [`CategoryKind`] without reflection.
pub trait Category: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    const KIND: CategoryKind;

    /// Human-readable identity used in error messages.
    fn key(&self) -> String;

    /// Structural equality.
    fn equal(&self, other: &Self) -> bool {
        self == other
    }

    /// Entries the agent must leave in place even when undesired.
    fn keep_on_delete(&self) -> bool {
        false
    }

    fn items(spec: &NodeConfigSpec) -> &[Self];

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self>;
}

impl Category for Device {
    const KIND: CategoryKind = CategoryKind::Device;

    fn key(&self) -> String {
        format!("{} {}", self.name, self.addr)
    }

    /// A `*` bind device on either side matches whatever interface it
    /// resolved to.
    fn equal(&self, other: &Self) -> bool {
        let bind_dev = self.bind_dev == other.bind_dev
            || self.bind_dev == AUTO_SELECT_INTERFACE
            || other.bind_dev == AUTO_SELECT_INTERFACE;
        bind_dev
            && self.kind == other.kind
            && self.name == other.name
            && self.addr == other.addr
            && self.mac == other.mac
            && self.id == other.id
            && self.port == other.port
    }

    fn items(spec: &NodeConfigSpec) -> &[Self] {
        &spec.devices
    }

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self> {
        &mut spec.devices
    }
}

impl Category for Route {
    const KIND: CategoryKind = CategoryKind::Route;

    fn key(&self) -> String {
        format!("{} via {} dev {}", self.cidr, self.gw, self.dev)
    }

    fn items(spec: &NodeConfigSpec) -> &[Self] {
        &spec.routes
    }

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self> {
        &mut spec.routes
    }
}

impl Category for Iptables {
    const KIND: CategoryKind = CategoryKind::Iptables;

    fn key(&self) -> String {
        format!("-t {} {} {}", self.table, self.chain, self.rule)
    }

    fn items(spec: &NodeConfigSpec) -> &[Self] {
        &spec.iptables
    }

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self> {
        &mut spec.iptables
    }
}

impl Category for Fdb {
    const KIND: CategoryKind = CategoryKind::Fdb;

    fn key(&self) -> String {
        format!("{} dst {} dev {}", self.mac, self.ip, self.dev)
    }

    fn keep_on_delete(&self) -> bool {
        self.mac.eq_ignore_ascii_case(BROADCAST_MAC)
    }

    fn items(spec: &NodeConfigSpec) -> &[Self] {
        &spec.fdbs
    }

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self> {
        &mut spec.fdbs
    }
}

impl Category for Arp {
    const KIND: CategoryKind = CategoryKind::Arp;

    fn key(&self) -> String {
        format!("{} lladdr {} dev {}", self.ip, self.mac, self.dev)
    }

    fn keep_on_delete(&self) -> bool {
        self.mac.eq_ignore_ascii_case(BROADCAST_MAC)
    }

    fn items(spec: &NodeConfigSpec) -> &[Self] {
        &spec.arps
    }

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self> {
        &mut spec.arps
    }
}

impl Category for XfrmPolicy {
    const KIND: CategoryKind = CategoryKind::XfrmPolicy;

    fn key(&self) -> String {
        format!(
            "src {} dst {} dir {} tmpl {} -> {} reqid {}",
            self.left_net, self.right_net, self.dir, self.left_ip, self.right_ip, self.reqid
        )
    }

    fn items(spec: &NodeConfigSpec) -> &[Self] {
        &spec.xfrm_policies
    }

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self> {
        &mut spec.xfrm_policies
    }
}

impl Category for XfrmState {
    const KIND: CategoryKind = CategoryKind::XfrmState;

    // No PSK: keys end up in logs and status reasons.
    fn key(&self) -> String {
        format!(
            "src {} dst {} spi {:#x} reqid {}",
            self.left_ip, self.right_ip, self.spi, self.reqid
        )
    }

    fn items(spec: &NodeConfigSpec) -> &[Self] {
        &spec.xfrm_states
    }

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self> {
        &mut spec.xfrm_states
    }
}

impl Category for IpSet {
    const KIND: CategoryKind = CategoryKind::IpSet;

    fn key(&self) -> String {
        format!("{} in {}", self.cidr, self.name)
    }

    fn items(spec: &NodeConfigSpec) -> &[Self] {
        &spec.ipsets
    }

    fn items_mut(spec: &mut NodeConfigSpec) -> &mut Vec<Self> {
        &mut spec.ipsets
    }
}
