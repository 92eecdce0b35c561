//! Set difference between two node configurations.

use serde::Serialize;

use crate::nodeconfig::{
    Arp, Category, Device, Fdb, IpSet, Iptables, NodeConfigSpec, Route, XfrmPolicy, XfrmState,
};

/// What must be removed from and added to a live configuration to reach a
/// desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDiff {
    pub delete_config: NodeConfigSpec,
    pub create_config: NodeConfigSpec,
}

impl ConfigDiff {
    /// True if there is nothing to delete or create.
    pub fn is_empty(&self) -> bool {
        self.delete_config.is_empty() && self.create_config.is_empty()
    }
}

/// Compare `old` (live) against `new` (desired).
///
/// Elements are matched structurally, per category, in O(n·m). Returns
/// whether both sides hold the same elements, and the delta. Broadcast
/// FDB/ARP entries never enter `delete_config`, but their presence on only
/// one side still makes the result differ.
pub fn diff(old: &NodeConfigSpec, new: &NodeConfigSpec) -> (bool, ConfigDiff) {
    let mut out = ConfigDiff::default();
    let same = [
        diff_category::<Device>(old, new, &mut out),
        diff_category::<Route>(old, new, &mut out),
        diff_category::<Iptables>(old, new, &mut out),
        diff_category::<Fdb>(old, new, &mut out),
        diff_category::<Arp>(old, new, &mut out),
        diff_category::<XfrmPolicy>(old, new, &mut out),
        diff_category::<XfrmState>(old, new, &mut out),
        diff_category::<IpSet>(old, new, &mut out),
    ];
    (same.iter().all(|&s| s), out)
}

fn diff_category<T: Category>(
    old: &NodeConfigSpec,
    new: &NodeConfigSpec,
    out: &mut ConfigDiff,
) -> bool {
    let (old_items, new_items) = (T::items(old), T::items(new));
    if old_items.is_empty() && new_items.is_empty() {
        return true;
    }

    let deletes: Vec<T> = old_items
        .iter()
        .filter(|o| !new_items.iter().any(|n| o.equal(n)))
        .cloned()
        .collect();
    let creates: Vec<T> = new_items
        .iter()
        .filter(|n| !old_items.iter().any(|o| o.equal(n)))
        .cloned()
        .collect();

    let same = deletes.is_empty() && creates.is_empty();

    T::items_mut(&mut out.delete_config).extend(deletes.into_iter().filter(|d| !d.keep_on_delete()));
    T::items_mut(&mut out.create_config).extend(creates);

    same
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(cidr: &str) -> Route {
        Route {
            cidr: cidr.into(),
            gw: "220.0.0.7".into(),
            dev: "vx-bridge".into(),
        }
    }

    fn fdb(mac: &str) -> Fdb {
        Fdb {
            ip: "192.168.0.7".into(),
            mac: mac.into(),
            dev: "vx-bridge".into(),
        }
    }

    fn sample() -> NodeConfigSpec {
        NodeConfigSpec {
            routes: vec![route("10.233.0.0/16"), route("10.234.0.0/16")],
            fdbs: vec![fdb("0a:00:00:00:00:07")],
            iptables: vec![Iptables {
                table: "nat".into(),
                chain: "POSTROUTING".into(),
                rule: "-s 10.233.0.0/16 -j MASQUERADE".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_is_same() {
        let a = sample();
        let (same, d) = diff(&a, &a);
        assert!(same);
        assert!(d.is_empty());
    }

    #[test]
    fn test_both_empty() {
        let (same, d) = diff(&NodeConfigSpec::default(), &NodeConfigSpec::default());
        assert!(same);
        assert!(d.is_empty());
    }

    #[test]
    fn test_symmetry() {
        let a = sample();
        let mut b = sample();
        b.routes.remove(0);
        b.routes.push(route("10.235.0.0/16"));

        let (same_ab, ab) = diff(&a, &b);
        let (same_ba, ba) = diff(&b, &a);
        assert!(!same_ab && !same_ba);
        assert_eq!(ab.delete_config, ba.create_config);
        assert_eq!(ab.create_config, ba.delete_config);
        assert_eq!(ab.delete_config.routes, vec![route("10.233.0.0/16")]);
        assert_eq!(ab.create_config.routes, vec![route("10.235.0.0/16")]);
    }

    #[test]
    fn test_order_insensitive() {
        let a = sample();
        let mut b = sample();
        b.routes.reverse();
        assert!(diff(&a, &b).0);
    }

    #[test]
    fn test_applying_diff_converges() {
        let live = sample();
        let mut desired = sample();
        desired.routes = vec![route("10.240.0.0/16")];
        desired.fdbs.clear();

        let (_, d) = diff(&live, &desired);
        let mut applied = live.clone();
        applied.routes.retain(|r| !d.delete_config.routes.contains(r));
        applied.fdbs.retain(|f| !d.delete_config.fdbs.contains(f));
        applied.routes.extend(d.create_config.routes.iter().cloned());

        let (same, rest) = diff(&applied, &desired);
        assert!(same);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_broadcast_never_deleted() {
        let mut live = sample();
        live.fdbs.push(fdb("ff:ff:ff:ff:ff:ff"));
        live.arps.push(Arp {
            ip: "220.0.0.7".into(),
            mac: "ff:ff:ff:ff:ff:ff".into(),
            dev: "vx-bridge".into(),
        });
        let desired = sample();

        let (same, d) = diff(&live, &desired);
        assert!(!same);
        assert!(d.delete_config.fdbs.is_empty());
        assert!(d.delete_config.arps.is_empty());
        assert!(d.create_config.is_empty());
    }

    #[test]
    fn test_broadcast_still_created() {
        let live = sample();
        let mut desired = sample();
        desired.fdbs.push(fdb("ff:ff:ff:ff:ff:ff"));
        let (_, d) = diff(&live, &desired);
        assert_eq!(d.create_config.fdbs, vec![fdb("ff:ff:ff:ff:ff:ff")]);
    }

    #[test]
    fn test_categories_independent() {
        let live = sample();
        let mut desired = sample();
        desired.iptables[0].rule = "-s 10.233.0.0/16 -j RETURN".into();

        let (_, d) = diff(&live, &desired);
        assert_eq!(d.delete_config.iptables.len(), 1);
        assert_eq!(d.create_config.iptables.len(), 1);
        assert!(d.delete_config.routes.is_empty());
        assert!(d.create_config.fdbs.is_empty());
    }

    #[test]
    fn test_auto_bind_dev_matches_resolved() {
        let device = |bind_dev: &str| Device {
            kind: "vxlan".into(),
            name: "vx-bridge".into(),
            addr: "220.0.0.5/8".into(),
            mac: "0a:00:00:00:00:05".into(),
            bind_dev: bind_dev.into(),
            id: 54,
            port: 4876,
        };
        let live = NodeConfigSpec {
            devices: vec![device("eth0")],
            ..Default::default()
        };
        let desired = NodeConfigSpec {
            devices: vec![device("*")],
            ..Default::default()
        };
        let (same, d) = diff(&live, &desired);
        assert!(same);
        assert!(d.is_empty());
    }

    #[test]
    fn test_mac_case_after_normalize() {
        let live = sample();
        let mut desired = sample();
        desired.fdbs = vec![fdb("0A:00:00:00:00:07")];
        assert!(!diff(&live, &desired).0);
        assert!(diff(&live.normalized(), &desired.normalized()).0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let (_, d) = diff(&NodeConfigSpec::default(), &sample());
        let json = serde_json::to_value(&d).unwrap();
        assert!(json["createConfig"]["routes"].is_array());
        assert!(json["deleteConfig"].as_object().unwrap().is_empty());
    }
}
