//! FDB and ARP entries on the overlay devices.

use std::collections::HashMap;

use tracing::info;

use super::default::DefaultNetwork;
use super::route::catalog_indexes;
use super::{IpFamily, Result, exists_ok, missing_ok};
use crate::netlink::NeighborEntry;
use crate::netlink::messages::NeighborMessage;
use crate::netlink::types::neigh::{AF_BRIDGE, nud};
use crate::nodeconfig::{Arp, Fdb};
use crate::util::addr::{format_mac, parse_addr, parse_mac};

/// Bridge entries on catalog devices that point at a remote VTEP.
fn fdbs_from(neighbors: &[NeighborMessage], devices: &HashMap<u32, &str>) -> Vec<Fdb> {
    neighbors
        .iter()
        .filter(|n| n.family() == AF_BRIDGE)
        .filter_map(|n| {
            let dev = devices.get(&n.ifindex())?;
            Some(Fdb {
                ip: n.destination()?.to_string(),
                mac: format_mac(n.lladdr()?),
                dev: dev.to_string(),
            })
        })
        .collect()
}

/// Static (exactly `PERMANENT`) entries on catalog devices.
fn arps_from(neighbors: &[NeighborMessage], devices: &HashMap<u32, &str>) -> Vec<Arp> {
    neighbors
        .iter()
        .filter(|n| n.state() == nud::PERMANENT)
        .filter_map(|n| {
            let dev = devices.get(&n.ifindex())?;
            Some(Arp {
                ip: n.destination()?.to_string(),
                mac: format_mac(n.lladdr()?),
                dev: dev.to_string(),
            })
        })
        .collect()
}

impl DefaultNetwork {
    pub(super) async fn add_fdb(&self, fdb: &Fdb) -> Result<()> {
        let mac = parse_mac(&fdb.mac)?;
        let dst = parse_addr(&fdb.ip)?;
        let conn = self.route_conn().await;
        let ifindex = conn.require_link(&fdb.dev).await?.ifindex();
        info!(mac = %fdb.mac, dst = %dst, dev = %fdb.dev, "adding fdb");
        exists_ok(conn.add_neighbor(&NeighborEntry::fdb(ifindex, mac, dst)).await)
    }

    pub(super) async fn delete_fdb(&self, fdb: &Fdb) -> Result<()> {
        let mac = parse_mac(&fdb.mac)?;
        let dst = parse_addr(&fdb.ip)?;
        let conn = self.route_conn().await;
        let Some(link) = conn.get_link_by_name(&fdb.dev).await? else {
            return Ok(());
        };
        info!(mac = %fdb.mac, dst = %dst, dev = %fdb.dev, "deleting fdb");
        missing_ok(conn.del_neighbor(&NeighborEntry::fdb(link.ifindex(), mac, dst)).await)
    }

    pub(super) async fn add_arp(&self, arp: &Arp) -> Result<()> {
        let mac = parse_mac(&arp.mac)?;
        let ip = parse_addr(&arp.ip)?;
        let conn = self.route_conn().await;
        let ifindex = conn.require_link(&arp.dev).await?.ifindex();
        info!(ip = %ip, mac = %arp.mac, dev = %arp.dev, "adding arp");
        exists_ok(conn.add_neighbor(&NeighborEntry::arp(ifindex, ip, mac)).await)
    }

    pub(super) async fn delete_arp(&self, arp: &Arp) -> Result<()> {
        let mac = parse_mac(&arp.mac)?;
        let ip = parse_addr(&arp.ip)?;
        let conn = self.route_conn().await;
        let Some(link) = conn.get_link_by_name(&arp.dev).await? else {
            return Ok(());
        };
        info!(ip = %ip, mac = %arp.mac, dev = %arp.dev, "deleting arp");
        missing_ok(conn.del_neighbor(&NeighborEntry::arp(link.ifindex(), ip, mac)).await)
    }

    pub(super) async fn load_fdbs(&self) -> Result<Vec<Fdb>> {
        let names: Vec<&str> = self.catalog().await.iter().map(|d| d.name).collect();
        let conn = self.route_conn().await;
        let links = conn.get_links().await?;
        let neighbors = conn.get_neighbors(AF_BRIDGE).await?;
        Ok(fdbs_from(&neighbors, &catalog_indexes(&links, &names)))
    }

    pub(super) async fn load_arps(&self) -> Result<Vec<Arp>> {
        let names: Vec<&str> = self.catalog().await.iter().map(|d| d.name).collect();
        let conn = self.route_conn().await;
        let links = conn.get_links().await?;
        let mut neighbors = conn.get_neighbors(IpFamily::V4.af()).await?;
        neighbors.extend(conn.get_neighbors(IpFamily::V6.af()).await?);
        Ok(arps_from(&neighbors, &catalog_indexes(&links, &names)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::types::neigh::NdMsg;

    fn neighbor(family: u8, ifindex: i32, state: u16, dst: Option<&str>, mac: &[u8]) -> NeighborMessage {
        NeighborMessage {
            header: NdMsg::new()
                .with_family(family)
                .with_ifindex(ifindex)
                .with_state(state),
            destination: dst.map(|d| d.parse().unwrap()),
            lladdr: Some(mac.to_vec()),
        }
    }

    #[test]
    fn test_fdbs_need_destination_and_catalog_device() {
        let devices: HashMap<u32, &str> = [(7, "vx-bridge")].into();
        let mac = [0x0a, 0, 0, 0, 0, 7];
        let neighbors = vec![
            neighbor(AF_BRIDGE, 7, nud::PERMANENT, Some("192.168.0.7"), &mac),
            neighbor(AF_BRIDGE, 7, nud::PERMANENT, None, &mac),
            neighbor(AF_BRIDGE, 3, nud::PERMANENT, Some("192.168.0.8"), &mac),
        ];
        assert_eq!(
            fdbs_from(&neighbors, &devices),
            vec![Fdb {
                ip: "192.168.0.7".into(),
                mac: "0a:00:00:00:00:07".into(),
                dev: "vx-bridge".into(),
            }]
        );
    }

    #[test]
    fn test_arps_only_permanent() {
        let devices: HashMap<u32, &str> = [(7, "vx-bridge")].into();
        let mac = [0xff; 6];
        let neighbors = vec![
            neighbor(libc::AF_INET as u8, 7, nud::PERMANENT, Some("220.0.0.7"), &mac),
            neighbor(libc::AF_INET as u8, 7, 0x02, Some("220.0.0.8"), &mac),
            neighbor(libc::AF_INET as u8, 7, nud::PERMANENT | nud::NOARP, Some("220.0.0.9"), &mac),
        ];
        let arps = arps_from(&neighbors, &devices);
        assert_eq!(arps.len(), 1);
        assert_eq!(arps[0].ip, "220.0.0.7");
        assert_eq!(arps[0].mac, "ff:ff:ff:ff:ff:ff");
    }
}
