//! VXLAN device lifecycle.

use std::net::IpAddr;

use tracing::{debug, info, warn};

use super::default::{AUTO_SELECT_INTERFACE, DefaultNetwork, RULE_PRIORITY, ROUTE_TABLE, VXLAN_OVERHEAD};
use super::{IpFamily, NetworkError, Result, exists_ok, missing_ok};
use crate::netlink::messages::{AddressMessage, LinkMessage};
use crate::netlink::types::addr::RT_SCOPE_UNIVERSE;
use crate::netlink::{self, Connection, TableRule, VxlanLink};
use crate::nodeconfig::Device;
use crate::util::addr::{IpNet, format_mac, parse_cidr, parse_mac};

/// MTU assumed when the kernel does not report one.
const DEFAULT_MTU: u32 = 1500;

/// The underlay interface a VXLAN device is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BindDevice {
    name: String,
    index: u32,
    mtu: u32,
    ip4: Option<IpAddr>,
    ip6: Option<IpAddr>,
}

impl BindDevice {
    fn source(&self, family: IpFamily) -> Option<IpAddr> {
        match family {
            IpFamily::V4 => self.ip4,
            IpFamily::V6 => self.ip6,
        }
    }
}

/// First universe-scope address of `family` on `ifindex`.
fn first_universe(addrs: &[AddressMessage], ifindex: u32, family: IpFamily) -> Option<IpNet> {
    addrs
        .iter()
        .filter(|a| a.ifindex() == ifindex && a.family() == family.af())
        .filter(|a| a.scope() == RT_SCOPE_UNIVERSE)
        .find_map(|a| a.ip().map(|addr| IpNet { addr, prefix_len: a.prefix_len() }))
}

/// Device address to report: the first one inside `overlay`, else the
/// first universe-scope one.
fn device_address(
    addrs: &[AddressMessage],
    ifindex: u32,
    family: IpFamily,
    overlay: &str,
) -> Option<IpNet> {
    let overlay = parse_cidr(overlay).ok();
    addrs
        .iter()
        .filter(|a| a.ifindex() == ifindex && a.family() == family.af())
        .filter(|a| a.scope() == RT_SCOPE_UNIVERSE)
        .filter_map(|a| a.ip().map(|addr| IpNet { addr, prefix_len: a.prefix_len() }))
        .find(|net| overlay.is_some_and(|o| o.network().contains(&net.addr)))
        .or_else(|| first_universe(addrs, ifindex, family))
}

async fn default_route_link(conn: &Connection, family: IpFamily) -> Result<LinkMessage> {
    let oif = conn
        .get_routes()
        .await?
        .into_iter()
        .filter(|r| r.family() == family.af() && r.is_default())
        .filter(|r| r.table_id() == crate::netlink::types::route::RT_TABLE_MAIN as u32)
        .find_map(|r| r.oif())
        .ok_or_else(|| NetworkError::Invalid(format!("no {} default route", family)))?;
    conn.get_link_by_index(oif).await?.ok_or_else(|| {
        NetworkError::Netlink(netlink::Error::InterfaceNotFound {
            name: format!("ifindex {}", oif),
        })
    })
}

async fn resolve_bind(conn: &Connection, name: &str, family: IpFamily) -> Result<BindDevice> {
    let link = if name == AUTO_SELECT_INTERFACE {
        let link = default_route_link(conn, family).await?;
        debug!(dev = ?link.name(), "auto-selected bind device");
        link
    } else {
        conn.require_link(name).await?
    };
    let addrs = conn.get_addresses_for(link.ifindex()).await?;
    Ok(BindDevice {
        name: link.name().unwrap_or(name).to_string(),
        index: link.ifindex(),
        mtu: link.mtu().unwrap_or(DEFAULT_MTU),
        ip4: first_universe(&addrs, link.ifindex(), IpFamily::V4).map(|n| n.addr),
        ip6: first_universe(&addrs, link.ifindex(), IpFamily::V6).map(|n| n.addr),
    })
}

fn vxlan_link(device: &Device, bind: &BindDevice, source: IpAddr, mac: [u8; 6]) -> Result<VxlanLink> {
    let vni = u32::try_from(device.id)
        .map_err(|_| NetworkError::Invalid(format!("invalid vxlan id {}", device.id)))?;
    let port = u16::try_from(device.port)
        .map_err(|_| NetworkError::Invalid(format!("invalid vxlan port {}", device.port)))?;
    Ok(VxlanLink::new(&device.name, vni)
        .port(port)
        .local(source)
        .link(bind.index)
        .mtu(bind.mtu.saturating_sub(VXLAN_OVERHEAD))
        .address(mac)
        .learning(false)
        .up())
}

impl DefaultNetwork {
    pub(super) async fn add_device(&self, device: &Device) -> Result<()> {
        let addr = parse_cidr(&device.addr)?;
        let mac = parse_mac(&device.mac)?;
        let family = IpFamily::of(&addr.addr);

        let bind = {
            let conn = self.route_conn().await;
            let bind = resolve_bind(&conn, &device.bind_dev, family).await?;
            let source = bind.source(family).ok_or_else(|| {
                NetworkError::Invalid(format!("bind device {} has no {} address", bind.name, family))
            })?;

            match conn.add_link(&vxlan_link(device, &bind, source, mac)?).await {
                Ok(()) => info!(dev = %device.name, local = %source, bind = %bind.name, "vxlan created"),
                Err(e) if e.is_already_exists() => debug!(dev = %device.name, "vxlan exists"),
                Err(e) => return Err(e.into()),
            }

            let rule = match family {
                IpFamily::V4 => TableRule::v4(RULE_PRIORITY, ROUTE_TABLE),
                IpFamily::V6 => TableRule::v6(RULE_PRIORITY, ROUTE_TABLE),
            };
            exists_ok(conn.add_rule(&rule).await)?;

            let link = conn.require_link(&device.name).await?;
            exists_ok(conn.add_address(link.ifindex(), addr.addr, addr.prefix_len).await)?;
            bind
        };

        self.open_interface(&bind.name, family).await?;
        self.open_interface(&device.name, family).await?;

        if family == IpFamily::V4 {
            for nic in self.extra_nics() {
                if let Err(e) = self.open_interface(nic, IpFamily::V4).await {
                    warn!(dev = %nic, error = %e, "cannot relax forwarding for extra device");
                }
            }
        }
        Ok(())
    }

    pub(super) async fn delete_device(&self, device: &Device) -> Result<()> {
        info!(dev = %device.name, "deleting vxlan");
        missing_ok(self.route_conn().await.del_link(&device.name).await)
    }

    /// Catalog devices present on the host.
    pub(super) async fn load_devices(&self) -> Result<Vec<Device>> {
        let catalog = self.catalog().await;
        let conn = self.route_conn().await;
        let links = conn.get_links().await?;
        let addrs = conn.get_addresses().await?;

        let mut out = Vec::new();
        for entry in &catalog {
            let Some(link) = links.iter().find(|l| l.name() == Some(entry.name)) else {
                continue;
            };
            let Some(vxlan) = link.vxlan().filter(|_| link.kind() == Some("vxlan")) else {
                return Err(NetworkError::Invalid(format!(
                    "device name: {} is not vxlan",
                    entry.name
                )));
            };

            let addr = device_address(&addrs, link.ifindex(), entry.family, &entry.cidr);
            if addr.is_none() {
                warn!(dev = entry.name, "cannot get ip of device");
            }
            let bind_dev = link
                .lower_index()
                .and_then(|idx| links.iter().find(|l| l.ifindex() == idx))
                .and_then(|l| l.name())
                .unwrap_or_default();

            out.push(Device {
                kind: "vxlan".to_string(),
                name: entry.name.to_string(),
                addr: addr.map(|a| a.to_string()).unwrap_or_default(),
                mac: link.address().map(format_mac).unwrap_or_default(),
                bind_dev: bind_dev.to_string(),
                id: vxlan.vni.map_or(0, |v| v as i32),
                port: vxlan.port.map_or(0, i32::from),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::types::addr::IfAddrMsg;

    fn addr(ifindex: u32, ip: &str, prefix_len: u8, scope: u8) -> AddressMessage {
        let ip: IpAddr = ip.parse().unwrap();
        AddressMessage {
            header: IfAddrMsg::new()
                .with_family(IpFamily::of(&ip).af())
                .with_prefixlen(prefix_len)
                .with_index(ifindex)
                .with_scope(scope),
            address: Some(ip),
            local: Some(ip),
        }
    }

    #[test]
    fn test_first_universe_skips_link_scope() {
        let addrs = vec![
            addr(2, "fe80::1", 64, 253),
            addr(2, "2001:db8::5", 64, RT_SCOPE_UNIVERSE),
            addr(2, "192.168.0.5", 24, RT_SCOPE_UNIVERSE),
            addr(3, "10.0.0.1", 8, RT_SCOPE_UNIVERSE),
        ];
        assert_eq!(
            first_universe(&addrs, 2, IpFamily::V6).map(|n| n.to_string()),
            Some("2001:db8::5/64".to_string())
        );
        assert_eq!(
            first_universe(&addrs, 2, IpFamily::V4).map(|n| n.to_string()),
            Some("192.168.0.5/24".to_string())
        );
        assert!(first_universe(&addrs, 4, IpFamily::V4).is_none());
    }

    #[test]
    fn test_device_address_prefers_overlay() {
        let addrs = vec![
            addr(7, "10.1.0.1", 24, RT_SCOPE_UNIVERSE),
            addr(7, "220.0.0.5", 8, RT_SCOPE_UNIVERSE),
        ];
        assert_eq!(
            device_address(&addrs, 7, IpFamily::V4, "220.0.0.0/8").map(|n| n.to_string()),
            Some("220.0.0.5/8".to_string())
        );
        assert_eq!(
            device_address(&addrs, 7, IpFamily::V4, "230.0.0.0/8").map(|n| n.to_string()),
            Some("10.1.0.1/24".to_string())
        );
    }

    #[test]
    fn test_vxlan_link_mtu_and_ranges() {
        let bind = BindDevice {
            name: "eth0".into(),
            index: 2,
            mtu: 1500,
            ip4: Some("192.168.0.5".parse().unwrap()),
            ip6: None,
        };
        let device = Device {
            kind: "vxlan".into(),
            name: "vx-bridge".into(),
            addr: "220.0.0.5/8".into(),
            mac: "0a:00:00:00:00:05".into(),
            bind_dev: "eth0".into(),
            id: 54,
            port: 4876,
        };
        let source = bind.source(IpFamily::V4).unwrap();
        let expected = VxlanLink::new("vx-bridge", 54)
            .port(4876)
            .local(source)
            .link(2)
            .mtu(1450)
            .address([0x0a, 0, 0, 0, 0, 5])
            .learning(false)
            .up();
        assert_eq!(vxlan_link(&device, &bind, source, [0x0a, 0, 0, 0, 0, 5]).unwrap(), expected);

        let bad = Device {
            port: 70000,
            ..device
        };
        assert!(vxlan_link(&bad, &bind, source, [0; 6]).is_err());
        assert!(bind.source(IpFamily::V6).is_none());
    }
}
