//! Overlay routes in table 200.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::info;

use super::default::{DefaultNetwork, ROUTE_TABLE};
use super::{Result, exists_ok, missing_ok};
use crate::netlink::TableRoute;
use crate::netlink::messages::{LinkMessage, RouteMessage};
use crate::nodeconfig::Route;
use crate::util::addr::{IpNet, parse_addr, parse_cidr};

/// Map of interface index to name for the catalog devices present.
pub(super) fn catalog_indexes<'a>(
    links: &'a [LinkMessage],
    names: &[&str],
) -> HashMap<u32, &'a str> {
    links
        .iter()
        .filter_map(|l| l.name().map(|n| (l.ifindex(), n)))
        .filter(|(_, n)| names.contains(n))
        .collect()
}

fn unspecified(family: u8) -> IpAddr {
    if family == libc::AF_INET6 as u8 {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
}

/// Table-200 routes leaving through a catalog device.
fn overlay_routes(routes: &[RouteMessage], devices: &HashMap<u32, &str>) -> Vec<Route> {
    routes
        .iter()
        .filter(|r| r.table_id() == ROUTE_TABLE)
        .filter_map(|r| {
            let dev = r.oif().and_then(|oif| devices.get(&oif))?;
            let dst = IpNet {
                addr: r.destination().unwrap_or_else(|| unspecified(r.family())),
                prefix_len: r.dst_len(),
            };
            Some(Route {
                cidr: dst.network().to_string(),
                gw: r.gateway().map(|g| g.to_string()).unwrap_or_default(),
                dev: dev.to_string(),
            })
        })
        .collect()
}

impl DefaultNetwork {
    pub(super) async fn add_route(&self, route: &Route) -> Result<()> {
        let dst = parse_cidr(&route.cidr)?.network();
        let gateway = parse_addr(&route.gw)?;
        let conn = self.route_conn().await;
        let oif = conn.require_link(&route.dev).await?.ifindex();

        info!(dst = %dst, gw = %gateway, dev = %route.dev, "adding route");
        exists_ok(
            conn.add_route(&TableRoute {
                dst,
                gateway,
                oif,
                table: ROUTE_TABLE,
            })
            .await,
        )
    }

    pub(super) async fn delete_route(&self, route: &Route) -> Result<()> {
        let dst = parse_cidr(&route.cidr)?.network();
        let gateway = parse_addr(&route.gw)?;
        let conn = self.route_conn().await;
        let Some(link) = conn.get_link_by_name(&route.dev).await? else {
            return Ok(());
        };

        info!(dst = %dst, gw = %gateway, dev = %route.dev, "deleting route");
        missing_ok(
            conn.del_route(&TableRoute {
                dst,
                gateway,
                oif: link.ifindex(),
                table: ROUTE_TABLE,
            })
            .await,
        )
    }

    pub(super) async fn load_routes(&self) -> Result<Vec<Route>> {
        let names: Vec<&str> = self.catalog().await.iter().map(|d| d.name).collect();
        let conn = self.route_conn().await;
        let links = conn.get_links().await?;
        let routes = conn.get_routes().await?;
        Ok(overlay_routes(&routes, &catalog_indexes(&links, &names)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::types::route::RtMsg;
    use crate::network::IpFamily;

    fn route(dst: &str, len: u8, gw: &str, oif: u32, table: u32) -> RouteMessage {
        let dst: IpAddr = dst.parse().unwrap();
        let mut header = RtMsg::new();
        header.rtm_family = IpFamily::of(&dst).af();
        header.rtm_dst_len = len;
        RouteMessage {
            header,
            destination: Some(dst),
            gateway: Some(gw.parse().unwrap()),
            oif: Some(oif),
            table: Some(table),
        }
    }

    #[test]
    fn test_overlay_routes_filters_table_and_device() {
        let devices: HashMap<u32, &str> = [(7, "vx-bridge"), (9, "vx-bridge-6")].into();
        let routes = vec![
            route("10.233.0.0", 16, "220.0.0.7", 7, 200),
            route("10.234.0.0", 16, "220.0.0.8", 7, 254),
            route("10.235.0.0", 16, "192.168.0.1", 2, 200),
            route("fd00:10::", 64, "9480::7", 9, 200),
        ];
        assert_eq!(
            overlay_routes(&routes, &devices),
            vec![
                Route {
                    cidr: "10.233.0.0/16".into(),
                    gw: "220.0.0.7".into(),
                    dev: "vx-bridge".into(),
                },
                Route {
                    cidr: "fd00:10::/64".into(),
                    gw: "9480::7".into(),
                    dev: "vx-bridge-6".into(),
                },
            ]
        );
    }

    #[test]
    fn test_default_destination() {
        let devices: HashMap<u32, &str> = [(7, "vx-bridge")].into();
        let mut msg = route("0.0.0.0", 0, "220.0.0.1", 7, 200);
        msg.destination = None;
        assert_eq!(overlay_routes(&[msg], &devices)[0].cidr, "0.0.0.0/0");
    }
}
