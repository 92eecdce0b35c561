//! Route operations for the overlay routing table.

use std::net::IpAddr;

use super::builder::MessageBuilder;
use super::connection::Connection;
use super::error::Result;
use super::message::{NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST, NlMsgType};
use super::messages::RouteMessage;
use super::types::addr::RT_SCOPE_UNIVERSE;
use super::types::route::{RTN_UNICAST, RTNH_F_ONLINK, RTPROT_BOOT, RtMsg, rta};
use crate::util::addr::{IpNet, ip_family, ip_octets};

/// An on-link unicast route in a specific table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRoute {
    pub dst: IpNet,
    pub gateway: IpAddr,
    pub oif: u32,
    pub table: u32,
}

impl TableRoute {
    fn header(&self) -> RtMsg {
        RtMsg {
            rtm_family: ip_family(&self.dst.addr),
            rtm_dst_len: self.dst.prefix_len,
            // Table IDs are carried in RTA_TABLE; the header field is u8.
            rtm_table: u8::try_from(self.table).unwrap_or(0),
            rtm_protocol: RTPROT_BOOT,
            rtm_scope: RT_SCOPE_UNIVERSE,
            rtm_type: RTN_UNICAST,
            rtm_flags: RTNH_F_ONLINK,
            ..Default::default()
        }
    }

    fn build(&self, msg_type: u16, flags: u16) -> MessageBuilder {
        let mut builder = MessageBuilder::new(msg_type, flags);
        builder.append(&self.header());
        builder.append_attr(rta::DST, &ip_octets(&self.dst.addr));
        builder.append_attr(rta::GATEWAY, &ip_octets(&self.gateway));
        builder.append_attr_u32(rta::OIF, self.oif);
        builder.append_attr_u32(rta::TABLE, self.table);
        builder
    }
}

impl Connection {
    /// Add a route. EEXIST if an identical route is present.
    pub async fn add_route(&self, route: &TableRoute) -> Result<()> {
        let builder = route.build(
            NlMsgType::RTM_NEWROUTE,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        );
        self.request_ack(builder).await.map_err(|e| {
            e.with_context(format!("adding route {}/{}", route.dst.addr, route.dst.prefix_len))
        })
    }

    pub async fn del_route(&self, route: &TableRoute) -> Result<()> {
        let builder = route.build(NlMsgType::RTM_DELROUTE, NLM_F_REQUEST | NLM_F_ACK);
        self.request_ack(builder).await.map_err(|e| {
            e.with_context(format!("deleting route {}/{}", route.dst.addr, route.dst.prefix_len))
        })
    }

    /// Dump routes of all families and tables.
    pub async fn get_routes(&self) -> Result<Vec<RouteMessage>> {
        self.dump_typed(NlMsgType::RTM_GETROUTE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::NLMSG_HDRLEN;
    use crate::netlink::parse::FromNetlink;

    #[test]
    fn test_table_route_layout() {
        let route = TableRoute {
            dst: IpNet {
                addr: "10.233.0.0".parse().unwrap(),
                prefix_len: 16,
            },
            gateway: "220.0.0.2".parse().unwrap(),
            oif: 9,
            table: 200,
        };
        let msg = route
            .build(NlMsgType::RTM_NEWROUTE, NLM_F_REQUEST)
            .finish();
        let parsed = RouteMessage::from_bytes(&msg[NLMSG_HDRLEN..]).unwrap();

        assert_eq!(parsed.table_id(), 200);
        assert_eq!(parsed.header.rtm_flags & RTNH_F_ONLINK, RTNH_F_ONLINK);
        assert_eq!(parsed.header.rtm_protocol, RTPROT_BOOT);
        assert_eq!(parsed.dst_len(), 16);
        assert_eq!(parsed.gateway(), Some(route.gateway));
        assert_eq!(parsed.oif(), Some(9));
    }
}
