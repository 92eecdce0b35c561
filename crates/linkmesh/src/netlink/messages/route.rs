//! Strongly-typed route message.

use std::net::IpAddr;

use crate::netlink::attr::get;
use crate::netlink::parse::{FromNetlink, PResult, parse_attr, parse_header, parse_ip};
use crate::netlink::types::route::{RtMsg, rta};

/// Route as reported by an `RTM_GETROUTE` dump.
#[derive(Debug, Clone, Default)]
pub struct RouteMessage {
    pub(crate) header: RtMsg,
    pub(crate) destination: Option<IpAddr>,
    pub(crate) gateway: Option<IpAddr>,
    pub(crate) oif: Option<u32>,
    /// RTA_TABLE, needed for table IDs above 255.
    pub(crate) table: Option<u32>,
}

impl RouteMessage {
    pub fn family(&self) -> u8 {
        self.header.rtm_family
    }

    pub fn dst_len(&self) -> u8 {
        self.header.rtm_dst_len
    }

    pub fn destination(&self) -> Option<IpAddr> {
        self.destination
    }

    pub fn gateway(&self) -> Option<IpAddr> {
        self.gateway
    }

    pub fn oif(&self) -> Option<u32> {
        self.oif
    }

    pub fn table_id(&self) -> u32 {
        self.table.unwrap_or(self.header.rtm_table as u32)
    }

    /// True for a default route (`0.0.0.0/0` or `::/0`).
    pub fn is_default(&self) -> bool {
        self.header.rtm_dst_len == 0
    }
}

impl FromNetlink for RouteMessage {
    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(&RtMsg::new()));
    }

    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header: RtMsg = parse_header(input)?;
        let mut msg = RouteMessage {
            header,
            ..Default::default()
        };

        while !input.is_empty() {
            let (kind, data) = parse_attr(input)?;
            match kind {
                rta::DST => msg.destination = parse_ip(data),
                rta::GATEWAY => msg.gateway = parse_ip(data),
                rta::OIF => msg.oif = get::u32_ne(data).ok(),
                rta::TABLE => msg.table = get::u32_ne(data).ok(),
                _ => {}
            }
        }

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::builder::MessageBuilder;
    use crate::netlink::message::NLMSG_HDRLEN;

    #[test]
    fn test_table_attr_overrides_header() {
        let mut b = MessageBuilder::new(24, 0);
        let mut hdr = RtMsg::new();
        hdr.rtm_family = libc::AF_INET as u8;
        hdr.rtm_dst_len = 16;
        hdr.rtm_table = 200;
        b.append(&hdr);
        b.append_attr(rta::DST, &[10, 233, 0, 0]);
        b.append_attr(rta::GATEWAY, &[220, 0, 0, 2]);
        b.append_attr_u32(rta::OIF, 7);
        b.append_attr_u32(rta::TABLE, 200);
        let payload = b.finish()[NLMSG_HDRLEN..].to_vec();

        let msg = RouteMessage::from_bytes(&payload).unwrap();
        assert_eq!(msg.table_id(), 200);
        assert_eq!(msg.dst_len(), 16);
        assert_eq!(msg.destination(), Some("10.233.0.0".parse().unwrap()));
        assert_eq!(msg.gateway(), Some("220.0.0.2".parse().unwrap()));
        assert_eq!(msg.oif(), Some(7));
        assert!(!msg.is_default());
    }
}
