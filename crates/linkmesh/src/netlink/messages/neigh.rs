//! Strongly-typed neighbor message.

use std::net::IpAddr;

use crate::netlink::parse::{FromNetlink, PResult, parse_attr, parse_header, parse_ip};
use crate::netlink::types::neigh::{NdMsg, nda};

/// Neighbor or FDB entry as reported by an `RTM_GETNEIGH` dump.
#[derive(Debug, Clone, Default)]
pub struct NeighborMessage {
    pub(crate) header: NdMsg,
    pub(crate) destination: Option<IpAddr>,
    pub(crate) lladdr: Option<Vec<u8>>,
}

impl NeighborMessage {
    pub fn family(&self) -> u8 {
        self.header.ndm_family
    }

    pub fn ifindex(&self) -> u32 {
        self.header.ndm_ifindex as u32
    }

    pub fn state(&self) -> u16 {
        self.header.ndm_state
    }

    pub fn destination(&self) -> Option<IpAddr> {
        self.destination
    }

    pub fn lladdr(&self) -> Option<&[u8]> {
        self.lladdr.as_deref()
    }
}

impl FromNetlink for NeighborMessage {
    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(&NdMsg::new()));
    }

    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header: NdMsg = parse_header(input)?;
        let mut msg = NeighborMessage {
            header,
            ..Default::default()
        };

        while !input.is_empty() {
            let (kind, data) = parse_attr(input)?;
            match kind {
                nda::DST => msg.destination = parse_ip(data),
                nda::LLADDR => msg.lladdr = Some(data.to_vec()),
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
    use crate::netlink::types::neigh::{AF_BRIDGE, nud};

    #[test]
    fn test_parse_fdb_entry() {
        let mut b = MessageBuilder::new(28, 0);
        b.append(
            &NdMsg::new()
                .with_family(AF_BRIDGE)
                .with_ifindex(5)
                .with_state(nud::PERMANENT | nud::NOARP),
        );
        b.append_attr(nda::LLADDR, &[0xaa, 0xbb, 0xcc, 0, 0, 1]);
        b.append_attr(nda::DST, &[192, 168, 1, 7]);
        let payload = b.finish()[NLMSG_HDRLEN..].to_vec();

        let msg = NeighborMessage::from_bytes(&payload).unwrap();
        assert_eq!(msg.family(), AF_BRIDGE);
        assert_eq!(msg.ifindex(), 5);
        assert_eq!(msg.state(), 0xc0);
        assert_eq!(msg.lladdr(), Some(&[0xaa, 0xbb, 0xcc, 0, 0, 1][..]));
        assert_eq!(msg.destination(), Some("192.168.1.7".parse().unwrap()));
    }
}
