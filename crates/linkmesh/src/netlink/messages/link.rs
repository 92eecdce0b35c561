//! Strongly-typed link message.

use std::net::IpAddr;

use crate::netlink::attr::{AttrIter, get};
use crate::netlink::parse::{
    FromNetlink, PResult, parse_attr, parse_header, parse_ip, parse_string_from_bytes,
};
use crate::netlink::types::link::{IfInfoMsg, ifla, info, vxlan};

/// Link as reported by an `RTM_GETLINK` dump.
#[derive(Debug, Clone, Default)]
pub struct LinkMessage {
    pub(crate) header: IfInfoMsg,
    /// Interface name (IFLA_IFNAME).
    pub(crate) name: Option<String>,
    /// Hardware address (IFLA_ADDRESS).
    pub(crate) address: Option<Vec<u8>>,
    /// MTU (IFLA_MTU).
    pub(crate) mtu: Option<u32>,
    /// Lower device index for stacked devices (IFLA_LINK).
    pub(crate) link: Option<u32>,
    /// Link info (IFLA_LINKINFO).
    pub(crate) link_info: Option<LinkInfo>,
}

/// Link type information from IFLA_LINKINFO.
#[derive(Debug, Clone, Default)]
pub struct LinkInfo {
    pub(crate) kind: Option<String>,
    /// Decoded IFLA_INFO_DATA when `kind` is `vxlan`.
    pub(crate) vxlan: Option<VxlanInfo>,
}

/// The VXLAN attributes the agent reads back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VxlanInfo {
    pub vni: Option<u32>,
    /// Lower device index (IFLA_VXLAN_LINK).
    pub link: Option<u32>,
    pub local: Option<IpAddr>,
    /// Destination UDP port, host order.
    pub port: Option<u16>,
}

impl LinkMessage {
    pub fn ifindex(&self) -> u32 {
        self.header.ifi_index as u32
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn address(&self) -> Option<&[u8]> {
        self.address.as_deref()
    }

    pub fn mtu(&self) -> Option<u32> {
        self.mtu
    }

    /// The link kind, e.g. `vxlan`. Physical devices have none.
    pub fn kind(&self) -> Option<&str> {
        self.link_info.as_ref().and_then(|i| i.kind.as_deref())
    }

    pub fn vxlan(&self) -> Option<&VxlanInfo> {
        self.link_info.as_ref().and_then(|i| i.vxlan.as_ref())
    }

    /// Lower device index, from IFLA_LINK or the VXLAN info.
    pub fn lower_index(&self) -> Option<u32> {
        self.link
            .or_else(|| self.vxlan().and_then(|v| v.link))
            .filter(|&idx| idx != 0)
    }
}

impl FromNetlink for LinkMessage {
    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(&IfInfoMsg::new()));
    }

    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header: IfInfoMsg = parse_header(input)?;
        let mut msg = LinkMessage {
            header,
            ..Default::default()
        };

        while !input.is_empty() {
            let (kind, data) = parse_attr(input)?;
            match kind {
                ifla::IFNAME => msg.name = Some(parse_string_from_bytes(data)),
                ifla::ADDRESS => msg.address = Some(data.to_vec()),
                ifla::MTU => msg.mtu = get::u32_ne(data).ok(),
                ifla::LINK => msg.link = get::u32_ne(data).ok(),
                ifla::LINKINFO => msg.link_info = Some(parse_link_info(data)),
                _ => {}
            }
        }

        Ok(msg)
    }
}

fn parse_link_info(data: &[u8]) -> LinkInfo {
    let mut link_info = LinkInfo::default();
    let mut raw_data = None;

    for (kind, payload) in AttrIter::new(data) {
        match kind {
            info::KIND => link_info.kind = Some(parse_string_from_bytes(payload)),
            info::DATA => raw_data = Some(payload),
            _ => {}
        }
    }

    if link_info.kind.as_deref() == Some("vxlan") {
        link_info.vxlan = raw_data.map(parse_vxlan);
    }

    link_info
}

fn parse_vxlan(data: &[u8]) -> VxlanInfo {
    let mut info = VxlanInfo::default();
    for (kind, payload) in AttrIter::new(data) {
        match kind {
            vxlan::ID => info.vni = get::u32_ne(payload).ok(),
            vxlan::LINK => info.link = get::u32_ne(payload).ok(),
            vxlan::LOCAL | vxlan::LOCAL6 => info.local = parse_ip(payload),
            vxlan::PORT => info.port = get::u16_be(payload).ok(),
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::builder::MessageBuilder;
    use crate::netlink::message::NLMSG_HDRLEN;

    fn vxlan_link_payload() -> Vec<u8> {
        let mut b = MessageBuilder::new(16, 0);
        b.append(&IfInfoMsg::new().with_index(12));
        b.append_attr_str(ifla::IFNAME, "vx-local");
        b.append_attr_u32(ifla::MTU, 1450);
        b.append_attr(ifla::ADDRESS, &[0x02, 0, 0, 0, 0, 0x01]);
        let li = b.nest_start(ifla::LINKINFO);
        b.append_attr_str(info::KIND, "vxlan");
        let data = b.nest_start(info::DATA);
        b.append_attr_u32(vxlan::ID, 55);
        b.append_attr_u32(vxlan::LINK, 2);
        b.append_attr(vxlan::LOCAL, &[10, 0, 0, 5]);
        b.append_attr_u16_be(vxlan::PORT, 4877);
        b.nest_end(data);
        b.nest_end(li);
        b.finish()[NLMSG_HDRLEN..].to_vec()
    }

    #[test]
    fn test_parse_vxlan_link() {
        let msg = LinkMessage::from_bytes(&vxlan_link_payload()).unwrap();
        assert_eq!(msg.ifindex(), 12);
        assert_eq!(msg.name(), Some("vx-local"));
        assert_eq!(msg.mtu(), Some(1450));
        assert_eq!(msg.kind(), Some("vxlan"));
        let vx = msg.vxlan().unwrap();
        assert_eq!(vx.vni, Some(55));
        assert_eq!(vx.port, Some(4877));
        assert_eq!(vx.local, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(msg.lower_index(), Some(2));
    }

    #[test]
    fn test_parse_plain_link() {
        let mut b = MessageBuilder::new(16, 0);
        b.append(&IfInfoMsg::new().with_index(1));
        b.append_attr_str(ifla::IFNAME, "lo");
        let payload = b.finish()[NLMSG_HDRLEN..].to_vec();

        let msg = LinkMessage::from_bytes(&payload).unwrap();
        assert_eq!(msg.name(), Some("lo"));
        assert_eq!(msg.kind(), None);
        assert_eq!(msg.lower_index(), None);
    }

    #[test]
    fn test_parse_truncated_header() {
        assert!(LinkMessage::from_bytes(&[0u8; 8]).is_err());
    }
}
