//! Strongly-typed address message.

use std::net::IpAddr;

use crate::netlink::parse::{FromNetlink, PResult, parse_attr, parse_header, parse_ip};
use crate::netlink::types::addr::{IfAddrMsg, ifa};

/// Address as reported by an `RTM_GETADDR` dump.
#[derive(Debug, Clone, Default)]
pub struct AddressMessage {
    pub(crate) header: IfAddrMsg,
    /// IFA_ADDRESS (peer address on point-to-point links).
    pub(crate) address: Option<IpAddr>,
    /// IFA_LOCAL (the local address, IPv4 only).
    pub(crate) local: Option<IpAddr>,
}

impl AddressMessage {
    pub fn ifindex(&self) -> u32 {
        self.header.ifa_index
    }

    pub fn family(&self) -> u8 {
        self.header.ifa_family
    }

    pub fn prefix_len(&self) -> u8 {
        self.header.ifa_prefixlen
    }

    pub fn scope(&self) -> u8 {
        self.header.ifa_scope
    }

    /// The interface's own address: IFA_LOCAL if present, else IFA_ADDRESS.
    pub fn ip(&self) -> Option<IpAddr> {
        self.local.or(self.address)
    }
}

impl FromNetlink for AddressMessage {
    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(&IfAddrMsg::new()));
    }

    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header: IfAddrMsg = parse_header(input)?;
        let mut msg = AddressMessage {
            header,
            ..Default::default()
        };

        while !input.is_empty() {
            let (kind, data) = parse_attr(input)?;
            match kind {
                ifa::ADDRESS => msg.address = parse_ip(data),
                ifa::LOCAL => msg.local = parse_ip(data),
                _ => {}
            }
        }

        Ok(msg)
    }
}
