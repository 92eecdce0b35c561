//! Neighbor and bridge FDB operations.

use std::net::IpAddr;

use super::builder::MessageBuilder;
use super::connection::{Connection, dump_request};
use super::error::Result;
use super::message::{
    NLM_F_ACK, NLM_F_APPEND, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgType,
};
use super::messages::NeighborMessage;
use super::parse::FromNetlink;
use super::types::neigh::{AF_BRIDGE, NdMsg, nda, ntf, nud};
use crate::util::addr::{ip_family, ip_octets};

/// How an add treats an existing entry with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborMode {
    /// `bridge fdb append`: multiple destinations per MAC.
    Append,
    /// `ip neigh replace`.
    Replace,
}

/// A neighbor or FDB entry to install or remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    family: u8,
    ifindex: u32,
    state: u16,
    flags: u8,
    dst: Option<IpAddr>,
    lladdr: [u8; 6],
    mode: NeighborMode,
}

impl NeighborEntry {
    /// Permanent FDB entry on a VXLAN device pointing `mac` at remote `dst`.
    pub fn fdb(ifindex: u32, mac: [u8; 6], dst: IpAddr) -> Self {
        Self {
            family: AF_BRIDGE,
            ifindex,
            state: nud::PERMANENT | nud::NOARP,
            flags: ntf::SELF,
            dst: Some(dst),
            lladdr: mac,
            mode: NeighborMode::Append,
        }
    }

    /// Permanent ARP/NDP entry.
    pub fn arp(ifindex: u32, ip: IpAddr, mac: [u8; 6]) -> Self {
        Self {
            family: ip_family(&ip),
            ifindex,
            state: nud::PERMANENT,
            flags: 0,
            dst: Some(ip),
            lladdr: mac,
            mode: NeighborMode::Replace,
        }
    }

    fn build(&self, msg_type: u16, flags: u16) -> MessageBuilder {
        let mut builder = MessageBuilder::new(msg_type, flags);
        builder.append(
            &NdMsg::new()
                .with_family(self.family)
                .with_ifindex(self.ifindex as i32)
                .with_state(self.state)
                .with_flags(self.flags),
        );
        if let Some(dst) = &self.dst {
            builder.append_attr(nda::DST, &ip_octets(dst));
        }
        builder.append_attr(nda::LLADDR, &self.lladdr);
        builder
    }

    fn build_add(&self) -> MessageBuilder {
        let mode = match self.mode {
            NeighborMode::Append => NLM_F_APPEND,
            NeighborMode::Replace => NLM_F_REPLACE,
        };
        self.build(
            NlMsgType::RTM_NEWNEIGH,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | mode,
        )
    }
}

impl Connection {
    pub async fn add_neighbor(&self, entry: &NeighborEntry) -> Result<()> {
        self.request_ack(entry.build_add())
            .await
            .map_err(|e| e.with_context("adding neighbor"))
    }

    pub async fn del_neighbor(&self, entry: &NeighborEntry) -> Result<()> {
        let builder = entry.build(NlMsgType::RTM_DELNEIGH, NLM_F_REQUEST | NLM_F_ACK);
        self.request_ack(builder)
            .await
            .map_err(|e| e.with_context("deleting neighbor"))
    }

    /// Dump neighbors of one family (AF_INET, AF_INET6 or AF_BRIDGE).
    pub async fn get_neighbors(&self, family: u8) -> Result<Vec<NeighborMessage>> {
        let mut builder = dump_request(NlMsgType::RTM_GETNEIGH);
        builder.append(&NdMsg::new().with_family(family));

        let responses = self.dump(builder).await?;
        Ok(responses
            .iter()
            .filter(|r| r.len() >= NLMSG_HDRLEN)
            .filter_map(|r| NeighborMessage::from_bytes(&r[NLMSG_HDRLEN..]).ok())
            .filter(|n| n.family() == family)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::NlMsgHdr;

    #[test]
    fn test_fdb_append_flags() {
        let entry = NeighborEntry::fdb(5, [0xaa; 6], "192.168.1.7".parse().unwrap());
        let msg = entry.build_add().finish();
        let hdr = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(hdr.nlmsg_flags & NLM_F_APPEND, NLM_F_APPEND);
        assert_eq!(hdr.nlmsg_flags & NLM_F_CREATE, NLM_F_CREATE);

        let parsed = NeighborMessage::from_bytes(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(parsed.family(), AF_BRIDGE);
        assert_eq!(parsed.state(), nud::PERMANENT | nud::NOARP);
        assert_eq!(parsed.header.ndm_flags, ntf::SELF);
        assert_eq!(parsed.destination(), Some("192.168.1.7".parse().unwrap()));
        assert_eq!(parsed.lladdr(), Some(&[0xaa; 6][..]));
    }

    #[test]
    fn test_arp_replace_by_family() {
        let entry = NeighborEntry::arp(5, "fd00::7".parse().unwrap(), [0xbb; 6]);
        let msg = entry.build_add().finish();
        let hdr = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(hdr.nlmsg_flags & NLM_F_REPLACE, NLM_F_REPLACE);

        let parsed = NeighborMessage::from_bytes(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(parsed.family(), libc::AF_INET6 as u8);
        assert_eq!(parsed.state(), nud::PERMANENT);
    }
}
