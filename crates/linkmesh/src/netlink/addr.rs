//! Address operations.

use std::net::IpAddr;

use super::builder::MessageBuilder;
use super::connection::Connection;
use super::error::Result;
use super::message::{NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST, NlMsgType};
use super::messages::AddressMessage;
use super::types::addr::{IfAddrMsg, ifa};
use crate::util::addr::{ip_family, ip_octets};

fn build_add(ifindex: u32, addr: IpAddr, prefix_len: u8) -> MessageBuilder {
    let mut builder = MessageBuilder::new(
        NlMsgType::RTM_NEWADDR,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
    );
    builder.append(
        &IfAddrMsg::new()
            .with_family(ip_family(&addr))
            .with_prefixlen(prefix_len)
            .with_index(ifindex),
    );
    let bytes = ip_octets(&addr);
    // IPv4 needs IFA_LOCAL; IFA_ADDRESS alone would be taken as the peer.
    if addr.is_ipv4() {
        builder.append_attr(ifa::LOCAL, &bytes);
    }
    builder.append_attr(ifa::ADDRESS, &bytes);
    builder
}

impl Connection {
    /// Assign `addr/prefix_len` to an interface. EEXIST if already assigned.
    pub async fn add_address(&self, ifindex: u32, addr: IpAddr, prefix_len: u8) -> Result<()> {
        self.request_ack(build_add(ifindex, addr, prefix_len))
            .await
            .map_err(|e| e.with_context(format!("adding address {}/{}", addr, prefix_len)))
    }

    pub async fn get_addresses(&self) -> Result<Vec<AddressMessage>> {
        self.dump_typed(NlMsgType::RTM_GETADDR).await
    }

    /// Addresses of one interface.
    pub async fn get_addresses_for(&self, ifindex: u32) -> Result<Vec<AddressMessage>> {
        let addrs = self.get_addresses().await?;
        Ok(addrs.into_iter().filter(|a| a.ifindex() == ifindex).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::AttrIter;
    use crate::netlink::message::NLMSG_HDRLEN;

    #[test]
    fn test_v4_has_local_and_address() {
        let msg = build_add(4, "220.0.0.5".parse().unwrap(), 8).finish();
        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN + IfAddrMsg::SIZE..])
            .map(|(k, _)| k)
            .collect();
        assert_eq!(attrs, vec![ifa::LOCAL, ifa::ADDRESS]);
    }

    #[test]
    fn test_v6_has_address_only() {
        let msg = build_add(4, "9480::5".parse().unwrap(), 16).finish();
        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN + IfAddrMsg::SIZE..])
            .map(|(k, d)| (k, d.len()))
            .collect();
        assert_eq!(attrs, vec![(ifa::ADDRESS, 16)]);
    }
}
