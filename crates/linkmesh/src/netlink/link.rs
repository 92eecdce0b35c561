//! Link operations: VXLAN creation, deletion and lookup.

use std::net::IpAddr;

use super::builder::MessageBuilder;
use super::connection::Connection;
use super::error::{Error, Result};
use super::message::{NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST, NlMsgType};
use super::messages::LinkMessage;
use super::types::link::{IfInfoMsg, ifla, info, vxlan};

/// Builder for a VXLAN device.
///
/// ```ignore
/// let link = VxlanLink::new("vx-local", 55)
///     .port(4877)
///     .local("10.0.0.5".parse()?)
///     .link(2)
///     .mtu(1450)
///     .up();
/// conn.add_link(&link).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VxlanLink {
    name: String,
    vni: u32,
    port: Option<u16>,
    local: Option<IpAddr>,
    link: Option<u32>,
    mtu: Option<u32>,
    address: Option<[u8; 6]>,
    learning: bool,
    up: bool,
}

impl VxlanLink {
    pub fn new(name: impl Into<String>, vni: u32) -> Self {
        Self {
            name: name.into(),
            vni,
            port: None,
            local: None,
            link: None,
            mtu: None,
            address: None,
            learning: false,
            up: false,
        }
    }

    /// UDP destination port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Local tunnel endpoint address.
    pub fn local(mut self, addr: IpAddr) -> Self {
        self.local = Some(addr);
        self
    }

    /// Lower device index.
    pub fn link(mut self, ifindex: u32) -> Self {
        self.link = Some(ifindex);
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn address(mut self, mac: [u8; 6]) -> Self {
        self.address = Some(mac);
        self
    }

    pub fn learning(mut self, on: bool) -> Self {
        self.learning = on;
        self
    }

    /// Bring the device up on creation.
    pub fn up(mut self) -> Self {
        self.up = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> MessageBuilder {
        let mut builder = MessageBuilder::new(
            NlMsgType::RTM_NEWLINK,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        );
        let mut header = IfInfoMsg::new();
        if self.up {
            header = header.up();
        }
        builder.append(&header);
        builder.append_attr_str(ifla::IFNAME, &self.name);
        if let Some(mtu) = self.mtu {
            builder.append_attr_u32(ifla::MTU, mtu);
        }
        if let Some(mac) = self.address {
            builder.append_attr(ifla::ADDRESS, &mac);
        }

        let linkinfo = builder.nest_start(ifla::LINKINFO);
        builder.append_attr_str(info::KIND, "vxlan");
        let data = builder.nest_start(info::DATA);
        builder.append_attr_u32(vxlan::ID, self.vni);
        if let Some(idx) = self.link {
            builder.append_attr_u32(vxlan::LINK, idx);
        }
        match self.local {
            Some(IpAddr::V4(v4)) => builder.append_attr(vxlan::LOCAL, &v4.octets()),
            Some(IpAddr::V6(v6)) => builder.append_attr(vxlan::LOCAL6, &v6.octets()),
            None => {}
        }
        builder.append_attr_u8(vxlan::LEARNING, self.learning as u8);
        if let Some(port) = self.port {
            builder.append_attr_u16_be(vxlan::PORT, port);
        }
        builder.nest_end(data);
        builder.nest_end(linkinfo);

        builder
    }
}

impl Connection {
    /// Create a VXLAN device. Fails with EEXIST if the name is taken.
    pub async fn add_link(&self, link: &VxlanLink) -> Result<()> {
        self.request_ack(link.build())
            .await
            .map_err(|e| e.with_context(format!("adding vxlan {}", link.name)))
    }

    /// Delete a link by name.
    pub async fn del_link(&self, name: &str) -> Result<()> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_DELLINK, NLM_F_REQUEST | NLM_F_ACK);
        builder.append(&IfInfoMsg::new());
        builder.append_attr_str(ifla::IFNAME, name);
        self.request_ack(builder)
            .await
            .map_err(|e| e.with_context(format!("deleting link {}", name)))
    }

    pub async fn get_links(&self) -> Result<Vec<LinkMessage>> {
        self.dump_typed(NlMsgType::RTM_GETLINK).await
    }

    /// Get a link by name. Returns `None` if it does not exist.
    pub async fn get_link_by_name(&self, name: &str) -> Result<Option<LinkMessage>> {
        let links = self.get_links().await?;
        Ok(links.into_iter().find(|l| l.name() == Some(name)))
    }

    /// Get a link by index. Returns `None` if it does not exist.
    pub async fn get_link_by_index(&self, index: u32) -> Result<Option<LinkMessage>> {
        let links = self.get_links().await?;
        Ok(links.into_iter().find(|l| l.ifindex() == index))
    }

    /// Like [`get_link_by_name`](Self::get_link_by_name), but absence is an error.
    pub async fn require_link(&self, name: &str) -> Result<LinkMessage> {
        self.get_link_by_name(name)
            .await?
            .ok_or_else(|| Error::InterfaceNotFound {
                name: name.to_string(),
            })
    }
}
