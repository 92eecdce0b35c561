//! Link message header.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Interface info message (struct ifinfomsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IfInfoMsg {
    /// Address family (usually AF_UNSPEC).
    pub ifi_family: u8,
    pub __ifi_pad: u8,
    /// Device type (ARPHRD_*).
    pub ifi_type: u16,
    /// Interface index.
    pub ifi_index: i32,
    /// Device flags (IFF_*).
    pub ifi_flags: u32,
    /// Change mask.
    pub ifi_change: u32,
}

impl IfInfoMsg {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: i32) -> Self {
        self.ifi_index = index;
        self
    }

    /// Set IFF_UP in both the flags and the change mask.
    pub fn up(mut self) -> Self {
        self.ifi_flags |= libc::IFF_UP as u32;
        self.ifi_change |= libc::IFF_UP as u32;
        self
    }
}

/// IFLA_* attribute IDs.
pub mod ifla {
    pub const ADDRESS: u16 = 1;
    pub const IFNAME: u16 = 3;
    pub const MTU: u16 = 4;
    pub const LINK: u16 = 5;
    pub const LINKINFO: u16 = 18;
}

/// Nested IFLA_INFO_* attribute IDs.
pub mod info {
    pub const KIND: u16 = 1;
    pub const DATA: u16 = 2;
}

/// IFLA_VXLAN_* attribute IDs.
pub mod vxlan {
    pub const ID: u16 = 1;
    pub const LINK: u16 = 3;
    pub const LOCAL: u16 = 4;
    pub const LEARNING: u16 = 7;
    pub const PORT: u16 = 15;
    pub const LOCAL6: u16 = 17;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size() {
        assert_eq!(IfInfoMsg::SIZE, 16);
    }

    #[test]
    fn test_up_sets_change_mask() {
        let msg = IfInfoMsg::new().with_index(3).up();
        assert_eq!(msg.ifi_index, 3);
        assert_eq!(msg.ifi_flags & 1, 1);
        assert_eq!(msg.ifi_change & 1, 1);
    }
}
