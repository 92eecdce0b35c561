//! Policy routing rule header.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// FIB rule header (struct fib_rule_hdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FibRuleHdr {
    pub family: u8,
    pub dst_len: u8,
    pub src_len: u8,
    pub tos: u8,
    pub table: u8,
    pub res1: u8,
    pub res2: u8,
    /// FR_ACT_* action.
    pub action: u8,
    pub flags: u32,
}

impl FibRuleHdr {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// FRA_* attribute IDs.
pub mod fra {
    pub const PRIORITY: u16 = 6;
    pub const TABLE: u16 = 15;
}

pub const FR_ACT_TO_TBL: u8 = 1;
