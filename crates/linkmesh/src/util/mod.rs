//! Shared helpers.

pub mod addr;
pub mod hex;
