//! Async netlink layer for the route and xfrm families.
//!
//! Covers exactly what the kernel adapter needs: VXLAN links, addresses,
//! table routes, policy rules, neighbor/FDB entries and IPsec
//! policies/states, plus typed dumps of each.

pub mod addr;
pub mod attr;
pub mod builder;
pub mod connection;
pub mod error;
pub mod link;
pub mod message;
pub mod messages;
pub mod neigh;
pub mod parse;
pub mod route;
pub mod rule;
pub mod socket;
pub mod types;
pub mod xfrm;

pub use connection::Connection;
pub use error::{Error, Result};
pub use link::VxlanLink;
pub use neigh::NeighborEntry;
pub use route::TableRoute;
pub use rule::TableRule;
pub use socket::Protocol;
pub use xfrm::{IpNet, PolicyDirection, PolicyParams, StateParams};
