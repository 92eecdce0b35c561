//! Typed dump replies.

mod addr;
mod link;
mod neigh;
mod route;

pub use addr::AddressMessage;
pub use link::{LinkInfo, LinkMessage, VxlanInfo};
pub use neigh::NeighborMessage;
pub use route::RouteMessage;
