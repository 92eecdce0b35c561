//! Address parsing and formatting utilities.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Error type for address parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix length: {0}")]
    InvalidPrefix(String),

    #[error("invalid MAC address: {0}")]
    InvalidMac(String),
}

pub type Result<T> = std::result::Result<T, AddrError>;

/// An IP address with a prefix length.
///
/// The address keeps its host bits; use [`IpNet::network`] for the masked
/// form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNet {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl IpNet {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        if prefix_len > max_prefix(&addr) {
            return Err(AddrError::InvalidPrefix(format!(
                "{} exceeds maximum {} for address family",
                prefix_len,
                max_prefix(&addr)
            )));
        }
        Ok(Self { addr, prefix_len })
    }

    /// The network with host bits cleared.
    pub fn network(&self) -> IpNet {
        let addr = match self.addr {
            IpAddr::V4(v4) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix_len as u32).unwrap_or(0);
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
            }
            IpAddr::V6(v6) => {
                let mask = u128::MAX
                    .checked_shl(128 - self.prefix_len as u32)
                    .unwrap_or(0);
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
            }
        };
        IpNet {
            addr,
            prefix_len: self.prefix_len,
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        if self.addr.is_ipv4() != ip.is_ipv4() {
            return false;
        }
        IpNet {
            addr: *ip,
            prefix_len: self.prefix_len,
        }
        .network()
            == self.network()
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for IpNet {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self> {
        parse_cidr(s)
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    if addr.is_ipv4() { 32 } else { 128 }
}

/// Parse an IP address from string.
pub fn parse_addr(s: &str) -> Result<IpAddr> {
    s.parse()
        .map_err(|_| AddrError::InvalidAddress(s.to_string()))
}

/// Parse CIDR notation (`addr/len`). The prefix length is required.
pub fn parse_cidr(s: &str) -> Result<IpNet> {
    let (addr_str, prefix_str) = s
        .split_once('/')
        .ok_or_else(|| AddrError::InvalidPrefix(format!("missing prefix length in {}", s)))?;
    let addr = parse_addr(addr_str)?;
    let prefix: u8 = prefix_str
        .parse()
        .map_err(|_| AddrError::InvalidPrefix(prefix_str.to_string()))?;
    IpNet::new(addr, prefix)
}

/// Canonical network form of a CIDR string.
///
/// `10.237.6.0/18` becomes `10.237.0.0/18`; IPv6 is printed compressed.
pub fn normalize_cidr(s: &str) -> Result<String> {
    Ok(parse_cidr(s)?.network().to_string())
}

/// AF_INET or AF_INET6 for an address.
pub fn ip_family(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => libc::AF_INET as u8,
        IpAddr::V6(_) => libc::AF_INET6 as u8,
    }
}

/// Raw network-order bytes of an address (4 or 16).
pub fn ip_octets(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Parse a MAC address from string.
pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(AddrError::InvalidMac(s.to_string()));
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16).map_err(|_| AddrError::InvalidMac(s.to_string()))?;
    }

    Ok(mac)
}

/// Format a MAC address.
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cidr_v4() {
        assert_eq!(normalize_cidr("10.237.6.0/18").unwrap(), "10.237.0.0/18");
        assert_eq!(normalize_cidr("0.0.0.0/0").unwrap(), "0.0.0.0/0");
        assert_eq!(normalize_cidr("10.1.2.3/32").unwrap(), "10.1.2.3/32");
    }

    #[test]
    fn test_normalize_cidr_v6() {
        assert_eq!(
            normalize_cidr("2409:8c2f:3800:0011::0a18:0000/114").unwrap(),
            "2409:8c2f:3800:11::a18:0/114"
        );
        assert_eq!(normalize_cidr("9480::0/16").unwrap(), "9480::/16");
    }

    #[test]
    fn test_parse_cidr_errors() {
        assert!(parse_cidr("10.0.0.1").is_err());
        assert!(parse_cidr("10.0.0.1/33").is_err());
        assert!(parse_cidr("nope/8").is_err());
    }

    #[test]
    fn test_contains() {
        let net: IpNet = "220.0.0.0/8".parse().unwrap();
        assert!(net.contains(&"220.1.2.3".parse().unwrap()));
        assert!(!net.contains(&"221.0.0.1".parse().unwrap()));
        assert!(!net.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_parse_mac() {
        let mac = parse_mac("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(mac, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert!(parse_mac("aa:bb:cc").is_err());
        assert!(parse_mac("zz:bb:cc:dd:ee:ff").is_err());
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(
            format_mac(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            "aa:bb:cc:dd:ee:ff"
        );
    }
}
