//! Typed parsing of dump responses.
//!
//! Message types implement [`FromNetlink`] with winnow parsers over the
//! payload that follows the netlink header.

use winnow::binary::{Endianness, u16 as ne_u16};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;
use zerocopy::FromBytes;

use super::attr::{NLA_HDRLEN, NLA_TYPE_MASK, nla_align};
use super::error::{Error, Result};

/// Result type of the winnow parsers in this module.
pub type PResult<T> = std::result::Result<T, ErrMode<ContextError>>;

/// A message that can be requested with a dump and parsed from the reply.
pub trait FromNetlink: Sized {
    /// Write the family header a dump request for this type carries.
    fn write_dump_header(buf: &mut Vec<u8>);

    /// Parse one message payload (without the netlink header).
    fn parse(input: &mut &[u8]) -> PResult<Self>;

    /// Parse from a payload slice.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut input = data;
        Self::parse(&mut input)
            .map_err(|e| Error::InvalidMessage(format!("parse error: {:?}", e)))
    }
}

/// Fail the current parse without backtracking.
pub fn cut<T>() -> PResult<T> {
    Err(ErrMode::Cut(ContextError::new()))
}

fn take_bytes<'a>(input: &mut &'a [u8], n: usize) -> PResult<&'a [u8]> {
    take(n).parse_next(input)
}

fn attr_header(input: &mut &[u8]) -> PResult<(u16, u16)> {
    (ne_u16(Endianness::Native), ne_u16(Endianness::Native)).parse_next(input)
}

/// Parse a fixed-size family header (ifinfomsg, rtmsg, ...).
pub fn parse_header<T: FromBytes>(input: &mut &[u8]) -> PResult<T> {
    let bytes = take_bytes(input, std::mem::size_of::<T>())?;
    T::read_from_bytes(bytes).map_err(|_| ErrMode::Cut(ContextError::new()))
}

/// Parse one attribute, consuming its alignment padding.
///
/// Returns the attribute type with flag bits masked off and its payload.
pub fn parse_attr<'a>(input: &mut &'a [u8]) -> PResult<(u16, &'a [u8])> {
    let (len, kind) = attr_header(input)?;
    let len = len as usize;
    if len < NLA_HDRLEN || input.len() < len - NLA_HDRLEN {
        return cut();
    }
    let payload = take_bytes(input, len - NLA_HDRLEN)?;
    // The last attribute of a message may omit its padding.
    let padding = (nla_align(len) - len).min(input.len());
    take_bytes(input, padding)?;
    Ok((kind & NLA_TYPE_MASK, payload))
}

/// Parse a null-terminated string, lossily.
pub fn parse_string_from_bytes(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Parse a raw IPv4 or IPv6 address by payload length.
pub fn parse_ip(data: &[u8]) -> Option<std::net::IpAddr> {
    match data.len() {
        4 => {
            let octets: [u8; 4] = data.try_into().ok()?;
            Some(std::net::IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = data.try_into().ok()?;
            Some(std::net::IpAddr::from(octets))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attr_sequence() {
        let mut buf = vec![6, 0, 1, 0, 0xaa, 0xbb, 0, 0];
        buf.extend_from_slice(&[8, 0, 0x02 | 0x80, 0x80, 1, 2, 3, 4]);
        let mut input = buf.as_slice();

        let (kind, payload) = parse_attr(&mut input).unwrap();
        assert_eq!(kind, 1);
        assert_eq!(payload, &[0xaa, 0xbb]);

        let (kind, payload) = parse_attr(&mut input).unwrap();
        assert_eq!(kind, 0x82);
        assert_eq!(payload, &[1, 2, 3, 4]);
        assert!(input.is_empty());
    }

    #[test]
    fn test_parse_attr_truncated() {
        let buf = [12u8, 0, 1, 0, 1, 2];
        let mut input = &buf[..];
        assert!(parse_attr(&mut input).is_err());
    }

    #[test]
    fn test_parse_ip() {
        assert_eq!(
            parse_ip(&[10, 0, 0, 1]),
            Some("10.0.0.1".parse().unwrap())
        );
        assert!(parse_ip(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_parse_string_from_bytes() {
        assert_eq!(parse_string_from_bytes(b"vx-bridge\0\0\0"), "vx-bridge");
    }
}
