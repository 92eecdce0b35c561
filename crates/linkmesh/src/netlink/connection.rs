//! Netlink connection with request/response handling.

use tracing::trace;

use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{
    MessageIter, NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgError,
};
use super::parse::FromNetlink;
use super::socket::{NetlinkSocket, Protocol};

/// A netlink connection for one protocol family.
///
/// Requests on one connection are awaited one at a time; callers that share a
/// connection across tasks must serialize access.
pub struct Connection {
    socket: NetlinkSocket,
}

impl Connection {
    /// Create a new connection for the given protocol.
    pub fn new(protocol: Protocol) -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new(protocol)?,
        })
    }

    pub fn socket(&self) -> &NetlinkSocket {
        &self.socket
    }

    /// Send a request and return the raw reply datagram.
    ///
    /// Datagrams carrying no message for this request (late replies to an
    /// earlier one) are dropped. A kernel error reply for this request is
    /// returned as [`Error::Kernel`].
    pub async fn request(&self, mut builder: MessageBuilder) -> Result<Vec<u8>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        loop {
            let response = self.socket.recv_msg().await?;
            if process_response(&response, seq)? {
                return Ok(response);
            }
            trace!(seq, "dropping stale reply");
        }
    }

    /// Send a request that expects an ACK only (no data response).
    pub async fn request_ack(&self, mut builder: MessageBuilder) -> Result<()> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        loop {
            let response = self.socket.recv_msg().await?;
            if process_ack(&response, seq)? {
                return Ok(());
            }
            trace!(seq, "dropping stale reply");
        }
    }

    /// Send a dump request and collect all reply messages (header included).
    pub async fn dump(&self, mut builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        let mut responses = Vec::new();

        loop {
            let data = self.socket.recv_msg().await?;
            if collect_dump(&data, seq, &mut responses)? {
                break;
            }
        }

        Ok(responses)
    }

    /// Send a dump request and parse every reply into `T`.
    ///
    /// Replies that fail to parse are skipped.
    pub async fn dump_typed<T: FromNetlink>(&self, msg_type: u16) -> Result<Vec<T>> {
        let mut builder = dump_request(msg_type);

        let mut header_buf = Vec::new();
        T::write_dump_header(&mut header_buf);
        builder.append_bytes(&header_buf);

        let responses = self.dump(builder).await?;

        Ok(responses
            .iter()
            .filter(|r| r.len() >= NLMSG_HDRLEN)
            .filter_map(|r| T::from_bytes(&r[NLMSG_HDRLEN..]).ok())
            .collect())
    }
}

/// Check a reply datagram for a kernel error addressed to `expected_seq`.
///
/// Returns whether the datagram holds any message for `expected_seq`.
fn process_response(data: &[u8], expected_seq: u32) -> Result<bool> {
    let mut matched = false;
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        if header.nlmsg_seq != expected_seq {
            continue;
        }
        matched = true;

        if header.is_error() {
            let err = NlMsgError::from_bytes(payload)?;
            if !err.is_ack() {
                return Err(Error::from_errno(err.error));
            }
        }
    }

    Ok(matched)
}

/// Returns `true` once the ACK for `expected_seq` has been seen.
fn process_ack(data: &[u8], expected_seq: u32) -> Result<bool> {
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        if header.nlmsg_seq != expected_seq || !header.is_error() {
            continue;
        }

        let err = NlMsgError::from_bytes(payload)?;
        if !err.is_ack() {
            return Err(Error::from_errno(err.error));
        }
        return Ok(true);
    }

    Ok(false)
}

/// Append the data messages of one dump datagram to `out`.
///
/// Returns `true` once the terminating `NLMSG_DONE` has been seen.
fn collect_dump(data: &[u8], seq: u32, out: &mut Vec<Vec<u8>>) -> Result<bool> {
    let mut offset = 0;
    for result in MessageIter::new(data) {
        let (header, payload) = result?;
        let start = offset;
        offset = start + super::message::nlmsg_align(header.nlmsg_len as usize);

        if header.nlmsg_seq != seq {
            continue;
        }

        if header.is_error() {
            let err = NlMsgError::from_bytes(payload)?;
            if !err.is_ack() {
                return Err(Error::from_errno(err.error));
            }
            continue;
        }

        if header.is_done() {
            return Ok(true);
        }

        out.push(data[start..start + header.nlmsg_len as usize].to_vec());
    }

    Ok(false)
}

/// Helper to build a dump request.
pub fn dump_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP)
}

/// Helper to build a request expecting ACK.
pub fn ack_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK)
}
