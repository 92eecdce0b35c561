//! Non-blocking netlink socket driven by the tokio reactor.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::Result;

/// Large enough for one dump batch of routes or xfrm states.
const RECV_BUF_SIZE: usize = 32768;

/// Netlink families the agent talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Links, addresses, routes, rules and neighbors.
    Route,
    /// IPsec policies and security associations.
    Xfrm,
}

impl Protocol {
    fn family(self) -> isize {
        match self {
            Protocol::Route => protocols::NETLINK_ROUTE,
            Protocol::Xfrm => protocols::NETLINK_XFRM,
        }
    }
}

pub struct NetlinkSocket {
    fd: AsyncFd<Socket>,
    seq: AtomicU32,
    port: u32,
}

impl NetlinkSocket {
    /// Open and bind a socket; the kernel assigns the port id.
    pub fn new(protocol: Protocol) -> Result<Self> {
        let mut socket = Socket::new(protocol.family())?;
        socket.set_non_blocking(true)?;

        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        // Not supported everywhere; plain errors still carry the errno.
        let _ = socket.set_ext_ack(true);

        Ok(Self {
            port: addr.port_number(),
            fd: AsyncFd::new(socket)?,
            seq: AtomicU32::new(1),
        })
    }

    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Port id to stamp into outgoing headers.
    pub fn pid(&self) -> u32 {
        self.port
    }

    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        self.when_ready(Interest::WRITABLE, |sock| sock.send(msg, 0))
            .await?;
        Ok(())
    }

    /// Receive one datagram.
    pub async fn recv_msg(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(RECV_BUF_SIZE);
        // `recv` advances the buffer's length to the datagram size.
        self.when_ready(Interest::READABLE, |sock| sock.recv(&mut buf, 0))
            .await?;
        Ok(buf.to_vec())
    }

    async fn when_ready<R>(
        &self,
        interest: Interest,
        mut op: impl FnMut(&Socket) -> io::Result<R>,
    ) -> Result<R> {
        loop {
            let mut guard = self.fd.ready(interest).await?;
            if let Ok(result) = guard.try_io(|inner| op(inner.get_ref())) {
                return Ok(result?);
            }
        }
    }
}
