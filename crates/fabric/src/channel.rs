//! Raw IPv4 send/receive channel
//!
//! Sends go out through an `IPPROTO_RAW` socket (the kernel expects our own
//! IPv4 header). Replies are read from a raw ICMP socket and, for TCP and
//! UDP probes, a second raw socket of that protocol. Both receive sockets
//! see every datagram of their protocol arriving at the host, so callers
//! filter with a predicate.

use crate::error::FabricError;
use crate::packet::{parse_reply, Reply};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;
use tracing::{debug, trace};

const RECV_BUFFER: usize = 2048;

/// Which transport, besides ICMP, the channel should listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listen {
    IcmpOnly,
    Tcp,
    Udp,
}

/// A classified reply and the instant it was read.
#[derive(Debug, Clone)]
pub struct Received {
    pub reply: Reply,
    pub at: Instant,
}

pub struct RawChannel {
    send: Socket,
    icmp: AsyncFd<Socket>,
    extra: Option<AsyncFd<Socket>>,
}

impl RawChannel {
    /// Open the sockets, binding the send side to `interface` when given.
    pub fn open(listen: Listen, interface: Option<&str>) -> Result<Self, FabricError> {
        let send = raw_socket(libc::IPPROTO_RAW)?;
        if let Some(name) = interface {
            bind_to_interface(&send, name);
        }

        let icmp = AsyncFd::new(receive_socket(libc::IPPROTO_ICMP)?)?;
        let extra = match listen {
            Listen::IcmpOnly => None,
            Listen::Tcp => Some(AsyncFd::new(receive_socket(libc::IPPROTO_TCP)?)?),
            Listen::Udp => Some(AsyncFd::new(receive_socket(libc::IPPROTO_UDP)?)?),
        };

        Ok(Self { send, icmp, extra })
    }

    /// Whether this process may open raw sockets at all.
    #[must_use]
    pub fn is_available() -> bool {
        raw_socket(libc::IPPROTO_ICMP).is_ok()
    }

    /// Send a complete IPv4 datagram, returning the send instant.
    pub fn send(&self, packet: &[u8], dst: Ipv4Addr) -> Result<Instant, FabricError> {
        let addr = SockAddr::from(SocketAddrV4::new(dst, 0));
        let sent_at = Instant::now();
        self.send.send_to(packet, &addr)?;
        trace!(%dst, len = packet.len(), "raw packet sent");
        Ok(sent_at)
    }

    /// Wait up to `timeout` for the first reply accepted by `accept`.
    /// Returns `None` when the timeout elapses.
    pub async fn recv_matching<F>(
        &self,
        timeout: Duration,
        mut accept: F,
    ) -> Result<Option<Received>, FabricError>
    where
        F: FnMut(&Reply) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let datagram = match tokio::time::timeout_at(deadline, self.next_datagram()).await {
                Ok(result) => result?,
                Err(_elapsed) => return Ok(None),
            };
            let at = Instant::now();
            if let Some(reply) = parse_reply(&datagram) {
                if accept(&reply) {
                    return Ok(Some(Received { reply, at }));
                }
            }
        }
    }

    async fn next_datagram(&self) -> io::Result<Vec<u8>> {
        match &self.extra {
            None => recv_datagram(&self.icmp).await,
            Some(extra) => tokio::select! {
                icmp = recv_datagram(&self.icmp) => icmp,
                other = recv_datagram(extra) => other,
            },
        }
    }
}

async fn recv_datagram(fd: &AsyncFd<Socket>) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let mut guard = fd.readable().await?;
        match guard.try_io(|inner| {
            let mut socket: &Socket = inner.get_ref();
            socket.read(&mut buf)
        }) {
            Ok(result) => {
                let len = result?;
                buf.truncate(len);
                return Ok(buf);
            }
            Err(_would_block) => continue,
        }
    }
}

fn raw_socket(protocol: libc::c_int) -> Result<Socket, FabricError> {
    Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(protocol))).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            FabricError::NotPermitted
        } else {
            FabricError::Io(e)
        }
    })
}

fn receive_socket(protocol: libc::c_int) -> Result<Socket, FabricError> {
    let socket = raw_socket(protocol)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_to_interface(socket: &Socket, name: &str) {
    if let Err(e) = socket.bind_device(Some(name.as_bytes())) {
        debug!(interface = name, error = %e, "could not bind send socket to interface");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn bind_to_interface(_socket: &Socket, name: &str) {
    debug!(interface = name, "interface binding unsupported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{build_icmp_echo, Ipv4Params};

    #[tokio::test]
    async fn loopback_echo_round_trip() {
        if !RawChannel::is_available() {
            return;
        }
        let channel = RawChannel::open(Listen::IcmpOnly, None).unwrap();
        let dst = Ipv4Addr::LOCALHOST;
        let params = Ipv4Params::new(Ipv4Addr::UNSPECIFIED, dst, 64);
        let ident = rand::random::<u16>();
        let sent_at = channel.send(&build_icmp_echo(&params, ident, 1, &[0u8; 8]), dst).unwrap();

        let received = channel
            .recv_matching(Duration::from_secs(1), |reply| {
                matches!(reply, Reply::EchoReply { identifier, .. } if *identifier == ident)
            })
            .await
            .unwrap()
            .expect("loopback should answer");
        assert_eq!(received.reply.source(), dst);
        assert!(received.at >= sent_at);
    }

    #[tokio::test]
    async fn times_out_without_matching_reply() {
        if !RawChannel::is_available() {
            return;
        }
        let channel = RawChannel::open(Listen::Udp, None).unwrap();
        let got = channel
            .recv_matching(Duration::from_millis(50), |_| false)
            .await
            .unwrap();
        assert!(got.is_none());
    }
}
