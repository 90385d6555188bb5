//! IPv4 probe packet building and reply parsing
//!
//! Builders write the full datagram (IPv4 header included) for a socket
//! opened with `IPPROTO_RAW`. Replies are classified with `pnet` views into
//! the few shapes the probes care about.

use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use std::net::Ipv4Addr;

pub const IPV4_HEADER_LEN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;
pub const TCP_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

/// Largest payload accepted by the probes (1500 byte MTU minus IPv4 and ICMP headers).
pub const MAX_PAYLOAD: usize = 1472;

/// IP protocol numbers
pub mod ip_proto {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// ICMP message types
pub mod icmp_type {
    pub const ECHO_REPLY: u8 = 0;
    pub const DEST_UNREACHABLE: u8 = 3;
    pub const ECHO_REQUEST: u8 = 8;
    pub const TIME_EXCEEDED: u8 = 11;
}

/// TCP flag constants
pub mod tcp_flags {
    pub const SYN: u8 = 0x02;
}

const FLAG_DONT_FRAGMENT: u16 = 0x4000;

/// Per-packet IPv4 header parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Params {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
    /// IP identification; replies quoting our header are matched on it.
    pub ident: u16,
    pub dont_fragment: bool,
}

impl Ipv4Params {
    /// Parameters with a random identification and the DF flag clear.
    #[must_use]
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8) -> Self {
        Self {
            src,
            dst,
            ttl,
            ident: rand::random::<u16>(),
            dont_fragment: false,
        }
    }

    #[must_use]
    pub fn with_dont_fragment(mut self) -> Self {
        self.dont_fragment = true;
        self
    }
}

/// Write a 20 byte IPv4 header (no options) into `buf[..20]`.
fn write_ipv4_header(buf: &mut [u8], params: &Ipv4Params, protocol: u8, total_len: u16) {
    buf[0] = 0x45; // Version 4, IHL 5
    buf[1] = 0x00; // DSCP/ECN
    buf[2..4].copy_from_slice(&total_len.to_be_bytes());
    buf[4..6].copy_from_slice(&params.ident.to_be_bytes());
    let flags = if params.dont_fragment { FLAG_DONT_FRAGMENT } else { 0 };
    buf[6..8].copy_from_slice(&flags.to_be_bytes());
    buf[8] = params.ttl;
    buf[9] = protocol;
    buf[10..12].copy_from_slice(&[0, 0]);
    buf[12..16].copy_from_slice(&params.src.octets());
    buf[16..20].copy_from_slice(&params.dst.octets());

    let ip_checksum = checksum(&buf[0..IPV4_HEADER_LEN]);
    buf[10..12].copy_from_slice(&ip_checksum.to_be_bytes());
}

/// Build IPv4 + ICMP echo request.
#[must_use]
pub fn build_icmp_echo(params: &Ipv4Params, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let total = IPV4_HEADER_LEN + ICMP_HEADER_LEN + payload.len();
    let mut buf = vec![0u8; total];
    write_ipv4_header(&mut buf, params, ip_proto::ICMP, total as u16);

    let icmp = &mut buf[IPV4_HEADER_LEN..];
    icmp[0] = icmp_type::ECHO_REQUEST;
    icmp[1] = 0; // Code
    icmp[4..6].copy_from_slice(&identifier.to_be_bytes());
    icmp[6..8].copy_from_slice(&sequence.to_be_bytes());
    icmp[ICMP_HEADER_LEN..].copy_from_slice(payload);

    let icmp_checksum = checksum(icmp);
    icmp[2..4].copy_from_slice(&icmp_checksum.to_be_bytes());
    buf
}

/// Build IPv4 + TCP SYN, with `payload` carried after the header.
#[must_use]
pub fn build_tcp_syn(
    params: &Ipv4Params,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    payload: &[u8],
) -> Vec<u8> {
    let total = IPV4_HEADER_LEN + TCP_HEADER_LEN + payload.len();
    let mut buf = vec![0u8; total];
    write_ipv4_header(&mut buf, params, ip_proto::TCP, total as u16);

    let tcp = &mut buf[IPV4_HEADER_LEN..];
    tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[4..8].copy_from_slice(&seq.to_be_bytes());
    tcp[8..12].copy_from_slice(&0u32.to_be_bytes()); // ACK = 0
    tcp[12] = 0x50; // Data offset: 5 (20 bytes)
    tcp[13] = tcp_flags::SYN;
    tcp[14..16].copy_from_slice(&65535u16.to_be_bytes()); // Window size
    tcp[TCP_HEADER_LEN..].copy_from_slice(payload);

    let tcp_checksum = pseudo_header_checksum(&params.src, &params.dst, ip_proto::TCP, tcp);
    tcp[16..18].copy_from_slice(&tcp_checksum.to_be_bytes());
    buf
}

/// Build IPv4 + UDP.
#[must_use]
pub fn build_udp(params: &Ipv4Params, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let total = IPV4_HEADER_LEN + udp_len;
    let mut buf = vec![0u8; total];
    write_ipv4_header(&mut buf, params, ip_proto::UDP, total as u16);

    let udp = &mut buf[IPV4_HEADER_LEN..];
    udp[0..2].copy_from_slice(&src_port.to_be_bytes());
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
    udp[UDP_HEADER_LEN..].copy_from_slice(payload);

    let mut udp_checksum = pseudo_header_checksum(&params.src, &params.dst, ip_proto::UDP, udp);
    if udp_checksum == 0 {
        udp_checksum = 0xffff; // zero means "no checksum" for UDP
    }
    udp[6..8].copy_from_slice(&udp_checksum.to_be_bytes());
    buf
}

/// Internet checksum (RFC 1071).
#[inline(always)]
pub fn checksum(data: &[u8]) -> u16 {
    fold(sum_words(data, 0))
}

#[inline(always)]
fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

#[inline(always)]
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !sum as u16
}

/// TCP/UDP checksum with IPv4 pseudo-header
#[inline(always)]
fn pseudo_header_checksum(src: &Ipv4Addr, dst: &Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let mut sum = sum_words(&src.octets(), 0);
    sum = sum_words(&dst.octets(), sum);
    sum += protocol as u32;
    sum += segment.len() as u32;
    fold(sum_words(segment, sum))
}

/// A received IPv4 datagram, reduced to what the probes match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    EchoReply {
        src: Ipv4Addr,
        ttl: u8,
        total_len: u16,
        code: u8,
        identifier: u16,
        sequence: u16,
    },
    /// Time-exceeded or destination-unreachable quoting one of our packets.
    IcmpError {
        src: Ipv4Addr,
        icmp_type: u8,
        code: u8,
        quoted_ident: u16,
        quoted_dst: Ipv4Addr,
        quoted_protocol: u8,
    },
    Tcp {
        src: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    },
    Udp {
        src: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        payload: Vec<u8>,
    },
}

impl Reply {
    #[inline]
    #[must_use]
    pub const fn source(&self) -> Ipv4Addr {
        match self {
            Reply::EchoReply { src, .. }
            | Reply::IcmpError { src, .. }
            | Reply::Tcp { src, .. }
            | Reply::Udp { src, .. } => *src,
        }
    }

    /// True for an ICMP error caused by the packet sent with `params`.
    #[must_use]
    pub fn quotes(&self, params: &Ipv4Params) -> bool {
        matches!(
            self,
            Reply::IcmpError { quoted_ident, quoted_dst, .. }
                if *quoted_ident == params.ident && *quoted_dst == params.dst
        )
    }
}

/// Parse a datagram read from a raw IPv4 socket (IP header included).
#[must_use]
pub fn parse_reply(buf: &[u8]) -> Option<Reply> {
    let ip = Ipv4Packet::new(buf)?;
    if ip.get_version() != 4 {
        return None;
    }
    let src = ip.get_source();
    let payload = transport_slice(buf, &ip)?;

    match ip.get_next_level_protocol() {
        IpNextHeaderProtocols::Icmp => parse_icmp(src, &ip, payload),
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(payload)?;
            Some(Reply::Tcp {
                src,
                src_port: tcp.get_source(),
                dst_port: tcp.get_destination(),
            })
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(payload)?;
            Some(Reply::Udp {
                src,
                src_port: udp.get_source(),
                dst_port: udp.get_destination(),
                payload: udp.payload().to_vec(),
            })
        }
        _ => None,
    }
}

/// Bytes after the IPv4 header, clamped to what was actually received.
fn transport_slice<'a>(buf: &'a [u8], ip: &Ipv4Packet<'_>) -> Option<&'a [u8]> {
    let ihl = ip.get_header_length() as usize * 4;
    if ihl < IPV4_HEADER_LEN || buf.len() < ihl {
        return None;
    }
    let end = (ip.get_total_length() as usize).clamp(ihl, buf.len());
    Some(&buf[ihl..end])
}

fn parse_icmp(src: Ipv4Addr, ip: &Ipv4Packet<'_>, payload: &[u8]) -> Option<Reply> {
    let icmp = IcmpPacket::new(payload)?;
    let icmp_type = icmp.get_icmp_type().0;
    let code = icmp.get_icmp_code().0;
    match icmp_type {
        icmp_type::ECHO_REPLY => {
            let echo = EchoReplyPacket::new(payload)?;
            Some(Reply::EchoReply {
                src,
                ttl: ip.get_ttl(),
                total_len: ip.get_total_length(),
                code,
                identifier: echo.get_identifier(),
                sequence: echo.get_sequence_number(),
            })
        }
        icmp_type::TIME_EXCEEDED | icmp_type::DEST_UNREACHABLE => {
            // 4 bytes type/code/checksum, 4 unused, then the quoted IPv4 header.
            let quoted = Ipv4Packet::new(payload.get(ICMP_HEADER_LEN..)?)?;
            Some(Reply::IcmpError {
                src,
                icmp_type,
                code,
                quoted_ident: quoted.get_identification(),
                quoted_dst: quoted.get_destination(),
                quoted_protocol: protocol_number(quoted.get_next_level_protocol()),
            })
        }
        _ => None,
    }
}

#[inline]
fn protocol_number(protocol: IpNextHeaderProtocol) -> u8 {
    protocol.0
}
