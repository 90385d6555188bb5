//! TTL-stepping traceroute over ICMP echo or TCP SYN
//!
//! The hop loop is shared with the DNS traceroute, which only differs in
//! the packet it carries and the reply it expects from the destination.

use crate::context::ProbeContext;
use crate::options::{bounded_int, optional_str, required_str};
use scouter_common::report::{TraceHop, TraceProtocol, TraceReport};
use scouter_common::{RawOptions, ScouterError, ScouterResult};
use scouter_fabric::packet::{build_icmp_echo, build_tcp_syn, Ipv4Params, MAX_PAYLOAD};
use scouter_fabric::{route_interface, source_address, Listen, RawChannel, Reply};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_DPORT: u16 = 80;
pub const DEFAULT_PAYLOAD_SIZE: u16 = 56;
pub const MAX_TTL: u8 = 32;
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
    pub dst: String,
    pub proto: TraceProtocol,
    pub dport: u16,
    pub payload_size: u16,
    pub max_ttl: u8,
    /// Set when an unsupported protocol was replaced by ICMP.
    pub comment: Option<String>,
}

impl TraceOptions {
    pub fn parse(options: &RawOptions) -> ScouterResult<Self> {
        let dst = required_str(options, "dst")?;
        let requested = optional_str(options, "proto")
            .map(|p| p.to_uppercase())
            .unwrap_or_else(|| "ICMP".to_string());
        let (proto, comment) = match requested.as_str() {
            "ICMP" => (TraceProtocol::Icmp, None),
            "TCP" => (TraceProtocol::Tcp, None),
            other => (
                TraceProtocol::Icmp,
                Some(format!(
                    "Provided 'proto' of '{other}' is not supported. Defaulting to ICMP. ('ICMP', 'TCP')."
                )),
            ),
        };
        let dport = bounded_int(options, "dport", u64::from(DEFAULT_DPORT), 0, 65535)? as u16;
        let payload_size = bounded_int(
            options,
            "payload_size",
            u64::from(DEFAULT_PAYLOAD_SIZE),
            0,
            MAX_PAYLOAD as u64,
        )? as u16;
        let max_ttl = parse_max_ttl(options)?;
        Ok(Self {
            dst,
            proto,
            dport,
            payload_size,
            max_ttl,
            comment,
        })
    }
}

pub(crate) fn parse_max_ttl(options: &RawOptions) -> ScouterResult<u8> {
    Ok(bounded_int(options, "max_ttl", u64::from(MAX_TTL), 0, u64::from(MAX_TTL))? as u8)
}

/// Hops recorded by one trace and whether the destination answered.
#[derive(Debug, Default)]
pub(crate) struct HopTrace {
    pub hops: Vec<TraceHop>,
    pub reached: bool,
}

impl HopTrace {
    fn has_seen(&self, ip: IpAddr) -> bool {
        self.hops.iter().any(|hop| hop.src == Some(ip))
    }

    /// Classify the outcome for `ttl`. Silent and repeated hops are recorded
    /// here; a new responder is handed back for enrichment and `reached`
    /// is set when it is the destination.
    pub(crate) fn observe(
        &mut self,
        ttl: u8,
        reply: Option<(Ipv4Addr, f64)>,
        destination: Ipv4Addr,
    ) -> Option<TraceHop> {
        match reply {
            Some((src, rtt_ms)) if !self.has_seen(IpAddr::V4(src)) => {
                if src == destination {
                    self.reached = true;
                }
                Some(TraceHop {
                    asn: None,
                    ttl,
                    src: Some(IpAddr::V4(src)),
                    hostname: None,
                    rtt_ms: Some(rtt_ms),
                    no_response: false,
                })
            }
            _ => {
                self.hops.push(TraceHop::silent(ttl));
                None
            }
        }
    }
}

/// Send one probe per TTL from 1 to `max_ttl` and record each hop.
///
/// `build` produces the full datagram for the given header parameters and
/// `matches` decides whether a received reply answers it.
pub(crate) async fn trace_hops<B, M>(
    ctx: &ProbeContext,
    channel: &RawChannel,
    src: Ipv4Addr,
    destination: Ipv4Addr,
    max_ttl: u8,
    mut build: B,
    matches: M,
) -> ScouterResult<HopTrace>
where
    B: FnMut(&Ipv4Params) -> Vec<u8>,
    M: Fn(&Reply, &Ipv4Params) -> bool,
{
    let mut trace = HopTrace::default();
    for ttl in 1..=max_ttl {
        let params = Ipv4Params::new(src, destination, ttl).with_dont_fragment();
        let sent_at = channel.send(&build(&params), destination)?;
        let received = channel
            .recv_matching(RECV_TIMEOUT, |reply| matches(reply, &params))
            .await?;

        let observed = received.map(|r| {
            let rtt_ms = r.at.duration_since(sent_at).as_secs_f64() * 1000.0;
            (r.reply.source(), rtt_ms)
        });
        if let Some(mut hop) = trace.observe(ttl, observed, destination) {
            if let Some(ip) = hop.src {
                hop.asn = ctx.asn.lookup(ip);
                hop.hostname = Some(
                    ctx.resolver
                        .resolve_reverse(ip)
                        .await
                        .unwrap_or_else(|| ip.to_string()),
                );
            }
            debug!(ttl, src = ?hop.src, rtt_ms = ?hop.rtt_ms, "hop");
            trace.hops.push(hop);
            if trace.reached {
                break;
            }
        }
    }
    Ok(trace)
}

#[instrument(skip(ctx, opts), fields(dst = %opts.dst, proto = ?opts.proto))]
pub async fn run(ctx: &ProbeContext, opts: &TraceOptions) -> ScouterResult<TraceReport> {
    let dst = ctx.resolver.resolve_ipv4(&opts.dst).await?;
    let iface = route_interface(IpAddr::V4(dst)).await;
    let payload: Vec<u8> = (0..opts.payload_size).map(|_| rand::random::<u8>()).collect();

    let trace = match opts.proto {
        TraceProtocol::Icmp => {
            let channel = RawChannel::open(Listen::IcmpOnly, iface.as_deref())?;
            let src = source_address(dst).await.unwrap_or(Ipv4Addr::UNSPECIFIED);
            let identifier = rand::random::<u16>();
            trace_hops(
                ctx,
                &channel,
                src,
                dst,
                opts.max_ttl,
                |params| build_icmp_echo(params, identifier, u16::from(params.ttl), &payload),
                |reply, params| answers_echo(reply, params, identifier),
            )
            .await?
        }
        TraceProtocol::Tcp => {
            let channel = RawChannel::open(Listen::Tcp, iface.as_deref())?;
            let src = source_address(dst).await.ok_or_else(|| {
                ScouterError::transport(format!("Unable to find a local source address toward {dst}."))
            })?;
            let sport = ephemeral_port();
            let dport = opts.dport;
            trace_hops(
                ctx,
                &channel,
                src,
                dst,
                opts.max_ttl,
                |params| build_tcp_syn(params, sport, dport, rand::random::<u32>(), &payload),
                |reply, params| match reply {
                    Reply::Tcp { src, src_port, dst_port } => {
                        *src == params.dst && *src_port == dport && *dst_port == sport
                    }
                    other => other.quotes(params),
                },
            )
            .await?
        }
    };

    Ok(TraceReport {
        dst: opts.dst.clone(),
        proto: opts.proto,
        dport: opts.dport,
        payload_size: opts.payload_size,
        packet_size: opts.payload_size + opts.proto.header_overhead(),
        trace: trace.hops,
        comment: opts.comment.clone(),
        failed: !trace.reached,
    })
}

/// Echo replies must come from the destination and carry the TTL as
/// their sequence, so a late reply is not credited to a later hop.
fn answers_echo(reply: &Reply, params: &Ipv4Params, identifier: u16) -> bool {
    match reply {
        Reply::EchoReply { src, identifier: id, sequence, .. } => {
            *src == params.dst && *id == identifier && *sequence == u16::from(params.ttl)
        }
        other => other.quotes(params),
    }
}

/// Random source port from the dynamic range.
pub(crate) fn ephemeral_port() -> u16 {
    rand::random::<u16>() % 16384 + 49152
}
