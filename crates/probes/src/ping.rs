//! ICMP echo probe

use crate::context::ProbeContext;
use crate::options::{bounded_int, int_option, required_str};
use scouter_common::report::{PingReply, PingReport, RttSummary};
use scouter_common::{RawOptions, ScouterResult};
use scouter_fabric::packet::{build_icmp_echo, Ipv4Params, IPV4_HEADER_LEN, MAX_PAYLOAD};
use scouter_fabric::{route_interface, Listen, RawChannel, Reply};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_COUNT: u32 = 10;
pub const MAX_COUNT: u32 = 20;
pub const DEFAULT_PAYLOAD_SIZE: u16 = 56;
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);
pub const SEND_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingOptions {
    pub dst: String,
    pub count: u32,
    pub payload_size: u16,
    /// Set when `count` was out of range and replaced by the default.
    pub comment: Option<String>,
}

impl PingOptions {
    pub fn parse(options: &RawOptions) -> ScouterResult<Self> {
        let dst = required_str(options, "dst")?;
        let requested = int_option(options, "count", u64::from(DEFAULT_COUNT))?;
        let (count, comment) = if (1..=u64::from(MAX_COUNT)).contains(&requested) {
            (requested as u32, None)
        } else {
            (
                DEFAULT_COUNT,
                Some(format!(
                    "Provided count of '{requested}' is not allowed. Defaulting to {DEFAULT_COUNT}. \
                     Min: 1, Max: {MAX_COUNT}."
                )),
            )
        };
        let payload_size = bounded_int(
            options,
            "payload_size",
            u64::from(DEFAULT_PAYLOAD_SIZE),
            0,
            MAX_PAYLOAD as u64,
        )? as u16;
        Ok(Self {
            dst,
            count,
            payload_size,
            comment,
        })
    }
}

/// Loss percentage; never negative.
#[must_use]
pub fn packet_loss(sent: u32, received: u32) -> f64 {
    let lost = f64::from(sent) - f64::from(received);
    (100.0 * lost / f64::from(sent)).abs()
}

#[instrument(skip(ctx, opts), fields(dst = %opts.dst, count = opts.count))]
pub async fn run(ctx: &ProbeContext, opts: &PingOptions) -> ScouterResult<PingReport> {
    let dst = ctx.resolver.resolve_ipv4(&opts.dst).await?;
    let iface = route_interface(IpAddr::V4(dst)).await;
    let channel = RawChannel::open(Listen::IcmpOnly, iface.as_deref())?;
    let identifier = rand::random::<u16>();

    let mut replies = Vec::new();
    for seq in 0..opts.count as u16 {
        if seq > 0 {
            tokio::time::sleep(SEND_DELAY).await;
        }
        let payload: Vec<u8> = (0..opts.payload_size).map(|_| rand::random::<u8>()).collect();
        let params = Ipv4Params::new(Ipv4Addr::UNSPECIFIED, dst, DEFAULT_TTL);
        let sent_at = channel.send(&build_icmp_echo(&params, identifier, seq, &payload), dst)?;

        let received = channel
            .recv_matching(RECV_TIMEOUT, |reply| is_echo_reply(reply, dst, identifier, seq))
            .await?;
        match received {
            Some(received) => {
                if let Reply::EchoReply { ttl, total_len, code: 0, .. } = received.reply {
                    let rtt_ms = received.at.duration_since(sent_at).as_secs_f64() * 1000.0;
                    replies.push(PingReply {
                        seq,
                        ttl,
                        len: total_len.saturating_sub(IPV4_HEADER_LEN as u16),
                        rtt_ms,
                    });
                }
            }
            None => debug!(seq, "no echo reply"),
        }
    }

    Ok(summarize(opts, replies))
}

fn is_echo_reply(reply: &Reply, dst: Ipv4Addr, identifier: u16, seq: u16) -> bool {
    matches!(
        reply,
        Reply::EchoReply { src, identifier: id, sequence, .. }
            if *src == dst && *id == identifier && *sequence == seq
    )
}

fn summarize(opts: &PingOptions, replies: Vec<PingReply>) -> PingReport {
    let samples: Vec<f64> = replies.iter().map(|r| r.rtt_ms).collect();
    let received = replies.len() as u32;
    PingReport {
        dst: opts.dst.clone(),
        sent: opts.count,
        recv: Some(received),
        payload_size: opts.payload_size,
        packet_size: opts.payload_size + 28,
        loss: Some(packet_loss(opts.count, received)),
        rtt: RttSummary::from_samples(&samples),
        failed: replies.is_empty(),
        replies,
        comment: opts.comment.clone(),
    }
}
