//! Traceroute toward a nameserver carrying a real DNS query over UDP.
//!
//! Only the first nameserver is traced.

use crate::context::ProbeContext;
use crate::dns_lookup::nameservers_option;
use crate::options::required_str;
use crate::traceroute::{ephemeral_port, parse_max_ttl, trace_hops};
use scouter_common::report::DnsTraceReport;
use scouter_common::{RawOptions, ScouterError, ScouterResult};
use scouter_fabric::dns::{DnsQuery, DNS_PORT, TYPE_A};
use scouter_fabric::packet::{build_udp, IPV4_HEADER_LEN, UDP_HEADER_LEN};
use scouter_fabric::{route_interface, source_address, Listen, RawChannel, Reply};
use std::net::IpAddr;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsTraceOptions {
    pub qname: String,
    /// First configured or given nameserver, as written.
    pub nameserver: String,
    pub max_ttl: u8,
}

impl DnsTraceOptions {
    pub fn parse(options: &RawOptions) -> ScouterResult<Self> {
        let qname = required_str(options, "qname")?;
        let max_ttl = parse_max_ttl(options)?;
        let nameserver = nameservers_option(options)?
            .into_iter()
            .next()
            .ok_or_else(|| ScouterError::validation("Provided 'ns' does not name a nameserver."))?;
        Ok(Self {
            qname,
            nameserver,
            max_ttl,
        })
    }
}

#[instrument(skip(ctx, opts), fields(qname = %opts.qname, ns = %opts.nameserver))]
pub async fn run(ctx: &ProbeContext, opts: &DnsTraceOptions) -> ScouterResult<DnsTraceReport> {
    let query = DnsQuery::new(opts.qname.clone(), TYPE_A).encode()?;
    let ns = ctx.resolver.resolve_ipv4(&opts.nameserver).await?;
    let iface = route_interface(IpAddr::V4(ns)).await;
    let channel = RawChannel::open(Listen::Udp, iface.as_deref())?;
    let src = source_address(ns).await.ok_or_else(|| {
        ScouterError::transport(format!("Unable to find a local source address toward {ns}."))
    })?;
    let sport = ephemeral_port();

    let trace = trace_hops(
        ctx,
        &channel,
        src,
        ns,
        opts.max_ttl,
        |params| build_udp(params, sport, DNS_PORT, &query),
        |reply, params| match reply {
            Reply::Udp { src, src_port, dst_port, .. } => {
                *src == params.dst && *src_port == DNS_PORT && *dst_port == sport
            }
            other => other.quotes(params),
        },
    )
    .await?;

    Ok(DnsTraceReport {
        qname: opts.qname.clone(),
        proto: "UDP".to_string(),
        dport: DNS_PORT,
        payload_size: query.len() as u16,
        packet_size: (IPV4_HEADER_LEN + UDP_HEADER_LEN + query.len()) as u16,
        ns: opts.nameserver.clone(),
        trace: trace.hops,
        failed: !trace.reached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uses_first_nameserver_only() {
        let raw = json!({"qname": "example.com", "ns": ["9.9.9.9", "1.1.1.1"], "max_ttl": "5"});
        let opts = DnsTraceOptions::parse(raw.as_object().unwrap()).unwrap();
        assert_eq!(opts.nameserver, "9.9.9.9");
        assert_eq!(opts.max_ttl, 5);
    }

    #[test]
    fn requires_qname() {
        let raw = json!({"ns": "9.9.9.9"});
        assert!(DnsTraceOptions::parse(raw.as_object().unwrap()).is_err());
    }

    #[tokio::test]
    async fn sizes_follow_query_length() {
        if !RawChannel::is_available() {
            return;
        }
        let ctx = ProbeContext::new("/nonexistent.mmdb");
        let opts = DnsTraceOptions { qname: "example.com".into(), nameserver: "127.0.0.1".into(), max_ttl: 1 };
        let report = run(&ctx, &opts).await.unwrap();
        // 12 byte header + 13 byte name + 4 bytes type/class
        assert_eq!(report.payload_size, 29);
        assert_eq!(report.packet_size, 57);
        assert_eq!(report.trace.len(), 1);
        assert_eq!(report.proto, "UDP");
    }
}
