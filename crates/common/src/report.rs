//! Probe result payloads, one report type per probe kind.
//!
//! Field names are part of the public wire format.

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Format a float with three decimal places, the precision used for every
/// reported timing.
#[inline]
#[must_use]
pub fn three_decimals(value: f64) -> String {
    format!("{value:.3}")
}

/// Result payload of a probe. Serialised without a tag; the empty variant
/// renders as `{}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ProbePayload {
    Ping(PingReport),
    Trace(TraceReport),
    DnsLookup(DnsLookupReport),
    DnsTrace(DnsTraceReport),
    Http(HttpReport),
    Browser(BrowserReport),
    Empty {},
}

impl ProbePayload {
    /// Whether the report describes a failed probe. An empty payload is
    /// always a failure.
    #[must_use]
    pub fn failed(&self) -> bool {
        match self {
            ProbePayload::Ping(r) => r.failed,
            ProbePayload::Trace(r) => r.failed,
            ProbePayload::DnsLookup(r) => r.failed,
            ProbePayload::DnsTrace(r) => r.failed,
            ProbePayload::Http(r) => r.failed,
            ProbePayload::Browser(r) => r.failed,
            ProbePayload::Empty {} => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RttSummary {
    pub min: Option<String>,
    pub max: Option<String>,
    pub avg: Option<String>,
}

impl RttSummary {
    /// Summarise round-trip times; all fields stay null without samples.
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        Self {
            min: Some(three_decimals(min)),
            max: Some(three_decimals(max)),
            avg: Some(three_decimals(avg)),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PingReply {
    pub seq: u16,
    pub ttl: u8,
    /// Bytes received minus the IP header.
    pub len: u16,
    pub rtt_ms: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PingReport {
    pub dst: String,
    pub sent: u32,
    pub recv: Option<u32>,
    pub payload_size: u16,
    pub packet_size: u16,
    pub loss: Option<f64>,
    pub rtt: RttSummary,
    pub replies: Vec<PingReply>,
    pub comment: Option<String>,
    pub failed: bool,
}

/// One TTL-indexed traceroute observation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceHop {
    pub asn: Option<u32>,
    pub ttl: u8,
    pub src: Option<IpAddr>,
    pub hostname: Option<String>,
    pub rtt_ms: Option<f64>,
    pub no_response: bool,
}

impl TraceHop {
    /// Hop with no (usable) reply.
    #[must_use]
    pub const fn silent(ttl: u8) -> Self {
        Self {
            asn: None,
            ttl,
            src: None,
            hostname: None,
            rtt_ms: None,
            no_response: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TraceProtocol {
    Icmp,
    Tcp,
}

impl TraceProtocol {
    /// Header bytes added to the payload for the reported packet size.
    #[inline]
    #[must_use]
    pub const fn header_overhead(&self) -> u16 {
        match self {
            TraceProtocol::Icmp => 28,
            TraceProtocol::Tcp => 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceReport {
    pub dst: String,
    pub proto: TraceProtocol,
    pub dport: u16,
    pub payload_size: u16,
    pub packet_size: u16,
    pub trace: Vec<TraceHop>,
    pub comment: Option<String>,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DnsTraceReport {
    pub qname: String,
    pub proto: String,
    pub dport: u16,
    pub payload_size: u16,
    pub packet_size: u16,
    pub ns: String,
    pub trace: Vec<TraceHop>,
    pub failed: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DnsQuestionReport {
    pub qname: Option<String>,
    pub qtype: Option<String>,
    pub qclass: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DnsAnswerReport {
    pub rrname: String,
    #[serde(rename = "type")]
    pub rtype: String,
    pub rclass: String,
    pub ttl: u32,
    pub rdlen: u16,
    pub rdata: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DnsLookupReport {
    pub ns: Option<IpAddr>,
    pub rcode: Option<String>,
    /// Seconds spent across all attempted nameservers.
    pub elapsed_time: f64,
    pub timeout_count: u32,
    pub question: DnsQuestionReport,
    pub answer: Vec<DnsAnswerReport>,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HttpReport {
    pub url: String,
    /// HTTP status code, or the curl-equivalent error code on transport failure.
    pub status: u32,
    pub reason: Option<String>,
    pub version: Option<String>,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub time_namelookup: Option<String>,
    pub time_connect: Option<String>,
    pub time_appconnect: Option<String>,
    pub time_starttransfer: Option<String>,
    pub time_total: Option<String>,
    /// Bits per second.
    pub speed_download: Option<f64>,
    pub comment: Option<String>,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HarEntry {
    pub url: String,
    pub failed: bool,
    pub status: i64,
    pub reason: Option<String>,
    pub version: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub time_namelookup: f64,
    pub time_connect: f64,
    pub time_appconnect: f64,
    pub time_starttransfer: f64,
    pub time_total: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BrowserReport {
    pub driver: String,
    pub failed: bool,
    pub parent: Option<HarEntry>,
    pub child: Vec<HarEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rtt_summary_uses_three_decimals() {
        let summary = RttSummary::from_samples(&[1.0, 2.5, 3.25]);
        assert_eq!(summary.min.as_deref(), Some("1.000"));
        assert_eq!(summary.max.as_deref(), Some("3.250"));
        assert_eq!(summary.avg.as_deref(), Some("2.250"));
        assert_eq!(RttSummary::from_samples(&[]), RttSummary::default());
    }

    #[test]
    fn empty_payload_is_failure_and_renders_as_object() {
        let payload = ProbePayload::Empty {};
        assert!(payload.failed());
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({}));
    }

    #[test]
    fn trace_report_wire_format() {
        let report = TraceReport {
            dst: "example.com".into(),
            proto: TraceProtocol::Tcp,
            dport: 443,
            payload_size: 56,
            packet_size: 56 + TraceProtocol::Tcp.header_overhead(),
            trace: vec![TraceHop::silent(1)],
            comment: None,
            failed: true,
        };
        let value = serde_json::to_value(ProbePayload::Trace(report)).unwrap();
        assert_eq!(value["proto"], json!("TCP"));
        assert_eq!(value["packet_size"], json!(96));
        assert_eq!(value["trace"][0]["no_response"], json!(true));
        assert_eq!(value["trace"][0]["src"], json!(null));
    }

    #[test]
    fn dns_answer_type_field_name() {
        let answer = DnsAnswerReport {
            rrname: "example.com.".into(),
            rtype: "A".into(),
            rclass: "IN".into(),
            ttl: 300,
            rdlen: 4,
            rdata: Some("93.184.216.34".into()),
        };
        let value = serde_json::to_value(answer).unwrap();
        assert_eq!(value["type"], json!("A"));
    }
}
