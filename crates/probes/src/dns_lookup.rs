//! Single-question DNS lookup with nameserver fail-over

use crate::context::ProbeContext;
use crate::options::{optional_str, required_str, string_list};
use scouter_common::report::{DnsAnswerReport, DnsLookupReport, DnsQuestionReport};
use scouter_common::{RawOptions, ScouterError, ScouterResult};
use scouter_fabric::dns::{
    class_name, parse_response, rcode_name, record_type_code, record_type_name, DnsQuery,
    DnsResponse, DNS_PORT, TYPE_A,
};
use scouter_fabric::system_nameservers;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, instrument};

pub const DNS_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsLookupOptions {
    pub qname: String,
    /// Nameservers in the order they are tried.
    pub nameservers: Vec<String>,
    pub qtype: u16,
}

impl DnsLookupOptions {
    pub fn parse(options: &RawOptions) -> ScouterResult<Self> {
        let qname = required_str(options, "qname")?;
        let nameservers = nameservers_option(options)?;
        let qtype = match optional_str(options, "rdtype") {
            None => TYPE_A,
            Some(rdtype) => {
                let rdtype = rdtype.to_uppercase();
                record_type_code(&rdtype).ok_or_else(|| {
                    ScouterError::validation(format!(
                        "Provided record type of '{rdtype}' is not a recognized type."
                    ))
                })?
            }
        };
        Ok(Self {
            qname,
            nameservers,
            qtype,
        })
    }
}

/// `ns` as given, or the system nameservers.
pub(crate) fn nameservers_option(options: &RawOptions) -> ScouterResult<Vec<String>> {
    Ok(string_list(options, "ns")?
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| system_nameservers().iter().map(IpAddr::to_string).collect()))
}

/// Where and how long to wait for each nameserver.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Exchange {
    pub port: u16,
    pub timeout: Duration,
}

impl Default for Exchange {
    fn default() -> Self {
        Self {
            port: DNS_PORT,
            timeout: DNS_TIMEOUT,
        }
    }
}

pub async fn run(ctx: &ProbeContext, opts: &DnsLookupOptions) -> ScouterResult<DnsLookupReport> {
    lookup(ctx, opts, Exchange::default()).await
}

#[instrument(skip(ctx, opts, exchange), fields(qname = %opts.qname))]
pub(crate) async fn lookup(
    ctx: &ProbeContext,
    opts: &DnsLookupOptions,
    exchange: Exchange,
) -> ScouterResult<DnsLookupReport> {
    let query = DnsQuery::new(opts.qname.clone(), opts.qtype);
    let wire = query.encode()?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    let started = Instant::now();
    let mut timeout_count = 0;
    for nameserver in &opts.nameservers {
        let ip = ctx.resolver.resolve_forward(nameserver).await?;
        let server = SocketAddr::new(ip, exchange.port);
        if let Err(e) = socket.send_to(&wire, server).await {
            debug!(%server, error = %e, "query could not be sent");
            timeout_count += 1;
            continue;
        }

        match tokio::time::timeout(exchange.timeout, await_response(&socket, server, &query)).await {
            Ok(response) => {
                let response = response?;
                return Ok(report(ip, &response, started.elapsed(), timeout_count));
            }
            Err(_elapsed) => {
                debug!(%server, "nameserver timed out");
                timeout_count += 1;
            }
        }
    }

    Err(ScouterError::NoAnswer(opts.nameservers.clone()))
}

/// First well-formed response from `server` carrying the query's id.
async fn await_response(
    socket: &UdpSocket,
    server: SocketAddr,
    query: &DnsQuery,
) -> ScouterResult<DnsResponse> {
    let mut buf = vec![0u8; 4096];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        if from != server {
            continue;
        }
        match parse_response(&buf[..len]) {
            Ok(response) if response.answers_query(query) => return Ok(response),
            Ok(_) => continue,
            Err(e) => debug!(%server, error = %e, "discarding unparsable response"),
        }
    }
}

fn report(ns: IpAddr, response: &DnsResponse, elapsed: Duration, timeout_count: u32) -> DnsLookupReport {
    let question = response
        .questions
        .first()
        .map(|q| DnsQuestionReport {
            qname: Some(q.name.clone()),
            qtype: Some(record_type_name(q.qtype)),
            qclass: Some(class_name(q.qclass)),
        })
        .unwrap_or_default();
    let answer = response
        .answers
        .iter()
        .map(|rr| DnsAnswerReport {
            rrname: rr.name.clone(),
            rtype: record_type_name(rr.rtype),
            rclass: class_name(rr.rclass),
            ttl: rr.ttl,
            rdlen: rr.rdlen,
            rdata: rr.rdata.clone(),
        })
        .collect();
    DnsLookupReport {
        ns: Some(ns),
        rcode: Some(
            rcode_name(response.rcode).map_or_else(|| response.rcode.to_string(), str::to_string),
        ),
        elapsed_time: elapsed.as_secs_f64(),
        timeout_count,
        question,
        answer,
        failed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::net::Ipv4Addr;

    fn parse(value: Value) -> ScouterResult<DnsLookupOptions> {
        DnsLookupOptions::parse(value.as_object().unwrap())
    }

    /// Answer every query with one A record.
    async fn spawn_server() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let mut reply = buf[..len].to_vec();
                reply[2] |= 0x80;
                reply[7] = 1; // ANCOUNT
                reply.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 192, 0, 2, 1]);
                let _ = socket.send_to(&reply, from).await;
            }
        });
        port
    }

    #[test]
    fn parses_options() {
        let opts = parse(json!({"qname": "example.com", "ns": "1.1.1.1 8.8.8.8", "rdtype": "mx"})).unwrap();
        assert_eq!(opts.nameservers, vec!["1.1.1.1", "8.8.8.8"]);
        assert_eq!(opts.qtype, 15);
        assert!(!parse(json!({"qname": "example.com"})).unwrap().nameservers.is_empty());
    }

    #[test]
    fn unknown_record_type() {
        let err = parse(json!({"qname": "example.com", "rdtype": "bogus"})).unwrap_err();
        assert_eq!(err.to_string(), "Provided record type of 'BOGUS' is not a recognized type.");
    }

    #[tokio::test]
    async fn fails_over_to_first_responder() {
        let port = spawn_server().await;
        let ctx = ProbeContext::new("/nonexistent.mmdb");
        let opts = DnsLookupOptions {
            qname: "example.com".into(),
            nameservers: vec!["127.0.0.2".into(), "127.0.0.1".into()],
            qtype: TYPE_A,
        };
        let exchange = Exchange { port, timeout: Duration::from_millis(300) };
        let report = lookup(&ctx, &opts, exchange).await.unwrap();
        assert_eq!(report.timeout_count, 1);
        assert_eq!(report.ns, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(report.rcode.as_deref(), Some("ok"));
        assert_eq!(report.question.qname.as_deref(), Some("example.com."));
        assert_eq!(report.question.qtype.as_deref(), Some("A"));
        assert_eq!(report.answer.len(), 1);
        assert_eq!(report.answer[0].rdata.as_deref(), Some("192.0.2.1"));
        assert!(!report.failed);
    }

    #[test]
    fn accepts_less_common_types() {
        for (rdtype, code) in [("dname", 39), ("SSHFP", 44), ("loc", 29), ("cds", 59), ("axfr", 252)] {
            let opts = parse(json!({"qname": "example.com", "rdtype": rdtype})).unwrap();
            assert_eq!(opts.qtype, code, "{rdtype}");
        }
    }

    #[tokio::test]
    async fn unsendable_nameserver_counts_as_timeout() {
        let port = spawn_server().await;
        let ctx = ProbeContext::new("/nonexistent.mmdb");
        let opts = DnsLookupOptions {
            qname: "example.com".into(),
            nameservers: vec!["::1".into(), "127.0.0.1".into()],
            qtype: TYPE_A,
        };
        let exchange = Exchange { port, timeout: Duration::from_millis(300) };
        let report = lookup(&ctx, &opts, exchange).await.unwrap();
        assert_eq!(report.ns, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(report.timeout_count, 1);
        assert_eq!(report.answer.len(), 1);
    }

    #[tokio::test]
    async fn no_answer_names_every_nameserver() {
        let ctx = ProbeContext::new("/nonexistent.mmdb");
        let opts = DnsLookupOptions {
            qname: "example.com".into(),
            nameservers: vec!["127.0.0.2".into(), "127.0.0.3".into()],
            qtype: TYPE_A,
        };
        let exchange = Exchange { port: 9, timeout: Duration::from_millis(100) };
        let err = lookup(&ctx, &opts, exchange).await.unwrap_err();
        assert!(matches!(err, ScouterError::NoAnswer(ref list) if list.len() == 2));
        assert!(err.to_string().contains("127.0.0.3"));
    }
}
