//! Packet fabric for Scouter probes
//!
//! Wire builders and parsers for IPv4/ICMP/TCP/UDP and DNS, the raw socket
//! channel the TTL-bounded probes run over, and the resolution helpers
//! (forward/reverse names, egress route, ASN) they enrich results with.

pub mod asn;
pub mod channel;
pub mod dns;
pub mod error;
pub mod packet;
pub mod resolve;
pub mod route;

pub use asn::AsnDatabase;
pub use channel::{Listen, RawChannel, Received};
pub use error::FabricError;
pub use packet::{Ipv4Params, Reply};
pub use resolve::{system_nameservers, Resolver, FALLBACK_NAMESERVER};
pub use route::{parse_route_dev, route_interface, source_address};
