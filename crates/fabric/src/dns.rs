//! Minimal DNS wire codec: one-question queries out, full responses in.

use crate::error::FabricError;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use trust_dns_resolver::proto::rr::{DNSClass, RecordType};

pub const DNS_PORT: u16 = 53;
pub const HEADER_LEN: usize = 12;

const FLAG_RD: u16 = 0x0100;
const FLAG_QR: u16 = 0x8000;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 32;

pub const CLASS_IN: u16 = 1;
pub const TYPE_A: u16 = 1;

const CLASS_CS: u16 = 2;

/// IANA type mnemonics without a trust-dns `RecordType` name.
const UNNAMED_TYPES: &[(&str, u16)] = &[
    ("MD", 3),
    ("MF", 4),
    ("MB", 7),
    ("MG", 8),
    ("MR", 9),
    ("WKS", 11),
    ("MINFO", 14),
    ("RP", 17),
    ("AFSDB", 18),
    ("X25", 19),
    ("ISDN", 20),
    ("RT", 21),
    ("NSAP", 22),
    ("NSAP-PTR", 23),
    ("PX", 26),
    ("GPOS", 27),
    ("LOC", 29),
    ("NXT", 30),
    ("EID", 31),
    ("NIMLOC", 32),
    ("ATMA", 34),
    ("KX", 36),
    ("CERT", 37),
    ("A6", 38),
    ("DNAME", 39),
    ("SINK", 40),
    ("OPT", 41),
    ("APL", 42),
    ("IPSECKEY", 45),
    ("DHCID", 49),
    ("SMIMEA", 53),
    ("HIP", 55),
    ("NINFO", 56),
    ("RKEY", 57),
    ("TALINK", 58),
    ("ZONEMD", 63),
    ("SPF", 99),
    ("UINFO", 100),
    ("UID", 101),
    ("GID", 102),
    ("UNSPEC", 103),
    ("NID", 104),
    ("L32", 105),
    ("L64", 106),
    ("LP", 107),
    ("EUI48", 108),
    ("EUI64", 109),
    ("TKEY", 249),
    ("IXFR", 251),
    ("MAILB", 253),
    ("MAILA", 254),
    ("URI", 256),
    ("AVC", 258),
    ("DOA", 259),
    ("AMTRELAY", 260),
    ("TA", 32768),
    ("DLV", 32769),
];

/// Type code for a case-insensitive mnemonic such as `aaaa`, or the
/// generic `TYPE<n>` form.
#[must_use]
pub fn record_type_code(name: &str) -> Option<u16> {
    let name = name.trim().to_ascii_uppercase();
    if let Ok(rtype) = RecordType::from_str(&name) {
        return Some(u16::from(rtype));
    }
    UNNAMED_TYPES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
        .or_else(|| {
            name.strip_prefix("TYPE")
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|digits| digits.parse().ok())
        })
}

#[must_use]
pub fn record_type_name(code: u16) -> String {
    match RecordType::from(code) {
        RecordType::Unknown(code) => UNNAMED_TYPES
            .iter()
            .find(|(_, c)| *c == code)
            .map_or_else(|| format!("TYPE{code}"), |(n, _)| (*n).to_string()),
        known => known.to_string(),
    }
}

#[must_use]
pub fn class_name(code: u16) -> String {
    match DNSClass::from_u16(code) {
        Ok(class) => class.to_string(),
        Err(_) if code == CLASS_CS => "CS".to_string(),
        Err(_) => format!("CLASS{code}"),
    }
}

/// Response code names; codes past `refused` are not named.
#[must_use]
pub const fn rcode_name(rcode: u8) -> Option<&'static str> {
    match rcode {
        0 => Some("ok"),
        1 => Some("format-error"),
        2 => Some("server-failure"),
        3 => Some("name-error"),
        4 => Some("not-implemented"),
        5 => Some("refused"),
        _ => None,
    }
}

/// A recursive query for a single question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub id: u16,
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuery {
    /// Class IN query with a random transaction id.
    #[must_use]
    pub fn new(qname: impl Into<String>, qtype: u16) -> Self {
        Self {
            id: rand::random::<u16>(),
            qname: qname.into(),
            qtype,
            qclass: CLASS_IN,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FabricError> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.qname.len() + 6);
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&FLAG_RD.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
        buf.extend_from_slice(&[0u8; 6]); // AN/NS/AR counts
        encode_name(&self.qname, &mut buf)?;
        buf.extend_from_slice(&self.qtype.to_be_bytes());
        buf.extend_from_slice(&self.qclass.to_be_bytes());
        Ok(buf)
    }
}

fn encode_name(name: &str, buf: &mut Vec<u8>) -> Result<(), FabricError> {
    let trimmed = name.trim_end_matches('.');
    let start = buf.len();
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(FabricError::Malformed(format!("invalid label in name '{name}'")));
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }
    buf.push(0);
    if buf.len() - start > MAX_NAME_LEN {
        return Err(FabricError::Malformed(format!("name '{name}' is too long")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdlen: u16,
    /// Text rendering; `None` for types without one.
    pub rdata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsResponse {
    pub id: u16,
    pub rcode: u8,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
}

impl DnsResponse {
    #[must_use]
    pub fn answers_query(&self, query: &DnsQuery) -> bool {
        self.id == query.id
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FabricError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| FabricError::Malformed("truncated DNS message".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, FabricError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FabricError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn name(&mut self) -> Result<String, FabricError> {
        let (name, next) = read_name(self.buf, self.pos)?;
        self.pos = next;
        Ok(name)
    }
}

/// Read a possibly compressed name at `offset`. Returns the dotted name
/// (with trailing dot) and the offset just past it in the original stream.
fn read_name(buf: &[u8], offset: usize) -> Result<(String, usize), FabricError> {
    let malformed = || FabricError::Malformed("bad name in DNS message".into());
    let mut name = String::new();
    let mut pos = offset;
    let mut resume = None;
    let mut jumps = 0;

    loop {
        let len = *buf.get(pos).ok_or_else(malformed)? as usize;
        match len & 0xC0 {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let label = buf.get(pos + 1..pos + 1 + len).ok_or_else(malformed)?;
                name.push_str(&String::from_utf8_lossy(label));
                name.push('.');
                if name.len() > MAX_NAME_LEN {
                    return Err(malformed());
                }
                pos += 1 + len;
            }
            0xC0 => {
                let low = *buf.get(pos + 1).ok_or_else(malformed)? as usize;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(malformed());
                }
                resume.get_or_insert(pos + 2);
                pos = ((len & 0x3F) << 8) | low;
            }
            _ => return Err(malformed()),
        }
    }

    if name.is_empty() {
        name.push('.');
    }
    Ok((name, resume.unwrap_or(pos)))
}

/// Parse a response message. Authority and additional sections are skipped.
pub fn parse_response(buf: &[u8]) -> Result<DnsResponse, FabricError> {
    let mut reader = Reader { buf, pos: 0 };
    let id = reader.u16()?;
    let flags = reader.u16()?;
    if flags & FLAG_QR == 0 {
        return Err(FabricError::Malformed("DNS message is not a response".into()));
    }
    let qdcount = reader.u16()?;
    let ancount = reader.u16()?;
    reader.take(4)?; // NSCOUNT, ARCOUNT

    let mut questions = Vec::with_capacity(qdcount as usize);
    for _ in 0..qdcount {
        questions.push(Question {
            name: reader.name()?,
            qtype: reader.u16()?,
            qclass: reader.u16()?,
        });
    }

    let mut answers = Vec::with_capacity(ancount as usize);
    for _ in 0..ancount {
        let name = reader.name()?;
        let rtype = reader.u16()?;
        let rclass = reader.u16()?;
        let ttl = reader.u32()?;
        let rdlen = reader.u16()?;
        let rdata_offset = reader.pos;
        let raw = reader.take(rdlen as usize)?;
        answers.push(ResourceRecord {
            name,
            rtype,
            rclass,
            ttl,
            rdlen,
            rdata: decode_rdata(buf, rtype, rdata_offset, raw),
        });
    }

    Ok(DnsResponse {
        id,
        rcode: (flags & 0x000F) as u8,
        questions,
        answers,
    })
}

fn decode_rdata(message: &[u8], rtype: u16, offset: usize, raw: &[u8]) -> Option<String> {
    match rtype {
        1 => <[u8; 4]>::try_from(raw).ok().map(|o| Ipv4Addr::from(o).to_string()),
        28 => <[u8; 16]>::try_from(raw).ok().map(|o| Ipv6Addr::from(o).to_string()),
        // NS, CNAME, PTR
        2 | 5 | 12 => read_name(message, offset).ok().map(|(name, _)| name),
        15 => {
            let preference = u16::from_be_bytes([*raw.first()?, *raw.get(1)?]);
            let (exchange, _) = read_name(message, offset + 2).ok()?;
            Some(format!("{preference} {exchange}"))
        }
        16 => decode_txt(raw),
        _ => None,
    }
}

fn decode_txt(raw: &[u8]) -> Option<String> {
    let mut text = String::new();
    let mut pos = 0;
    while pos < raw.len() {
        let len = raw[pos] as usize;
        let chunk = raw.get(pos + 1..pos + 1 + len)?;
        text.push_str(std::str::from_utf8(chunk).ok()?);
        pos += 1 + len;
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_for(query: &DnsQuery, rcode: u8, answers: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut wire = query.encode().unwrap();
        wire[2] = 0x81; // QR + RD
        wire[3] = 0x80 | rcode; // RA + rcode
        wire[6..8].copy_from_slice(&(answers.len() as u16).to_be_bytes());
        for (rtype, rdata) in answers {
            wire.extend_from_slice(&[0xC0, 0x0C]); // pointer to the question name
            wire.extend_from_slice(&rtype.to_be_bytes());
            wire.extend_from_slice(&CLASS_IN.to_be_bytes());
            wire.extend_from_slice(&300u32.to_be_bytes());
            wire.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            wire.extend_from_slice(rdata);
        }
        wire
    }

    #[test]
    fn encodes_query() {
        let query = DnsQuery { id: 0xabcd, qname: "example.com".into(), qtype: TYPE_A, qclass: CLASS_IN };
        let wire = query.encode().unwrap();
        assert_eq!(&wire[..4], &[0xab, 0xcd, 0x01, 0x00]);
        assert_eq!(&wire[12..25], b"\x07example\x03com\x00");
        assert_eq!(&wire[25..], &[0, 1, 0, 1]);
    }

    #[test]
    fn rejects_oversized_label() {
        let query = DnsQuery::new(format!("{}.com", "a".repeat(64)), TYPE_A);
        assert!(query.encode().is_err());
        assert!(DnsQuery::new("a..com", TYPE_A).encode().is_err());
    }

    #[test]
    fn parses_compressed_answers() {
        let query = DnsQuery::new("example.com", TYPE_A);
        let mut mx = vec![0, 10];
        mx.extend_from_slice(&[0xC0, 0x0C]);
        let wire = response_for(
            &query,
            0,
            &[(1, vec![93, 184, 216, 34]), (15, mx), (16, b"\x05hello\x06 world".to_vec())],
        );
        let response = parse_response(&wire).unwrap();
        assert!(response.answers_query(&query));
        assert_eq!(response.rcode, 0);
        assert_eq!(response.questions[0].name, "example.com.");
        assert_eq!(response.answers.len(), 3);
        assert_eq!(response.answers[0].name, "example.com.");
        assert_eq!(response.answers[0].rdata.as_deref(), Some("93.184.216.34"));
        assert_eq!(response.answers[0].rdlen, 4);
        assert_eq!(response.answers[1].rdata.as_deref(), Some("10 example.com."));
        assert_eq!(response.answers[2].rdata.as_deref(), Some("hello world"));
    }

    #[test]
    fn binary_record_has_null_rdata() {
        let query = DnsQuery::new("example.com", 6);
        let wire = response_for(&query, 0, &[(6, vec![0xC0, 0x0C, 0, 1, 2, 3])]);
        let response = parse_response(&wire).unwrap();
        assert_eq!(response.answers[0].rdata, None);
        assert_eq!(record_type_name(response.answers[0].rtype), "SOA");
    }

    #[test]
    fn rcode_and_tables() {
        let query = DnsQuery::new("missing.example", TYPE_A);
        let response = parse_response(&response_for(&query, 3, &[])).unwrap();
        assert_eq!(rcode_name(response.rcode), Some("name-error"));
        assert_eq!(record_type_code("aaaa"), Some(28));
        assert_eq!(record_type_code("bogus"), None);
        assert_eq!(record_type_name(4242), "TYPE4242");
        assert_eq!(class_name(1), "IN");
        assert_eq!(class_name(2), "CS");
        assert_eq!(class_name(3), "CH");
        assert_eq!(class_name(77), "CLASS77");
    }

    #[test]
    fn full_type_registry() {
        let cases = [
            ("dname", 39),
            ("SSHFP", 44),
            ("loc", 29),
            ("NULL", 10),
            ("cds", 59),
            ("OPT", 41),
            ("axfr", 252),
            ("ixfr", 251),
            ("spf", 99),
            ("uri", 256),
            ("*", 255),
            ("type65280", 65280),
        ];
        for (name, code) in cases {
            assert_eq!(record_type_code(name), Some(code), "{name}");
        }
        assert_eq!(record_type_code("TYPE"), None);
        assert_eq!(record_type_code("TYPE+1"), None);

        assert_eq!(record_type_name(39), "DNAME");
        assert_eq!(record_type_name(29), "LOC");
        assert_eq!(record_type_name(41), "OPT");
        assert_eq!(record_type_name(44), "SSHFP");
        assert_eq!(record_type_name(59), "CDS");
        assert_eq!(record_type_name(252), "AXFR");
        assert_eq!(record_type_name(257), "CAA");
    }

    #[test]
    fn dname_answer_is_named() {
        let query = DnsQuery::new("example.com", 39);
        let wire = response_for(&query, 0, &[(39, vec![0xC0, 0x0C])]);
        let response = parse_response(&wire).unwrap();
        assert_eq!(record_type_name(response.questions[0].qtype), "DNAME");
        assert_eq!(record_type_name(response.answers[0].rtype), "DNAME");
        assert_eq!(response.answers[0].rdlen, 2);
    }

    #[test]
    fn pointer_loop_is_rejected() {
        let mut wire = vec![0, 1, 0x81, 0x80, 0, 1, 0, 0, 0, 0, 0, 0];
        wire.extend_from_slice(&[0xC0, 12, 0, 1, 0, 1]);
        assert!(parse_response(&wire).is_err());
    }

    #[test]
    fn query_is_not_a_response() {
        let wire = DnsQuery::new("example.com", TYPE_A).encode().unwrap();
        assert!(parse_response(&wire).is_err());
    }
}
