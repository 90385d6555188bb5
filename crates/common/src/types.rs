//! Core data types shared by the dispatcher, the probes and the job store.
//!
//! A batch maps each [`ProbeType`] to the raw option objects submitted for
//! it. The dispatcher flattens that into [`ProbeRequest`]s, runs them, and
//! files one [`ProbeOutcome`] per request into the [`JobRecord`] addressed
//! by the batch's [`Receipt`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::report::ProbePayload;

/// Raw, case-insensitive option object for one probe request.
pub type RawOptions = Map<String, Value>;

/// Submitted batch: probe type -> requests of that type, in submission order.
pub type Batch = BTreeMap<ProbeType, Vec<RawOptions>>;

/// The closed set of probe kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeType {
    Ping,
    Traceroute,
    DnsLookup,
    DnsTraceroute,
    HttpRequest,
    BrowserRequest,
}

impl ProbeType {
    pub const ALL: [ProbeType; 6] = [
        ProbeType::Ping,
        ProbeType::Traceroute,
        ProbeType::DnsLookup,
        ProbeType::DnsTraceroute,
        ProbeType::HttpRequest,
        ProbeType::BrowserRequest,
    ];

    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Ping => "ping",
            ProbeType::Traceroute => "traceroute",
            ProbeType::DnsLookup => "dns_lookup",
            ProbeType::DnsTraceroute => "dns_traceroute",
            ProbeType::HttpRequest => "http_request",
            ProbeType::BrowserRequest => "browser_request",
        }
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total number of individual probe requests in a batch.
#[must_use]
pub fn batch_size(batch: &Batch) -> usize {
    batch.values().map(Vec::len).sum()
}

/// Opaque 32-hex-character token addressing one batch's result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Receipt(String);

impl Receipt {
    /// Issue a fresh random receipt.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Receipt {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One flattened probe request with lower-cased option keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub probe_type: ProbeType,
    pub id: String,
    pub options: RawOptions,
}

impl ProbeRequest {
    /// Normalise a raw option object: keys are lower-cased, and the request
    /// id is taken from `id` or generated when absent or empty.
    #[must_use]
    pub fn new(probe_type: ProbeType, options: RawOptions) -> Self {
        let options: RawOptions = options
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect();
        let id = match options.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => random_id(),
        };
        Self {
            probe_type,
            id,
            options,
        }
    }
}

/// Random 6-hex-digit request id.
#[must_use]
pub fn random_id() -> String {
    format!("{:06x}", rand::random::<u32>() & 0x00ff_ffff)
}

/// Result of running one probe request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProbeOutcome {
    pub id: String,
    pub failed: bool,
    pub message: Option<String>,
    pub result: ProbePayload,
}

impl ProbeOutcome {
    /// Outcome for a probe that produced a report.
    #[must_use]
    pub fn completed(id: String, result: ProbePayload) -> Self {
        Self {
            id,
            failed: result.failed(),
            message: None,
            result,
        }
    }

    /// Outcome for a probe that produced nothing.
    #[must_use]
    pub fn errored(id: String, message: impl Into<String>) -> Self {
        Self {
            id,
            failed: true,
            message: Some(message.into()),
            result: ProbePayload::Empty {},
        }
    }
}

/// Stored status of one submitted batch.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobRecord {
    pub receipt: Receipt,
    pub is_running: bool,
    pub results: BTreeMap<ProbeType, Vec<ProbeOutcome>>,
}

impl JobRecord {
    /// Running record with one empty bucket per probe type present.
    #[must_use]
    pub fn running<I>(receipt: Receipt, types: I) -> Self
    where
        I: IntoIterator<Item = ProbeType>,
    {
        Self {
            receipt,
            is_running: true,
            results: types.into_iter().map(|t| (t, Vec::new())).collect(),
        }
    }

    /// Consume the running record into its completed form.
    #[must_use]
    pub fn complete(mut self, results: BTreeMap<ProbeType, Vec<ProbeOutcome>>) -> Self {
        for (probe_type, outcomes) in results {
            self.results.entry(probe_type).or_default().extend(outcomes);
        }
        self.is_running = false;
        self
    }

    #[must_use]
    pub fn outcome_count(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }
}
