//! Scouter Common - Shared types and traits
//!
//! This crate provides the data model, error taxonomy, configuration and
//! the component traits used across the Scouter diagnostics service.

pub mod config;
pub mod error;
pub mod report;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::ServiceConfig;
pub use error::{ScouterError, ScouterResult};
pub use report::{
    BrowserReport, DnsAnswerReport, DnsLookupReport, DnsQuestionReport, DnsTraceReport, HarEntry,
    HttpReport, PingReply, PingReport, ProbePayload, RttSummary, TraceHop, TraceProtocol,
    TraceReport,
};
pub use traits::{JobStore, ProbeEngine};
pub use types::{
    batch_size, Batch, JobRecord, ProbeOutcome, ProbeRequest, ProbeType, RawOptions, Receipt,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
