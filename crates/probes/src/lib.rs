//! Scouter probes
//!
//! Ping, traceroute (ICMP/TCP), DNS lookup, DNS traceroute, HTTP timing and
//! the browser probe contract. [`NativeEngine`] is the `ProbeEngine` the
//! dispatcher runs them through.

pub mod browser;
pub mod context;
pub mod dns_lookup;
pub mod dns_traceroute;
pub mod engine;
pub mod http;
mod options;
pub mod ping;
pub mod timing;
pub mod traceroute;

pub use browser::{BrowserDriver, BrowserKind, HarCapture, RawHarEntry, UnconfiguredDriver};
pub use context::ProbeContext;
pub use engine::{NativeEngine, ProbeSpec};
