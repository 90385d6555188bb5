//! Typed probe dispatch
//!
//! Raw option objects are parsed into a [`ProbeSpec`] before anything touches
//! the network, so option errors never cost a packet.

use crate::browser::{self, BrowserOptions};
use crate::context::ProbeContext;
use crate::dns_lookup::{self, DnsLookupOptions};
use crate::dns_traceroute::{self, DnsTraceOptions};
use crate::http::{self, HttpOptions};
use crate::ping::{self, PingOptions};
use crate::traceroute::{self, TraceOptions};
use async_trait::async_trait;
use scouter_common::report::ProbePayload;
use scouter_common::{ProbeEngine, ProbeType, RawOptions, ScouterResult};
use tracing::debug;

/// A fully validated probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSpec {
    Ping(PingOptions),
    Traceroute(TraceOptions),
    DnsLookup(DnsLookupOptions),
    DnsTraceroute(DnsTraceOptions),
    HttpRequest(HttpOptions),
    BrowserRequest(BrowserOptions),
}

impl ProbeSpec {
    pub fn parse(probe_type: ProbeType, options: &RawOptions) -> ScouterResult<Self> {
        Ok(match probe_type {
            ProbeType::Ping => ProbeSpec::Ping(PingOptions::parse(options)?),
            ProbeType::Traceroute => ProbeSpec::Traceroute(TraceOptions::parse(options)?),
            ProbeType::DnsLookup => ProbeSpec::DnsLookup(DnsLookupOptions::parse(options)?),
            ProbeType::DnsTraceroute => ProbeSpec::DnsTraceroute(DnsTraceOptions::parse(options)?),
            ProbeType::HttpRequest => ProbeSpec::HttpRequest(HttpOptions::parse(options)?),
            ProbeType::BrowserRequest => ProbeSpec::BrowserRequest(BrowserOptions::parse(options)?),
        })
    }

    #[must_use]
    pub const fn probe_type(&self) -> ProbeType {
        match self {
            ProbeSpec::Ping(_) => ProbeType::Ping,
            ProbeSpec::Traceroute(_) => ProbeType::Traceroute,
            ProbeSpec::DnsLookup(_) => ProbeType::DnsLookup,
            ProbeSpec::DnsTraceroute(_) => ProbeType::DnsTraceroute,
            ProbeSpec::HttpRequest(_) => ProbeType::HttpRequest,
            ProbeSpec::BrowserRequest(_) => ProbeType::BrowserRequest,
        }
    }

    pub async fn run(&self, ctx: &ProbeContext) -> ScouterResult<ProbePayload> {
        Ok(match self {
            ProbeSpec::Ping(opts) => ProbePayload::Ping(ping::run(ctx, opts).await?),
            ProbeSpec::Traceroute(opts) => ProbePayload::Trace(traceroute::run(ctx, opts).await?),
            ProbeSpec::DnsLookup(opts) => {
                ProbePayload::DnsLookup(dns_lookup::run(ctx, opts).await?)
            }
            ProbeSpec::DnsTraceroute(opts) => {
                ProbePayload::DnsTrace(dns_traceroute::run(ctx, opts).await?)
            }
            ProbeSpec::HttpRequest(opts) => ProbePayload::Http(http::run(ctx, opts).await?),
            ProbeSpec::BrowserRequest(opts) => {
                debug!(driver = ctx.browser.name(), "delegating browser probe");
                ProbePayload::Browser(browser::run(ctx.browser.as_ref(), opts).await?)
            }
        })
    }
}

/// Engine running probes natively over the packet fabric.
pub struct NativeEngine {
    ctx: ProbeContext,
}

impl NativeEngine {
    #[must_use]
    pub fn new(ctx: ProbeContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ProbeEngine for NativeEngine {
    async fn execute(
        &self,
        probe_type: ProbeType,
        options: RawOptions,
    ) -> ScouterResult<ProbePayload> {
        let spec = ProbeSpec::parse(probe_type, &options)?;
        spec.run(&self.ctx).await
    }

    fn name(&self) -> &str {
        "native"
    }
}
