//! HTTP HEAD/GET timing probe

use crate::context::ProbeContext;
use crate::options::{bool_option, headers_option, optional_str, required_str};
use crate::timing::{perform, HttpMethod, HttpVersion, TimedRequest, TimedResponse, TransferError};
use hyper::header::{HeaderName, HeaderValue};
use scouter_common::report::{three_decimals, HttpReport};
use scouter_common::{RawOptions, ScouterError, ScouterResult};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    pub request: TimedRequest,
    /// Set when an unsupported method was replaced by HEAD.
    pub comment: Option<String>,
}

impl HttpOptions {
    pub fn parse(options: &RawOptions) -> ScouterResult<Self> {
        let url = required_str(options, "url")?;
        let requested = optional_str(options, "method")
            .map(|m| m.to_uppercase())
            .unwrap_or_else(|| "HEAD".to_string());
        let (method, comment) = match requested.as_str() {
            "GET" => (HttpMethod::Get, None),
            "HEAD" => (HttpMethod::Head, None),
            other => (
                HttpMethod::Head,
                Some(format!("Provided HTTP method of '{other}' is not supported. Using HEAD.")),
            ),
        };
        let headers = headers_option(options)?;
        for (name, value) in &headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ScouterError::validation(format!("Provided header name '{name}' is not valid.")))?;
            HeaderValue::from_str(value).map_err(|_| {
                ScouterError::validation(format!("Provided value for header '{name}' is not valid."))
            })?;
        }
        Ok(Self {
            request: TimedRequest {
                url,
                method,
                version: HttpVersion::from_option(optional_str(options, "version").as_deref()),
                resolve: optional_str(options, "resolve").and_then(|r| r.trim().parse::<Ipv4Addr>().ok()),
                headers,
                ignore_ssl: bool_option(options, "ignore_ssl"),
            },
            comment,
        })
    }
}

#[instrument(skip(ctx, opts), fields(url = %opts.request.url, method = opts.request.method.as_str()))]
pub async fn run(ctx: &ProbeContext, opts: &HttpOptions) -> ScouterResult<HttpReport> {
    Ok(match perform(&opts.request, &ctx.resolver).await {
        Ok(response) => succeeded(opts, response),
        Err(error) => transfer_failed(opts, error),
    })
}

fn blank_report(opts: &HttpOptions) -> HttpReport {
    HttpReport {
        url: opts.request.url.clone(),
        status: 0,
        reason: None,
        version: None,
        method: opts.request.method.as_str().to_string(),
        headers: BTreeMap::new(),
        time_namelookup: None,
        time_connect: None,
        time_appconnect: None,
        time_starttransfer: None,
        time_total: None,
        speed_download: None,
        comment: opts.comment.clone(),
        failed: true,
    }
}

fn succeeded(opts: &HttpOptions, response: TimedResponse) -> HttpReport {
    let speed = response.speed_download();
    let t = response.timings;
    HttpReport {
        status: u32::from(response.status),
        reason: response.reason,
        version: Some(response.version),
        headers: response.headers,
        time_namelookup: Some(three_decimals(t.namelookup.as_secs_f64())),
        time_connect: Some(three_decimals(t.connect.as_secs_f64())),
        time_appconnect: Some(three_decimals(t.appconnect.as_secs_f64())),
        time_starttransfer: Some(three_decimals(t.starttransfer.as_secs_f64())),
        time_total: Some(three_decimals(t.total.as_secs_f64())),
        speed_download: Some(speed),
        failed: false,
        ..blank_report(opts)
    }
}

fn transfer_failed(opts: &HttpOptions, error: TransferError) -> HttpReport {
    HttpReport {
        status: error.code,
        reason: Some(error.message),
        ..blank_report(opts)
    }
}
