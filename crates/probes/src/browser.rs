//! Browser-driven page load probe
//!
//! Launching a browser and capturing its traffic is delegated to a
//! [`BrowserDriver`] backend. This module owns option handling and turns
//! the captured HAR entries into the report format.

use crate::options::{headers_option, optional_str, required_str};
use anyhow::Result;
use async_trait::async_trait;
use scouter_common::report::{BrowserReport, HarEntry};
use scouter_common::{RawOptions, ScouterError, ScouterResult};
use std::collections::BTreeMap;
use std::fmt;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Chrome,
    Firefox,
}

impl BrowserKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request captured by the proxy, in HAR terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHarEntry {
    pub url: String,
    pub status: i64,
    pub status_text: String,
    pub http_version: String,
    /// Proxy-side failure text, if the request never completed.
    pub error: Option<String>,
    pub headers: Vec<(String, String)>,
    pub dns: f64,
    pub connect: f64,
    pub ssl: f64,
    pub wait: f64,
    /// Total entry time.
    pub time: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarCapture {
    /// URL the browser ended up on, when the driver could report it.
    pub final_url: Option<String>,
    pub entries: Vec<RawHarEntry>,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load `url` in `browser` with `headers` injected and return the
    /// captured traffic.
    async fn capture(
        &self,
        url: &str,
        browser: BrowserKind,
        headers: &[(String, String)],
    ) -> Result<HarCapture>;

    fn name(&self) -> &str;
}

/// Driver used when no automation backend has been wired in.
pub struct UnconfiguredDriver;

#[async_trait]
impl BrowserDriver for UnconfiguredDriver {
    async fn capture(
        &self,
        _url: &str,
        _browser: BrowserKind,
        _headers: &[(String, String)],
    ) -> Result<HarCapture> {
        anyhow::bail!("No browser automation backend is configured.")
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserOptions {
    pub url: String,
    pub browser: BrowserKind,
    pub headers: Vec<(String, String)>,
}

impl BrowserOptions {
    pub fn parse(options: &RawOptions) -> ScouterResult<Self> {
        let url = required_str(options, "url")?;
        let driver = optional_str(options, "driver")
            .map(|d| d.to_lowercase())
            .unwrap_or_else(|| "chrome".to_string());
        let browser = match driver.as_str() {
            "chrome" => BrowserKind::Chrome,
            "firefox" => BrowserKind::Firefox,
            other => {
                return Err(ScouterError::validation(format!(
                    "Provided driver of '{other}' is not supported."
                )))
            }
        };
        Ok(Self {
            url,
            browser,
            headers: headers_option(options)?,
        })
    }
}

#[instrument(skip(driver, opts), fields(url = %opts.url, browser = %opts.browser))]
pub async fn run(driver: &dyn BrowserDriver, opts: &BrowserOptions) -> ScouterResult<BrowserReport> {
    let capture = driver
        .capture(&opts.url, opts.browser, &opts.headers)
        .await
        .map_err(|e| {
            ScouterError::transport(format!(
                "Provided webpage of '{}' failed to load due to the following reason: {e}",
                opts.url
            ))
        })?;
    Ok(assemble(opts.browser, capture))
}

/// Split formatted entries into the final-page parent and its children.
fn assemble(browser: BrowserKind, capture: HarCapture) -> BrowserReport {
    let mut parent = None;
    let mut child = Vec::new();
    for raw in capture.entries {
        let entry = format_entry(raw);
        if capture.final_url.as_deref() == Some(entry.url.as_str()) {
            parent = Some(entry);
        } else {
            child.push(entry);
        }
    }
    BrowserReport {
        driver: browser.as_str().to_string(),
        failed: parent.is_none(),
        parent,
        child,
    }
}

/// curl-equivalent status for a proxy error string.
#[must_use]
pub fn error_status(reason: &str) -> Option<i64> {
    const CODES: [(&str, i64); 4] = [
        ("Unable to resolve host", 6),
        ("Unable to connect to host", 7),
        ("Response timed out", 28),
        ("No response received", 52),
    ];
    CODES
        .iter()
        .find(|(needle, _)| reason.contains(needle))
        .map(|(_, code)| *code)
}

#[must_use]
pub fn format_entry(raw: RawHarEntry) -> HarEntry {
    let (failed, status, reason) = match raw.error {
        Some(error) => (true, error_status(&error).unwrap_or(raw.status), error),
        None => (false, raw.status, raw.status_text),
    };
    let headers: BTreeMap<String, String> = raw
        .headers
        .into_iter()
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect();
    HarEntry {
        url: raw.url,
        failed,
        status,
        reason: Some(reason),
        version: Some(raw.http_version),
        headers,
        time_namelookup: non_negative(raw.dns),
        time_connect: non_negative(raw.connect),
        time_appconnect: non_negative(raw.ssl),
        time_starttransfer: non_negative(raw.wait),
        time_total: raw.time,
    }
}

/// HAR uses -1 for phases that did not happen.
#[inline]
fn non_negative(value: f64) -> f64 {
    if value < 0.0 {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CannedDriver(HarCapture);

    #[async_trait]
    impl BrowserDriver for CannedDriver {
        async fn capture(&self, _: &str, _: BrowserKind, _: &[(String, String)]) -> Result<HarCapture> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn entry(url: &str) -> RawHarEntry {
        RawHarEntry {
            url: url.into(),
            status: 200,
            status_text: "OK".into(),
            http_version: "HTTP/1.1".into(),
            headers: vec![("Content-Type".into(), "text/html".into())],
            dns: -1.0,
            connect: 4.0,
            ssl: -1.0,
            wait: 20.0,
            time: 30.0,
            ..RawHarEntry::default()
        }
    }

    #[test]
    fn unsupported_driver() {
        let raw = json!({"url": "https://example.com", "driver": "Safari"});
        let err = BrowserOptions::parse(raw.as_object().unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "Provided driver of 'safari' is not supported.");
    }

    #[test]
    fn formats_entries() {
        let formatted = format_entry(entry("https://example.com/"));
        assert!(!formatted.failed);
        assert_eq!(formatted.headers.get("content-type").map(String::as_str), Some("text/html"));
        assert_eq!(formatted.time_namelookup, 0.0);
        assert_eq!(formatted.time_connect, 4.0);
        assert_eq!(formatted.time_total, 30.0);

        let mut broken = entry("https://cdn.example.com/");
        broken.status = 0;
        broken.error = Some("Unable to resolve host cdn.example.com".into());
        let formatted = format_entry(broken);
        assert!(formatted.failed);
        assert_eq!(formatted.status, 6);
        assert_eq!(formatted.reason.as_deref(), Some("Unable to resolve host cdn.example.com"));
        assert_eq!(error_status("No response received"), Some(52));
        assert_eq!(error_status("something else"), None);
    }

    #[tokio::test]
    async fn splits_parent_and_children() {
        let driver = CannedDriver(HarCapture {
            final_url: Some("https://example.com/".into()),
            entries: vec![entry("https://example.com/"), entry("https://example.com/app.js")],
        });
        let opts = BrowserOptions { url: "example.com".into(), browser: BrowserKind::Firefox, headers: vec![] };
        let report = run(&driver, &opts).await.unwrap();
        assert!(!report.failed);
        assert_eq!(report.driver, "firefox");
        assert_eq!(report.parent.unwrap().url, "https://example.com/");
        assert_eq!(report.child.len(), 1);
    }

    #[tokio::test]
    async fn missing_parent_is_failure() {
        let driver = CannedDriver(HarCapture { final_url: None, entries: vec![entry("https://a/")] });
        let opts = BrowserOptions { url: "a".into(), browser: BrowserKind::Chrome, headers: vec![] };
        let report = run(&driver, &opts).await.unwrap();
        assert!(report.failed);
        assert!(report.parent.is_none());
    }

    #[tokio::test]
    async fn unconfigured_backend_errors() {
        let opts = BrowserOptions { url: "https://example.com".into(), browser: BrowserKind::Chrome, headers: vec![] };
        let err = run(&UnconfiguredDriver, &opts).await.unwrap_err();
        assert!(err.to_string().contains("No browser automation backend is configured."));
    }
}
