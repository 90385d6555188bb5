//! HTTP client that measures each phase of a request chain.
//!
//! Every hop opens its own connection so name lookup, TCP connect and TLS
//! handshake can be timed separately. All timings count from the start of
//! the chain, as curl reports them. Failures carry curl's numeric codes.

use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::{http1, http2};
use hyper::header::{HeaderName, HeaderValue, ACCEPT, HOST, USER_AGENT};
use hyper::{Method, Request, Response, StatusCode, Version};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use scouter_fabric::Resolver;
use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::{Host, Position, Url};

/// Bound on the whole request chain, redirects included.
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_REDIRECTS: usize = 10;

/// curl error codes reported for transport failures
pub mod curl_code {
    pub const UNSUPPORTED_PROTOCOL: u32 = 1;
    pub const URL_MALFORMAT: u32 = 3;
    pub const COULDNT_RESOLVE_HOST: u32 = 6;
    pub const COULDNT_CONNECT: u32 = 7;
    pub const OPERATION_TIMEDOUT: u32 = 28;
    pub const SSL_CONNECT_ERROR: u32 = 35;
    pub const TOO_MANY_REDIRECTS: u32 = 47;
    pub const GOT_NOTHING: u32 = 52;
    pub const RECV_ERROR: u32 = 56;
    pub const PEER_FAILED_VERIFICATION: u32 = 60;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    Http2,
}

impl HttpVersion {
    /// `2`/`2.0` and `1`/`1.0` select those versions; anything else is 1.1.
    #[must_use]
    pub fn from_option(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("2" | "2.0") => HttpVersion::Http2,
            Some("1" | "1.0") => HttpVersion::Http10,
            _ => HttpVersion::Http11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
        }
    }

    fn to_method(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedRequest {
    pub url: String,
    pub method: HttpMethod,
    pub version: HttpVersion,
    /// Address to use for the URL's host instead of a DNS lookup.
    pub resolve: Option<Ipv4Addr>,
    pub headers: Vec<(String, String)>,
    pub ignore_ssl: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimings {
    pub namelookup: Duration,
    pub connect: Duration,
    pub appconnect: Duration,
    pub starttransfer: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedResponse {
    pub status: u16,
    pub reason: Option<String>,
    /// Protocol version from the status line, e.g. `1.1` or `2`.
    pub version: String,
    pub headers: BTreeMap<String, String>,
    pub timings: PhaseTimings,
    /// Body bytes received for the final response.
    pub downloaded: u64,
}

impl TimedResponse {
    /// Average download rate in bits per second.
    #[must_use]
    pub fn speed_download(&self) -> f64 {
        let secs = self.timings.total.as_secs_f64();
        if secs > 0.0 {
            self.downloaded as f64 / secs * 8.0
        } else {
            0.0
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransferError {
    pub code: u32,
    pub message: String,
}

impl TransferError {
    fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Perform `request`, following redirects, within [`TOTAL_TIMEOUT`].
pub async fn perform(
    request: &TimedRequest,
    resolver: &Resolver,
) -> Result<TimedResponse, TransferError> {
    perform_within(request, resolver, TOTAL_TIMEOUT).await
}

pub(crate) async fn perform_within(
    request: &TimedRequest,
    resolver: &Resolver,
    limit: Duration,
) -> Result<TimedResponse, TransferError> {
    let started = Instant::now();
    match tokio::time::timeout(limit, follow(request, resolver, started)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(TransferError::new(
            curl_code::OPERATION_TIMEDOUT,
            format!("Operation timed out after {} milliseconds", limit.as_millis()),
        )),
    }
}

async fn follow(
    request: &TimedRequest,
    resolver: &Resolver,
    started: Instant,
) -> Result<TimedResponse, TransferError> {
    let first = parse_url(&request.url)?;
    let pinned = request.resolve.and_then(|ip| {
        let host = first.host_str()?.to_string();
        Some((host, first.port_or_known_default()?, ip))
    });
    let tls = tls_config(request.ignore_ssl, request.version)?;

    let mut url = first;
    let mut redirects = 0;
    loop {
        let response = fetch(request, resolver, &url, pinned.as_ref(), &tls, started).await?;
        let Some(next) = redirect_target(&url, &response) else {
            return Ok(response);
        };
        if redirects == MAX_REDIRECTS {
            return Err(TransferError::new(
                curl_code::TOO_MANY_REDIRECTS,
                format!("Maximum ({MAX_REDIRECTS}) redirects followed"),
            ));
        }
        redirects += 1;
        debug!(from = %url, to = %next, "following redirect");
        url = next;
    }
}

/// URLs without a scheme are treated as `http://`.
fn parse_url(raw: &str) -> Result<Url, TransferError> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    Url::parse(&candidate).map_err(|e| {
        TransferError::new(
            curl_code::URL_MALFORMAT,
            format!("URL using bad/illegal format or missing URL: {e}"),
        )
    })
}

fn redirect_target(current: &Url, response: &TimedResponse) -> Option<Url> {
    let status = StatusCode::from_u16(response.status).ok()?;
    if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    current.join(response.headers.get("location")?).ok()
}

async fn fetch(
    request: &TimedRequest,
    resolver: &Resolver,
    url: &Url,
    pinned: Option<&(String, u16, Ipv4Addr)>,
    tls: &Arc<ClientConfig>,
    started: Instant,
) -> Result<TimedResponse, TransferError> {
    let https = match url.scheme() {
        "http" => false,
        "https" => true,
        other => {
            return Err(TransferError::new(
                curl_code::UNSUPPORTED_PROTOCOL,
                format!("Protocol \"{other}\" not supported"),
            ))
        }
    };
    let port = url.port_or_known_default().unwrap_or(if https { 443 } else { 80 });
    let (host_name, ip) = match url.host() {
        Some(Host::Ipv4(ip)) => (ip.to_string(), IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => (ip.to_string(), IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => {
            let ip = match pinned {
                Some((host, pinned_port, ip)) if host == domain && *pinned_port == port => {
                    IpAddr::V4(*ip)
                }
                _ => lookup(resolver, domain).await?,
            };
            (domain.to_string(), ip)
        }
        None => {
            return Err(TransferError::new(curl_code::URL_MALFORMAT, "No host part in the URL"))
        }
    };
    let mut timings = PhaseTimings {
        namelookup: started.elapsed(),
        ..PhaseTimings::default()
    };

    let tcp = TcpStream::connect(SocketAddr::new(ip, port)).await.map_err(|e| {
        TransferError::new(
            curl_code::COULDNT_CONNECT,
            format!("Failed to connect to {host_name} port {port}: {e}"),
        )
    })?;
    timings.connect = started.elapsed();

    let response = if https {
        let server_name = ServerName::try_from(host_name.clone()).map_err(|e| {
            TransferError::new(curl_code::URL_MALFORMAT, format!("Invalid TLS server name: {e}"))
        })?;
        let stream = TlsConnector::from(Arc::clone(tls))
            .connect(server_name, tcp)
            .await
            .map_err(tls_error)?;
        timings.appconnect = started.elapsed();
        let h2 = stream.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
        exchange(stream, h2, build_request(request, url, h2)?).await?
    } else {
        exchange(tcp, false, build_request(request, url, false)?).await?
    };
    timings.starttransfer = started.elapsed();

    let (parts, mut body) = response.into_parts();
    let mut downloaded = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(receive_error)?;
        if let Some(data) = frame.data_ref() {
            downloaded += data.len() as u64;
        }
    }
    timings.total = started.elapsed();

    let reason = reason_phrase(&parts);
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).trim().to_string(),
            )
        })
        .collect();

    Ok(TimedResponse {
        status: parts.status.as_u16(),
        reason,
        version: version_label(parts.version).to_string(),
        headers,
        timings,
        downloaded,
    })
}

async fn lookup(resolver: &Resolver, domain: &str) -> Result<IpAddr, TransferError> {
    resolver.resolve_forward(domain).await.map_err(|_| {
        TransferError::new(
            curl_code::COULDNT_RESOLVE_HOST,
            format!("Could not resolve host: {domain}"),
        )
    })
}

/// HTTP/1 responses only carry non-canonical phrases as an extension;
/// HTTP/2 and later have no reason phrase at all.
fn reason_phrase(parts: &hyper::http::response::Parts) -> Option<String> {
    match parts.extensions.get::<hyper::ext::ReasonPhrase>() {
        Some(reason) => Some(String::from_utf8_lossy(reason.as_bytes()).into_owned()),
        None if parts.version >= Version::HTTP_2 => None,
        None => parts.status.canonical_reason().map(str::to_string),
    }
}

fn build_request(
    request: &TimedRequest,
    url: &Url,
    h2: bool,
) -> Result<Request<Empty<Bytes>>, TransferError> {
    let version = match (h2, request.version) {
        (true, _) => Version::HTTP_2,
        (false, HttpVersion::Http10) => Version::HTTP_10,
        (false, _) => Version::HTTP_11,
    };
    let target = if h2 {
        url.as_str().to_string()
    } else {
        url[Position::BeforePath..Position::AfterQuery].to_string()
    };
    let mut builder = Request::builder()
        .method(request.method.to_method())
        .uri(target)
        .version(version);

    let supplied = |name: &HeaderName| {
        request
            .headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name.as_str()))
    };
    if !h2 && !supplied(&HOST) {
        let host = url.host_str().unwrap_or_default();
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        builder = builder.header(HOST, authority);
    }
    if !supplied(&USER_AGENT) {
        builder = builder.header(
            USER_AGENT,
            HeaderValue::from_static(concat!("scouter/", env!("CARGO_PKG_VERSION"))),
        );
    }
    if !supplied(&ACCEPT) {
        builder = builder.header(ACCEPT, HeaderValue::from_static("*/*"));
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Empty::new()).map_err(|e| {
        TransferError::new(curl_code::URL_MALFORMAT, format!("Invalid request: {e}"))
    })
}

async fn exchange<S>(
    stream: S,
    h2: bool,
    request: Request<Empty<Bytes>>,
) -> Result<Response<Incoming>, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    if h2 {
        let (mut sender, connection) = http2::handshake(TokioExecutor::new(), io)
            .await
            .map_err(receive_error)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "http2 connection closed with error");
            }
        });
        sender.send_request(request).await.map_err(receive_error)
    } else {
        let (mut sender, connection) = http1::handshake(io).await.map_err(receive_error)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "http1 connection closed with error");
            }
        });
        sender.send_request(request).await.map_err(receive_error)
    }
}

fn receive_error(e: hyper::Error) -> TransferError {
    if e.is_incomplete_message() {
        TransferError::new(curl_code::GOT_NOTHING, "Empty reply from server")
    } else if e.is_timeout() {
        TransferError::new(curl_code::OPERATION_TIMEDOUT, format!("Operation timed out: {e}"))
    } else {
        TransferError::new(curl_code::RECV_ERROR, format!("Recv failure: {e}"))
    }
}

fn tls_error(e: io::Error) -> TransferError {
    let bad_certificate = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|err| matches!(err, rustls::Error::InvalidCertificate(_)));
    if bad_certificate {
        TransferError::new(
            curl_code::PEER_FAILED_VERIFICATION,
            format!("SSL certificate problem: {e}"),
        )
    } else {
        TransferError::new(curl_code::SSL_CONNECT_ERROR, format!("SSL connect error: {e}"))
    }
}

const fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

fn tls_config(ignore_ssl: bool, version: HttpVersion) -> Result<Arc<ClientConfig>, TransferError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransferError::new(curl_code::SSL_CONNECT_ERROR, e.to_string()))?;
    let mut config = if ignore_ssl {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    config.alpn_protocols = match version {
        HttpVersion::Http2 => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
        HttpVersion::Http10 | HttpVersion::Http11 => vec![b"http/1.1".to_vec()],
    };
    Ok(Arc::new(config))
}

/// Verifier used when certificate checks are disabled. Handshake
/// signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
