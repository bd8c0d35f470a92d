//! Protocol-specific probing through a candidate proxy
//!
//! Each dialer performs one end-to-end exchange with the test target through
//! a candidate and reports either the time to first response byte or a
//! classified failure. Dialers never enforce the overall deadline themselves;
//! the checker wraps the whole call in a single timeout.

use crate::proxy::models::{Candidate, ProbeStatus, ProxyType};
use crate::Result;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy, Url};
use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

/// User agent sent with every probe request
pub const DEFAULT_USER_AGENT: &str = concat!("proxy-sift/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the response head read through a SOCKS tunnel
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Test target every probe talks to
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    url: Url,
    host: String,
    port: u16,
}

impl ProbeTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid test url: {}", url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("test url must be http or https: {}", url));
        }
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("test url has no host: {}", url))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("test url has no port: {}", url))?;
        Ok(Self { url, host, port })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Origin-form request target (`/path?query`)
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    /// Value for the `Host` header, port included only when non-default
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        }
    }
}

/// Immutable client configuration shared by every probe of a run.
#[derive(Clone)]
pub struct ProbeSettings {
    pub target: ProbeTarget,
    pub verify_tls: bool,
    pub user_agent: String,
    tls: tokio_native_tls::TlsConnector,
}

impl ProbeSettings {
    pub fn new(target: ProbeTarget, verify_tls: bool) -> Result<Self> {
        let mut builder = native_tls::TlsConnector::builder();
        if !verify_tls {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let tls = builder.build().context("failed to build TLS connector")?;
        Ok(Self {
            target,
            verify_tls,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            tls: tls.into(),
        })
    }
}

/// A probe that reached the target and got a success status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSuccess {
    pub latency: Duration,
    pub status: u16,
}

/// A classified probe failure. Never a success status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub status: ProbeStatus,
    pub detail: String,
}

impl ProbeFailure {
    pub fn new(status: ProbeStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn from_io(context: &str, err: &io::Error) -> Self {
        Self::new(classify_io_kind(err.kind()), format!("{}: {}", context, err))
    }
}

/// One verification exchange through a candidate proxy.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn probe(
        &self,
        candidate: &Candidate,
        settings: &ProbeSettings,
    ) -> std::result::Result<ProbeSuccess, ProbeFailure>;
}

/// Uses the candidate as an HTTP forward proxy (absolute-form requests for
/// `http` targets, `CONNECT` tunnels for `https` targets).
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDialer;

#[async_trait]
impl Dialer for HttpDialer {
    async fn probe(
        &self,
        candidate: &Candidate,
        settings: &ProbeSettings,
    ) -> std::result::Result<ProbeSuccess, ProbeFailure> {
        let start = Instant::now();
        let proxy = ReqwestProxy::all(format!("http://{}", candidate.authority()))
            .map_err(|e| ProbeFailure::new(ProbeStatus::ProtocolError, e.to_string()))?;
        let client = Client::builder()
            .proxy(proxy)
            .user_agent(&settings.user_agent)
            .danger_accept_invalid_certs(!settings.verify_tls)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ProbeFailure::new(ProbeStatus::ProtocolError, e.to_string()))?;

        let mut response = client
            .get(settings.target.url().clone())
            .send()
            .await
            .map_err(classify_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::new(
                ProbeStatus::HttpError,
                format!("HTTP status: {}", status),
            ));
        }
        // first body byte, or end of an empty body
        response.chunk().await.map_err(classify_reqwest)?;
        Ok(ProbeSuccess {
            latency: start.elapsed(),
            status: status.as_u16(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksVersion {
    V4,
    V5,
}

/// Negotiates a SOCKS tunnel to the target, then performs one HTTP/1.1
/// exchange (over TLS for `https` targets) through it.
#[derive(Debug, Clone, Copy)]
pub struct SocksDialer {
    version: SocksVersion,
}

impl SocksDialer {
    pub fn new(version: SocksVersion) -> Self {
        Self { version }
    }

    async fn open_tunnel(
        &self,
        candidate: &Candidate,
        target: &ProbeTarget,
    ) -> std::result::Result<TcpStream, ProbeFailure> {
        let proxy = (candidate.host(), candidate.port());
        let tunnel = match self.version {
            // SOCKS4 carries only IPv4 targets, resolve locally
            SocksVersion::V4 => {
                let addr = resolve_ipv4(target.host(), target.port()).await?;
                Socks4Stream::connect(proxy, addr)
                    .await
                    .map(Socks4Stream::into_inner)
            }
            SocksVersion::V5 => Socks5Stream::connect(proxy, (target.host(), target.port()))
                .await
                .map(Socks5Stream::into_inner),
        };
        tunnel.map_err(classify_socks)
    }
}

#[async_trait]
impl Dialer for SocksDialer {
    async fn probe(
        &self,
        candidate: &Candidate,
        settings: &ProbeSettings,
    ) -> std::result::Result<ProbeSuccess, ProbeFailure> {
        let start = Instant::now();
        let stream = self.open_tunnel(candidate, &settings.target).await?;
        if settings.target.is_tls() {
            let tls = settings
                .tls
                .connect(settings.target.host(), stream)
                .await
                .map_err(|e| {
                    ProbeFailure::new(ProbeStatus::ProtocolError, format!("tls handshake: {}", e))
                })?;
            http_exchange(tls, settings, start).await
        } else {
            http_exchange(stream, settings, start).await
        }
    }
}

/// Maps each protocol variant to the dialer that probes it.
#[derive(Clone)]
pub struct DialerTable {
    http: Arc<dyn Dialer>,
    https: Arc<dyn Dialer>,
    socks4: Arc<dyn Dialer>,
    socks5: Arc<dyn Dialer>,
}

impl DialerTable {
    /// The network dialers used in production
    pub fn standard() -> Self {
        Self {
            http: Arc::new(HttpDialer),
            https: Arc::new(HttpDialer),
            socks4: Arc::new(SocksDialer::new(SocksVersion::V4)),
            socks5: Arc::new(SocksDialer::new(SocksVersion::V5)),
        }
    }

    /// Every protocol served by the same dialer
    pub fn uniform(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            http: dialer.clone(),
            https: dialer.clone(),
            socks4: dialer.clone(),
            socks5: dialer,
        }
    }

    pub fn with(mut self, protocol: ProxyType, dialer: Arc<dyn Dialer>) -> Self {
        match protocol {
            ProxyType::Http => self.http = dialer,
            ProxyType::Https => self.https = dialer,
            ProxyType::Socks4 => self.socks4 = dialer,
            ProxyType::Socks5 => self.socks5 = dialer,
        }
        self
    }

    pub fn get(&self, protocol: ProxyType) -> &Arc<dyn Dialer> {
        match protocol {
            ProxyType::Http => &self.http,
            ProxyType::Https => &self.https,
            ProxyType::Socks4 => &self.socks4,
            ProxyType::Socks5 => &self.socks5,
        }
    }
}

impl Default for DialerTable {
    fn default() -> Self {
        Self::standard()
    }
}

async fn resolve_ipv4(host: &str, port: u16) -> std::result::Result<SocketAddr, ProbeFailure> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProbeFailure::from_io("resolve test host", &e))?;
    addrs.into_iter().find(SocketAddr::is_ipv4).ok_or_else(|| {
        ProbeFailure::new(
            ProbeStatus::ConnectError,
            format!("no IPv4 address for {}", host),
        )
    })
}

/// Write one GET request and read the response head.
async fn http_exchange<S>(
    mut stream: S,
    settings: &ProbeSettings,
    start: Instant,
) -> std::result::Result<ProbeSuccess, ProbeFailure>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_request(&settings.target, &settings.user_agent);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ProbeFailure::from_io("send request", &e))?;
    stream
        .flush()
        .await
        .map_err(|e| ProbeFailure::from_io("send request", &e))?;

    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 2048];
    let mut first_byte = None;
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| ProbeFailure::from_io("read response", &e))?;
        if n == 0 {
            break;
        }
        first_byte.get_or_insert_with(|| start.elapsed());
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_RESPONSE_HEAD {
            break;
        }
    }

    let Some(latency) = first_byte else {
        return Err(ProbeFailure::new(
            ProbeStatus::HttpError,
            "connection closed before any response",
        ));
    };
    let status = parse_status_line(&head).ok_or_else(|| {
        ProbeFailure::new(ProbeStatus::HttpError, "malformed HTTP response")
    })?;
    if !(200..300).contains(&status) {
        return Err(ProbeFailure::new(
            ProbeStatus::HttpError,
            format!("HTTP status: {}", status),
        ));
    }
    Ok(ProbeSuccess { latency, status })
}

fn build_request(target: &ProbeTarget, user_agent: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        target.request_target(),
        target.host_header(),
        user_agent
    )
}

/// Status code of an `HTTP/1.x NNN reason` status line
fn parse_status_line(head: &[u8]) -> Option<u16> {
    let end = head.iter().position(|&b| b == b'\r' || b == b'\n')?;
    let line = std::str::from_utf8(&head[..end]).ok()?;
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok().filter(|c| (100..600).contains(c))
}

fn classify_io_kind(kind: io::ErrorKind) -> ProbeStatus {
    match kind {
        io::ErrorKind::TimedOut => ProbeStatus::Timeout,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::BrokenPipe => ProbeStatus::ConnectError,
        _ => ProbeStatus::ProtocolError,
    }
}

fn find_io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        out.push_str(": ");
        out.push_str(&e.to_string());
        current = e.source();
    }
    out
}

fn classify_reqwest(err: reqwest::Error) -> ProbeFailure {
    let detail = error_chain(&err);
    let status = if err.is_timeout() {
        ProbeStatus::Timeout
    } else if let Some(kind) = find_io_kind(&err) {
        classify_io_kind(kind)
    } else if err.is_connect() {
        // TCP was fine but the proxy refused or mangled the tunnel
        ProbeStatus::ProtocolError
    } else if err.is_status() || err.is_body() || err.is_decode() {
        ProbeStatus::HttpError
    } else {
        ProbeStatus::ProtocolError
    };
    ProbeFailure::new(status, detail)
}

fn classify_socks(err: tokio_socks::Error) -> ProbeFailure {
    match err {
        tokio_socks::Error::Io(e) => ProbeFailure::from_io("socks", &e),
        tokio_socks::Error::ProxyServerUnreachable => {
            ProbeFailure::new(ProbeStatus::ConnectError, err.to_string())
        }
        other => ProbeFailure::new(ProbeStatus::ProtocolError, other.to_string()),
    }
}
