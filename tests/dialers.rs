use proxy_sift::proxy::dialer::{HttpDialer, SocksDialer, SocksVersion};
use proxy_sift::proxy::{
    Candidate, CheckerConfig, Dialer, ProbeSettings, ProbeStatus, ProbeTarget, ProxyChecker,
    ProxyType,
};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const OK_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 20\r\nConnection: close\r\n\r\n{\"origin\":\"1.2.3.4\"}";

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A port nothing listens on
async fn closed_port() -> u16 {
    let (listener, port) = listener().await;
    drop(listener);
    port
}

async fn read_http_head<S: AsyncRead + Unpin>(socket: &mut S) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// HTTP forward proxy answering every request with `response`
fn spawn_http_proxy(listener: TcpListener, response: &'static [u8]) {
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let head = read_http_head(&mut socket).await;
                assert!(head.starts_with("GET http://probe.test/ip"), "{}", head);
                let _ = socket.write_all(response).await;
                let _ = socket.shutdown().await;
            });
        }
    });
}

/// Acceptor for `probe.test` with a self-signed certificate
fn tls_acceptor() -> tokio_native_tls::TlsAcceptor {
    let identity = native_tls::Identity::from_pkcs8(
        include_bytes!("data/probe-test.crt"),
        include_bytes!("data/probe-test.key"),
    )
    .unwrap();
    native_tls::TlsAcceptor::new(identity).unwrap().into()
}

/// Serve one HTTP request over TLS on an established tunnel. A client that
/// rejects the certificate just ends the exchange.
async fn serve_tls(socket: TcpStream) {
    let Ok(mut tls) = tls_acceptor().accept(socket).await else {
        return;
    };
    let head = read_http_head(&mut tls).await;
    assert!(head.starts_with("GET /ip HTTP/1.1\r\n"), "{}", head);
    let _ = tls.write_all(OK_RESPONSE).await;
    let _ = tls.shutdown().await;
}

/// HTTP proxy expecting `CONNECT probe.test:443`. Replies with `reply` and,
/// when `tls` is set, serves the test target inside the tunnel.
fn spawn_connect_proxy(listener: TcpListener, reply: &'static [u8], tls: bool) {
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_http_head(&mut socket).await;
        assert!(head.starts_with("CONNECT probe.test:443 "), "{}", head);
        socket.write_all(reply).await.unwrap();
        if tls {
            serve_tls(socket).await;
        }
    });
}

/// Negotiate a no-auth SOCKS5 CONNECT to `probe.test` and reply with
/// `reply_code`.
async fn socks5_handshake(socket: &mut TcpStream, reply_code: u8) {
    let mut greeting = [0u8; 2];
    socket.read_exact(&mut greeting).await.unwrap();
    assert_eq!(greeting[0], 5);
    let mut methods = vec![0u8; greeting[1] as usize];
    socket.read_exact(&mut methods).await.unwrap();
    socket.write_all(&[5, 0]).await.unwrap();

    let mut request = [0u8; 4];
    socket.read_exact(&mut request).await.unwrap();
    assert_eq!(&request[..2], &[5, 1]);
    match request[3] {
        1 => {
            let mut addr = [0u8; 4];
            socket.read_exact(&mut addr).await.unwrap();
        }
        3 => {
            let mut len = [0u8; 1];
            socket.read_exact(&mut len).await.unwrap();
            let mut name = vec![0u8; len[0] as usize];
            socket.read_exact(&mut name).await.unwrap();
            assert_eq!(name, b"probe.test");
        }
        other => panic!("unexpected address type {}", other),
    }
    let mut port = [0u8; 2];
    socket.read_exact(&mut port).await.unwrap();
    socket
        .write_all(&[5, reply_code, 0, 1, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
}

/// SOCKS5 server (no auth) that replies with `reply_code` and, on success,
/// answers one HTTP request.
fn spawn_socks5(listener: TcpListener, reply_code: u8) {
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socks5_handshake(&mut socket, reply_code).await;
        if reply_code != 0 {
            return;
        }

        let head = read_http_head(&mut socket).await;
        assert!(head.starts_with("GET /ip HTTP/1.1\r\n"), "{}", head);
        assert!(head.contains("Host: probe.test\r\n"), "{}", head);
        socket.write_all(OK_RESPONSE).await.unwrap();
    });
}

/// SOCKS5 server whose tunnel leads to a TLS endpoint for `probe.test`
fn spawn_socks5_tls(listener: TcpListener) {
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socks5_handshake(&mut socket, 0).await;
        serve_tls(socket).await;
    });
}

/// SOCKS4 server granting one CONNECT and answering one HTTP request
fn spawn_socks4(listener: TcpListener) {
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 8];
        socket.read_exact(&mut request).await.unwrap();
        assert_eq!(&request[..2], &[4, 1]);
        assert_eq!(&request[4..8], &[127, 0, 0, 1]);
        // user id, NUL terminated
        let mut byte = [0u8; 1];
        loop {
            socket.read_exact(&mut byte).await.unwrap();
            if byte[0] == 0 {
                break;
            }
        }
        socket
            .write_all(&[0, 0x5a, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        let head = read_http_head(&mut socket).await;
        assert!(head.starts_with("GET /ip HTTP/1.1\r\n"), "{}", head);
        socket.write_all(OK_RESPONSE).await.unwrap();
    });
}

fn settings(test_url: &str) -> ProbeSettings {
    ProbeSettings::new(ProbeTarget::parse(test_url).unwrap(), true).unwrap()
}

fn unverified(test_url: &str) -> ProbeSettings {
    ProbeSettings::new(ProbeTarget::parse(test_url).unwrap(), false).unwrap()
}

fn local(protocol: ProxyType, port: u16) -> Candidate {
    Candidate::new(protocol, "127.0.0.1", port).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn http_proxy_success() {
    let (listener, port) = listener().await;
    spawn_http_proxy(listener, OK_RESPONSE);

    let success = HttpDialer
        .probe(&local(ProxyType::Http, port), &settings("http://probe.test/ip"))
        .await
        .unwrap();
    assert_eq!(success.status, 200);
    assert!(success.latency < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn http_proxy_error_status_is_http_error() {
    let (listener, port) = listener().await;
    spawn_http_proxy(
        listener,
        b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    );

    let failure = HttpDialer
        .probe(&local(ProxyType::Http, port), &settings("http://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::HttpError);
    assert!(failure.detail.contains("503"), "{}", failure.detail);
}

#[tokio::test(flavor = "multi_thread")]
async fn http_proxy_refused_is_connect_error() {
    let port = closed_port().await;
    let failure = HttpDialer
        .probe(&local(ProxyType::Http, port), &settings("http://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::ConnectError, "{}", failure.detail);
}

#[tokio::test(flavor = "multi_thread")]
async fn socks5_success() {
    let (listener, port) = listener().await;
    spawn_socks5(listener, 0);

    let success = SocksDialer::new(SocksVersion::V5)
        .probe(&local(ProxyType::Socks5, port), &settings("http://probe.test/ip"))
        .await
        .unwrap();
    assert_eq!(success.status, 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn socks5_rejection_is_protocol_error() {
    let (listener, port) = listener().await;
    // general SOCKS server failure
    spawn_socks5(listener, 1);

    let failure = SocksDialer::new(SocksVersion::V5)
        .probe(&local(ProxyType::Socks5, port), &settings("http://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::ProtocolError, "{}", failure.detail);
}

#[tokio::test(flavor = "multi_thread")]
async fn socks5_against_http_server_is_protocol_error() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        let _ = socket.read(&mut buf).await;
        let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
    });

    let failure = SocksDialer::new(SocksVersion::V5)
        .probe(&local(ProxyType::Socks5, port), &settings("http://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::ProtocolError, "{}", failure.detail);
}

#[tokio::test(flavor = "multi_thread")]
async fn socks4_success() {
    let (listener, port) = listener().await;
    spawn_socks4(listener);

    let success = SocksDialer::new(SocksVersion::V4)
        .probe(&local(ProxyType::Socks4, port), &settings("http://127.0.0.1/ip"))
        .await
        .unwrap();
    assert_eq!(success.status, 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn socks_refused_is_connect_error() {
    let port = closed_port().await;
    let failure = SocksDialer::new(SocksVersion::V5)
        .probe(&local(ProxyType::Socks5, port), &settings("http://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::ConnectError, "{}", failure.detail);
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_proxy_hits_the_deadline() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let timeout = Duration::from_millis(300);
    let checker = ProxyChecker::with_config(
        CheckerConfig::new()
            .with_test_url("http://probe.test/ip".to_string())
            .with_timeout(timeout),
    )
    .unwrap();

    let started = Instant::now();
    let outcome = checker.check_proxy(&local(ProxyType::Socks5, port)).await;
    assert_eq!(outcome.status, ProbeStatus::Timeout);
    assert!(started.elapsed() < timeout + Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn checker_dispatches_by_protocol() {
    let (http_listener, http_port) = listener().await;
    spawn_http_proxy(http_listener, OK_RESPONSE);
    let (socks_listener, socks_port) = listener().await;
    spawn_socks5(socks_listener, 0);

    let checker = ProxyChecker::with_config(
        CheckerConfig::new()
            .with_test_url("http://probe.test/ip".to_string())
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap();
    let (alive, dead) = checker
        .check_and_separate(vec![
            local(ProxyType::Http, http_port),
            local(ProxyType::Socks5, socks_port),
            local(ProxyType::Http, closed_port().await),
        ])
        .await;
    assert_eq!(alive.len(), 2);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].status, ProbeStatus::ConnectError);
}

#[tokio::test(flavor = "multi_thread")]
async fn http_proxy_refusing_connect_is_protocol_error() {
    let (listener, port) = listener().await;
    spawn_connect_proxy(
        listener,
        b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n",
        false,
    );

    let failure = HttpDialer
        .probe(&local(ProxyType::Https, port), &settings("https://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::ProtocolError, "{}", failure.detail);
}

#[tokio::test(flavor = "multi_thread")]
async fn http_proxy_tunnel_honours_tls_verification() {
    const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

    let (accepting, port) = listener().await;
    spawn_connect_proxy(accepting, ESTABLISHED, true);
    let success = HttpDialer
        .probe(&local(ProxyType::Https, port), &unverified("https://probe.test/ip"))
        .await
        .unwrap();
    assert_eq!(success.status, 200);

    let (rejecting, port) = listener().await;
    spawn_connect_proxy(rejecting, ESTABLISHED, true);
    let failure = HttpDialer
        .probe(&local(ProxyType::Https, port), &settings("https://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::ProtocolError, "{}", failure.detail);
}

#[tokio::test(flavor = "multi_thread")]
async fn socks5_plain_tunnel_to_tls_target_is_protocol_error() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socks5_handshake(&mut socket, 0).await;
        let mut hello = [0u8; 64];
        let _ = socket.read(&mut hello).await;
        let _ = socket
            .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
            .await;
        let _ = socket.shutdown().await;
    });

    let failure = SocksDialer::new(SocksVersion::V5)
        .probe(&local(ProxyType::Socks5, port), &settings("https://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::ProtocolError, "{}", failure.detail);
    assert!(failure.detail.contains("tls handshake"), "{}", failure.detail);
}

#[tokio::test(flavor = "multi_thread")]
async fn socks5_tunnel_honours_tls_verification() {
    let (accepting, port) = listener().await;
    spawn_socks5_tls(accepting);
    let success = SocksDialer::new(SocksVersion::V5)
        .probe(&local(ProxyType::Socks5, port), &unverified("https://probe.test/ip"))
        .await
        .unwrap();
    assert_eq!(success.status, 200);

    let (rejecting, port) = listener().await;
    spawn_socks5_tls(rejecting);
    let failure = SocksDialer::new(SocksVersion::V5)
        .probe(&local(ProxyType::Socks5, port), &settings("https://probe.test/ip"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, ProbeStatus::ProtocolError, "{}", failure.detail);
    assert!(failure.detail.contains("tls handshake"), "{}", failure.detail);
}
