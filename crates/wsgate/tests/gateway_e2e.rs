//! End-to-end tests: a real gateway on a loopback port, a fake target behind
//! it and hand-written WebSocket clients in front of it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use wsgate::domain::GatewayConfig;
use wsgate::infrastructure::Gateway;
use wsgate_core::protocol::frame::{encode_close, encode_hybi_masked};
use wsgate_core::OpCode;

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const KEY: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    gateway_addr: SocketAddr,
    target: TcpListener,
    running: Arc<AtomicBool>,
}

impl Harness {
    /// Starts a gateway in front of a fresh target listener.
    async fn start(customize: impl FnOnce(&mut GatewayConfig)) -> Self {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();

        let mut config = GatewayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            target_host: "127.0.0.1".to_string(),
            target_port: target_addr.port(),
            poll_interval: Duration::from_millis(100),
            ..GatewayConfig::default()
        };
        customize(&mut config);

        let gateway = Gateway::bind(config).await.unwrap();
        let gateway_addr = gateway.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(gateway.run(Arc::clone(&running)));

        Self {
            gateway_addr,
            target,
            running,
        }
    }

    async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.gateway_addr).await.unwrap()
    }

    /// Waits for the gateway's connection to the target.
    async fn accept_target(&self) -> TcpStream {
        let (stream, _) = timeout(IO_TIMEOUT, self.target.accept())
            .await
            .expect("gateway never connected to the target")
            .unwrap();
        stream
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn hybi_request(protocols: &str) -> String {
    format!(
        "GET /websockify HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 7\r\n\
         Sec-WebSocket-Protocol: {protocols}\r\n\r\n"
    )
}

/// Reads an HTTP response head, one byte at a time so nothing after the
/// blank line is consumed.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = timeout(IO_TIMEOUT, stream.read_u8()).await.unwrap().unwrap();
        head.push(byte);
    }
    String::from_utf8(head).unwrap()
}

async fn read_exact_timed<S: AsyncRead + Unpin>(stream: &mut S, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(IO_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

async fn read_to_end_timed<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = timeout(IO_TIMEOUT, stream.read_to_end(&mut buf)).await.unwrap();
    buf
}

/// Performs a HyBi handshake offering `binary` and returns the response head.
async fn hybi_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> String {
    stream
        .write_all(hybi_request("binary").as_bytes())
        .await
        .unwrap();
    read_head(stream).await
}

// ── HyBi ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hybi_binary_round_trip() {
    // Arrange
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;
    let head = hybi_handshake(&mut client).await;
    let mut target = harness.accept_target().await;

    // Act: client → target
    client
        .write_all(&encode_hybi_masked(b"hello", OpCode::Binary, KEY))
        .await
        .unwrap();
    let at_target = read_exact_timed(&mut target, 5).await;

    // Act: target → client
    target.write_all(b"world").await.unwrap();
    let at_client = read_exact_timed(&mut client, 7).await;

    // Assert
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert!(head.contains("Sec-WebSocket-Protocol: binary\r\n"));
    assert_eq!(at_target, b"hello");
    assert_eq!(at_client, b"\x82\x05world");
}

#[tokio::test]
async fn test_hybi_base64_round_trip() {
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;
    client
        .write_all(hybi_request("base64").as_bytes())
        .await
        .unwrap();
    let head = read_head(&mut client).await;
    let mut target = harness.accept_target().await;

    client
        .write_all(&encode_hybi_masked(b"aGVsbG8=", OpCode::Text, KEY))
        .await
        .unwrap();
    let at_target = read_exact_timed(&mut target, 5).await;
    target.write_all(b"hi").await.unwrap();
    let at_client = read_exact_timed(&mut client, 6).await;

    assert!(head.contains("Sec-WebSocket-Protocol: base64\r\n"));
    assert_eq!(at_target, b"hello");
    assert_eq!(at_client, b"\x81\x04aGk=");
}

#[tokio::test]
async fn test_two_frames_in_one_segment_reach_target_in_order() {
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;
    hybi_handshake(&mut client).await;
    let mut target = harness.accept_target().await;

    let mut segment = encode_hybi_masked(b"abc", OpCode::Binary, KEY);
    segment.extend_from_slice(&encode_hybi_masked(b"def", OpCode::Binary, KEY));
    client.write_all(&segment).await.unwrap();

    assert_eq!(read_exact_timed(&mut target, 6).await, b"abcdef");
}

#[tokio::test]
async fn test_frame_split_across_segments_is_reassembled() {
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;
    hybi_handshake(&mut client).await;
    let mut target = harness.accept_target().await;

    let frame = encode_hybi_masked(b"split payload", OpCode::Binary, KEY);
    let (first, second) = frame.split_at(4);
    client.write_all(first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(second).await.unwrap();

    assert_eq!(read_exact_timed(&mut target, 13).await, b"split payload");
}

#[tokio::test]
async fn test_close_frame_is_echoed_and_target_connection_closed() {
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;
    hybi_handshake(&mut client).await;
    let mut target = harness.accept_target().await;

    client
        .write_all(&encode_hybi_masked(&encode_close(1000, "bye"), OpCode::Close, KEY))
        .await
        .unwrap();

    let echoed = read_to_end_timed(&mut client).await;
    assert_eq!(echoed, b"\x88\x02\x03\xE8");
    assert!(read_to_end_timed(&mut target).await.is_empty());
}

#[tokio::test]
async fn test_target_disconnect_closes_client() {
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;
    hybi_handshake(&mut client).await;
    let target = harness.accept_target().await;

    drop(target);

    assert!(read_to_end_timed(&mut client).await.is_empty());
}

#[tokio::test]
async fn test_unreachable_target_closes_client() {
    // Arrange: point the gateway at a port nobody listens on
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let harness = Harness::start(|c| c.target_port = dead_port).await;
    let mut client = harness.connect().await;

    // Act
    hybi_handshake(&mut client).await;

    // Assert
    assert!(read_to_end_timed(&mut client).await.is_empty());
}

#[tokio::test]
async fn test_unsupported_version_gets_no_response() {
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;

    let request = hybi_request("binary").replace("Version: 7", "Version: 13");
    client.write_all(request.as_bytes()).await.unwrap();

    assert!(read_to_end_timed(&mut client).await.is_empty());
}

// ── Hixie ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hixie76_round_trip() {
    // Arrange
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;
    client
        .write_all(
            b"GET /demo HTTP/1.1\r\n\
              Host: example.com\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key2: 12998 5 Y3 1  .P00\r\n\
              Sec-WebSocket-Protocol: base64\r\n\
              Upgrade: WebSocket\r\n\
              Sec-WebSocket-Key1: 4 @1  46546xW%0l 1 5\r\n\
              Origin: http://example.com\r\n\r\n^n:ds[4U",
        )
        .await
        .unwrap();
    let head = read_head(&mut client).await;
    let challenge = read_exact_timed(&mut client, 16).await;
    let mut target = harness.accept_target().await;

    // Act
    let mut frame = vec![0x00];
    frame.extend_from_slice(BASE64.encode("hello").as_bytes());
    frame.push(0xFF);
    client.write_all(&frame).await.unwrap();
    let at_target = read_exact_timed(&mut target, 5).await;

    target.write_all(b"hi").await.unwrap();
    let at_client = read_exact_timed(&mut client, 6).await;

    // Assert
    assert!(head.starts_with("HTTP/1.1 101 Web Socket Protocol Handshake\r\n"));
    assert!(head.contains("Sec-WebSocket-Location: ws://example.com/demo\r\n"));
    assert_eq!(challenge, b"8jKS'y:G*Co,Wxa-");
    assert_eq!(at_target, b"hello");
    assert_eq!(at_client, b"\x00aGk=\xFF");
}

#[tokio::test]
async fn test_hixie75_round_trip() {
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;
    client
        .write_all(
            b"GET /old HTTP/1.1\r\n\
              Upgrade: WebSocket\r\n\
              Connection: Upgrade\r\n\
              Host: example.com\r\n\
              Origin: http://example.com\r\n\
              WebSocket-Protocol: base64\r\n\r\n",
        )
        .await
        .unwrap();
    let head = read_head(&mut client).await;
    let mut target = harness.accept_target().await;

    client.write_all(b"\x00aGk=\xFF").await.unwrap();

    assert!(head.contains("WebSocket-Location: ws://example.com/old\r\n"));
    assert!(!head.contains("Sec-"));
    assert_eq!(read_exact_timed(&mut target, 2).await, b"hi");
}

// ── Other connection kinds ────────────────────────────────────────────────────

#[tokio::test]
async fn test_flash_policy_request_gets_policy() {
    let harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;

    client
        .write_all(b"<policy-file-request/>\0")
        .await
        .unwrap();
    let reply = read_to_end_timed(&mut client).await;

    assert_eq!(
        reply,
        b"<cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"*\" /></cross-domain-policy>\n"
    );
}

#[tokio::test]
async fn test_plain_get_served_from_web_root() {
    // Arrange
    let root = std::env::temp_dir().join(format!("wsgate-e2e-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("index.html"), "<p>client</p>").unwrap();
    let web_root = root.clone();
    let harness = Harness::start(move |c| c.web_root = Some(web_root)).await;
    let mut client = harness.connect().await;

    // Act
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let reply = String::from_utf8(read_to_end_timed(&mut client).await).unwrap();

    // Assert
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.ends_with("<p>client</p>"));
    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_silent_client_is_dropped_after_handshake_timeout() {
    let harness = Harness::start(|c| c.handshake_timeout = Duration::from_millis(200)).await;
    let mut client = harness.connect().await;

    let closed = read_to_end_timed(&mut client).await;

    assert!(closed.is_empty());
}

#[tokio::test]
async fn test_recording_file_receives_both_directions() {
    // Arrange
    let record = std::env::temp_dir().join(format!("wsgate-e2e-{}.rec", uuid::Uuid::new_v4()));
    let record_path = record.clone();
    let harness = Harness::start(move |c| c.record_path = Some(record_path)).await;
    let mut client = harness.connect().await;
    hybi_handshake(&mut client).await;
    let mut target = harness.accept_target().await;

    // Act
    client
        .write_all(&encode_hybi_masked(b"hi", OpCode::Binary, KEY))
        .await
        .unwrap();
    read_exact_timed(&mut target, 2).await;
    target.write_all(b"yo").await.unwrap();
    read_exact_timed(&mut client, 4).await;
    drop(client);
    drop(target);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Assert: one line per direction, in order
    let contents = std::fs::read_to_string(&record).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("\"}") && lines[0].ends_with("}aGk=\","));
    assert!(lines[1].starts_with("\"{") && lines[1].ends_with("{eW8=\","));
    std::fs::remove_file(&record).ok();
}

// ── TLS ───────────────────────────────────────────────────────────────────────

/// Writes a self-signed `localhost` certificate and key to temp files.
fn self_signed() -> (PathBuf, PathBuf, CertificateDer<'static>) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let stem = std::env::temp_dir().join(format!("wsgate-e2e-{}", uuid::Uuid::new_v4()));
    let cert_path = stem.with_extension("crt");
    let key_path = stem.with_extension("key");
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    let der = CertificateDer::from(certified.cert.der().to_vec());
    (cert_path, key_path, der)
}

fn tls_connector(root: CertificateDer<'static>) -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(root).unwrap();
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn test_wss_round_trip_on_shared_port() {
    // Arrange
    let (cert, key, der) = self_signed();
    let (cert_cfg, key_cfg) = (cert.clone(), key.clone());
    let harness = Harness::start(move |c| {
        c.cert = Some(cert_cfg);
        c.key = Some(key_cfg);
    })
    .await;
    let tcp = harness.connect().await;
    let server_name = ServerName::try_from("localhost".to_string()).unwrap();
    let mut client = tls_connector(der).connect(server_name, tcp).await.unwrap();

    // Act
    let head = hybi_handshake(&mut client).await;
    let mut target = harness.accept_target().await;
    client
        .write_all(&encode_hybi_masked(b"secure", OpCode::Binary, KEY))
        .await
        .unwrap();
    client.flush().await.unwrap();
    let at_target = read_exact_timed(&mut target, 6).await;
    target.write_all(b"ok").await.unwrap();
    let at_client = read_exact_timed(&mut client, 4).await;

    // Assert
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert_eq!(at_target, b"secure");
    assert_eq!(at_client, b"\x82\x02ok");
    std::fs::remove_file(cert).ok();
    std::fs::remove_file(key).ok();
}

#[tokio::test]
async fn test_ssl_only_refuses_plaintext() {
    let (cert, key, _) = self_signed();
    let (cert_cfg, key_cfg) = (cert.clone(), key.clone());
    let harness = Harness::start(move |c| {
        c.cert = Some(cert_cfg);
        c.key = Some(key_cfg);
        c.tls_only = true;
    })
    .await;
    let mut client = harness.connect().await;

    client
        .write_all(hybi_request("binary").as_bytes())
        .await
        .unwrap();

    assert!(read_to_end_timed(&mut client).await.is_empty());
    std::fs::remove_file(cert).ok();
    std::fs::remove_file(key).ok();
}

#[tokio::test]
async fn test_tls_without_certificate_is_refused() {
    // Arrange: a plaintext-only gateway
    let harness = Harness::start(|_| {}).await;
    let (_, _, der) = self_signed();
    let tcp = harness.connect().await;
    let server_name = ServerName::try_from("localhost".to_string()).unwrap();

    // Act
    let result = tls_connector(der).connect(server_name, tcp).await;

    // Assert
    assert!(result.is_err());
}
