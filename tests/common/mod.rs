#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring;
use rustls::ServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

const GOOGLE_PEM: &[u8] = include_bytes!("../fixtures/google.pem");
const GOOGLE_KEY: &[u8] = include_bytes!("../fixtures/google.key.pem");

/// Self-signed certificate with subject `O=Google Inc, CN=google.com`.
pub fn google_cert_path() -> &'static Path {
    Path::new("tests/fixtures/google.pem")
}

fn google_acceptor() -> TlsAcceptor {
    let mut pem = GOOGLE_PEM;
    let certs = rustls_pemfile::certs(&mut pem)
        .collect::<Result<Vec<_>, _>>()
        .expect("fixture certificate");
    let mut pem = GOOGLE_KEY;
    let key = rustls_pemfile::private_key(&mut pem)
        .expect("fixture key")
        .expect("fixture holds a key");

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("server certificate");
    TlsAcceptor::from(Arc::new(config))
}

/// Serves the Google certificate on `addr`.
///
/// With `server` set, every connection also gets one HTTP response carrying
/// that `Server` header. Otherwise the connection is closed after the
/// handshake.
pub async fn responder(addr: &str, server: Option<&'static str>) -> SocketAddr {
    let listener = TcpListener::bind(addr).await.expect("bind responder");
    let local = listener.local_addr().unwrap();
    let acceptor = google_acceptor();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(answer(acceptor.clone(), stream, server));
        }
    });
    local
}

async fn answer(acceptor: TlsAcceptor, stream: TcpStream, server: Option<&'static str>) {
    let Ok(mut tls) = acceptor.accept(stream).await else {
        return;
    };
    let Some(server) = server else {
        return;
    };

    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match tls.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nServer: {server}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    let _ = tls.write_all(response.as_bytes()).await;
    let _ = tls.shutdown().await;
}

/// Accepts connections on `addr` and never answers them.
pub async fn stall(addr: &str) -> SocketAddr {
    let listener = TcpListener::bind(addr).await.expect("bind staller");
    let local = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    local
}
