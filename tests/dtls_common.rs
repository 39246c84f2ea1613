//! Shared helpers for DTLS integration tests.
//!
//! This file has no `#[test]` functions; Cargo compiles it as a no-op
//! binary. Import it from other test files via `mod dtls_common;`.

#![allow(unused)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use udtls::certificate::generate_self_signed_certificate;
use udtls::{Config, DtlsSocket, Engine, Side, Want};

/// Config for the accepting side: self-signed certificate, short
/// handshake timeout so failing tests fail quickly.
pub fn server_config() -> Arc<Config> {
    let cert = generate_self_signed_certificate().expect("generate certificate");
    Arc::new(
        Config::builder()
            .certificate(cert)
            .handshake_timeout(Duration::from_secs(10))
            .build()
            .expect("server config"),
    )
}

/// Config for the connecting side: no certificate, no verification.
pub fn client_config() -> Arc<Config> {
    Arc::new(
        Config::builder()
            .handshake_timeout(Duration::from_secs(10))
            .build()
            .expect("client config"),
    )
}

/// An ephemeral localhost endpoint to bind listeners to.
pub fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Bind and connect a client session towards `server`.
///
/// Returns the session and the client's local endpoint (the source
/// address the server will observe).
pub async fn connect_client(config: Arc<Config>, server: SocketAddr) -> (DtlsSocket, SocketAddr) {
    let socket = UdpSocket::bind(localhost()).await.expect("bind client");
    socket.connect(server).await.expect("connect client");
    let local = socket.local_addr().expect("client local addr");
    let session = DtlsSocket::with_socket(config, socket).expect("client session");
    (session, local)
}

/// Move every pending datagram from one engine to the other.
///
/// Returns the number of datagrams moved.
pub fn shuttle(from: &mut Engine, to: &mut Engine, buf: &mut [u8]) -> usize {
    let mut moved = 0;
    loop {
        let n = from.get_output(buf);
        if n == 0 {
            break;
        }
        to.put_input(&buf[..n]);
        moved += 1;
    }
    moved
}

/// Drive two engines through a full handshake over in-memory queues.
pub fn run_handshake(client: &mut Engine, server: &mut Engine) {
    let mut buf = vec![0u8; 64 * 1024];
    let mut client_done = false;
    let mut server_done = false;

    for _ in 0..100 {
        if client_done && server_done {
            break;
        }
        if !client_done {
            let status = client.handshake(Side::Client).expect("client handshake");
            client_done = matches!(status.want, Want::Nothing | Want::Output);
        }
        shuttle(client, server, &mut buf);
        if !server_done {
            let status = server.handshake(Side::Server).expect("server handshake");
            server_done = matches!(status.want, Want::Nothing | Want::Output);
        }
        shuttle(server, client, &mut buf);
    }

    assert!(client_done, "client handshake did not complete");
    assert!(server_done, "server handshake did not complete");
}
