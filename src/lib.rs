//! udtls — asynchronous DTLS acceptor and socket over UDP
//!
//! udtls provides the server side of a DTLS deployment: a listening UDP
//! endpoint that performs the stateless cookie exchange
//! (HelloVerifyRequest / cookie echo) without allocating per-connection
//! state, then promotes each verified peer onto its own connected socket
//! carrying a per-peer DTLS session. The record layer is the `openssl`
//! crate's DTLS implementation, driven through an in-memory datagram
//! buffer pair by a small Sans-IO engine; Tokio supplies the asynchronous
//! datagram transport.
//!
//! # Goals
//! - **Stateless accept**: spoofed ClientHellos cost one HelloVerifyRequest
//!   datagram, never a session or a socket.
//! - **Kernel demultiplexing**: a verified peer gets a socket bound to the
//!   listener's local endpoint (with address reuse) and connected to the
//!   peer, so per-session traffic needs no user-space routing.
//! - **Sans-IO core**: the record engine never blocks and never touches a
//!   socket; it yields want signals any event loop can drive.
//! - **Safety**: `forbid(unsafe_code)` throughout the crate.
//!
//! ## Non-goals
//! - **TCP/stream TLS**
//! - **Connection multiplexing on one socket** (each accepted peer
//!   migrates to its own socket)
//! - **Retransmission scheduling** beyond what the record library itself
//!   performs
//!
//! # Cookie exchange
//!
//! ```text
//! Client                                               Server
//!
//! 1     ClientHello                  -------->   (listening socket)
//!
//! 2                                  <--------   HelloVerifyRequest
//!                                                 (contains cookie)
//!
//! 3     ClientHello                  -------->   cookie verified:
//!       (with cookie)                            open + reuse-bind +
//!                                                connect session socket
//! 4+    ...handshake continues on the connected socket...
//! ```
//!
//! The cookie is produced and checked by callbacks installed on the
//! acceptor ([`GenerateCookie`] / [`VerifyCookie`]; [`HmacCookieFactory`]
//! is a ready-made pair). Until a peer echoes a valid cookie, the
//! listening socket answers statelessly and [`Acceptor::accept`] stays
//! pending.
//!
//! # Example (accept loop)
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use udtls::{certificate, Acceptor, Config, DtlsSocket, HmacCookieFactory, Side};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), udtls::Error> {
//!     let cert = certificate::generate_self_signed_certificate()?;
//!     let config = Arc::new(Config::builder().certificate(cert).build()?);
//!
//!     let mut acceptor = Acceptor::bind("127.0.0.1:4433".parse().unwrap())?;
//!     let cookies = HmacCookieFactory::new();
//!     acceptor.set_cookie_generate_callback(cookies.clone());
//!     acceptor.set_cookie_verify_callback(cookies);
//!
//!     let mut buf = vec![0u8; 64 * 1024];
//!     loop {
//!         let mut session = DtlsSocket::new(config.clone())?;
//!         let peer = acceptor.accept(&mut session, &mut buf).await?;
//!         println!("verified cookie from {}", peer);
//!
//!         // Each session runs on its own connected socket.
//!         tokio::spawn(async move {
//!             if session.handshake(Side::Server).await.is_err() {
//!                 return;
//!             }
//!             let mut data = vec![0u8; 2048];
//!             while let Ok(n) = session.read(&mut data).await {
//!                 if session.write(&data[..n]).await.is_err() {
//!                     break;
//!                 }
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Driving the engine directly
//!
//! [`Engine`] is usable without the Tokio layer: feed datagrams with
//! [`Engine::put_input`], drain with [`Engine::get_output`], and act on
//! the returned [`Want`] signals. [`DtlsSocket`] and [`Acceptor`] are the
//! packaged drivers for the common case.
//!
//! ### Minimum OpenSSL
//! OpenSSL 1.1.1. The stateless listen step is implemented via the
//! cookie-exchange handshake option, which the modern state machine
//! drives without any process-wide locking.
//!
//! ### MSRV
//! Rust 1.81.0
//!
#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![deny(missing_docs)]

#[macro_use]
extern crate log;

mod acceptor;
pub use acceptor::{Acceptor, SocketOption};

mod buffer;

pub mod certificate;
pub use certificate::DtlsCertificate;

mod config;
pub use config::{Config, ConfigBuilder};

mod cookie;
pub use cookie::{GenerateCookie, HmacCookieFactory, VerifyCookie, COOKIE_MAX_LEN};

mod engine;
pub use engine::{Engine, Status, Want};

mod error;
pub use error::Error;

mod session;
pub use session::DtlsSocket;

// Verification modes are the record library's own flags.
pub use openssl::ssl::SslVerifyMode;

/// Which side of the handshake an endpoint drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Active opener: drives the connect half of the handshake.
    Client,
    /// Passive opener: drives the accept half of the handshake.
    Server,
}

#[cfg(test)]
mod test {
    use super::*;

    fn is_send<T: Send>() {}
    fn is_sync<T: Sync>() {}

    #[test]
    fn public_types_are_send_sync() {
        is_send::<Engine>();
        is_send::<DtlsSocket>();
        is_send::<Acceptor>();
        is_sync::<Acceptor>();
        is_send::<Config>();
        is_sync::<Config>();
        is_send::<Error>();
        is_sync::<Error>();
    }
}
