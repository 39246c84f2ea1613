use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify};

use crate::cookie::{GenerateCookie, VerifyCookie};
use crate::session::DtlsSocket;
use crate::Error;

/// Socket options applicable to the listening socket.
///
/// A tagged set of the options a DTLS listener plausibly needs; getters
/// for the same values live directly on [`Acceptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SocketOption {
    /// SO_REUSEADDR.
    ReuseAddress(bool),
    /// SO_RCVBUF.
    RecvBufferSize(usize),
    /// SO_SNDBUF.
    SendBufferSize(usize),
    /// SO_BROADCAST.
    Broadcast(bool),
}

/// Listener performing the stateless DTLS cookie exchange.
///
/// Owns one listening UDP socket. [`Acceptor::accept`] answers initial
/// ClientHellos with a HelloVerifyRequest (stateless, via the installed
/// cookie callbacks) and, once a peer echoes a valid cookie, promotes the
/// flow: a fresh socket is bound to the listener's local endpoint with
/// address reuse and connected to the verified peer, so the kernel
/// demultiplexes that peer's traffic to the session from then on.
pub struct Acceptor {
    socket: UdpSocket,
    generate: Option<Arc<dyn GenerateCookie>>,
    verify: Option<Arc<dyn VerifyCookie>>,
    abort: Notify,
    busy: Mutex<()>,
}

impl Acceptor {
    /// Bind a listening socket to `addr`.
    ///
    /// The socket is created with address reuse enabled so promoted
    /// session sockets can share the port. Must be called from within a
    /// Tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<Acceptor, Error> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Acceptor::from_socket(socket))
    }

    /// Wrap an already bound listening socket.
    pub fn from_socket(socket: UdpSocket) -> Acceptor {
        Acceptor {
            socket,
            generate: None,
            verify: None,
            abort: Notify::new(),
            busy: Mutex::new(()),
        }
    }

    /// The listening socket.
    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    /// Close the acceptor, recovering the listening socket.
    pub fn into_socket(self) -> UdpSocket {
        self.socket
    }

    /// Local endpoint of the listening socket.
    pub fn local_endpoint(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Install the cookie generator. Replaces (and releases) any
    /// previously installed one.
    pub fn set_cookie_generate_callback(&mut self, cb: impl GenerateCookie + 'static) {
        self.generate = Some(Arc::new(cb));
    }

    /// Install the cookie verifier. Replaces (and releases) any
    /// previously installed one.
    pub fn set_cookie_verify_callback(&mut self, cb: impl VerifyCookie + 'static) {
        self.verify = Some(Arc::new(cb));
    }

    /// Accept one verified peer into `session`.
    ///
    /// `buf` is the receive scratch for the exchange (64 KiB is the
    /// conventional size). The future resolves once a peer has echoed a
    /// cookie the verifier accepts and its flow has been promoted onto a
    /// connected socket attached to `session`; the caller then drives
    /// `session.handshake(Side::Server)` to complete the handshake.
    ///
    /// Fails immediately with [`Error::MissingCookieCallbacks`] unless
    /// both cookie callbacks are installed. Receive errors and
    /// cancellation ([`Acceptor::cancel`]) surface as errors; datagrams
    /// that do not complete the exchange (spoofed sources, rejected
    /// cookies, garbage) re-arm the receive instead.
    pub async fn accept(
        &self,
        session: &mut DtlsSocket,
        buf: &mut [u8],
    ) -> Result<SocketAddr, Error> {
        // One in-flight exchange per acceptor.
        let _busy = self.busy.lock().await;

        let (Some(generate), Some(verify)) = (self.generate.clone(), self.verify.clone()) else {
            return Err(Error::MissingCookieCallbacks);
        };

        // Thread our callbacks through to the target session.
        let engine = session.engine_mut();
        engine.set_cookie_generate_callback(generate);
        engine.set_cookie_verify_callback(verify);

        loop {
            let (n, peer) = tokio::select! {
                received = self.socket.recv_from(buf) => received?,
                _ = self.abort.notified() => return Err(Error::Aborted),
            };
            trace!("listen datagram: {} bytes from {}", n, peer);

            if session.verify_cookie(&self.socket, &buf[..n], peer).await? {
                let socket = self.promote(peer)?;
                session.set_socket(socket);
                debug!("accepted verified peer {}", peer);
                return Ok(peer);
            }
            // Cookie exchange still in progress; re-arm the receive.
        }
    }

    /// Cancel a pending [`Acceptor::accept`]; it completes with
    /// [`Error::Aborted`].
    pub fn cancel(&self) {
        self.abort.notify_waiters();
    }

    /// Set an option on the listening socket.
    pub fn set_option(&self, option: SocketOption) -> Result<(), Error> {
        let socket = SockRef::from(&self.socket);
        match option {
            SocketOption::ReuseAddress(on) => socket.set_reuse_address(on)?,
            SocketOption::RecvBufferSize(size) => socket.set_recv_buffer_size(size)?,
            SocketOption::SendBufferSize(size) => socket.set_send_buffer_size(size)?,
            SocketOption::Broadcast(on) => socket.set_broadcast(on)?,
        }
        Ok(())
    }

    /// Whether SO_REUSEADDR is set on the listening socket.
    pub fn reuse_address(&self) -> Result<bool, Error> {
        Ok(SockRef::from(&self.socket).reuse_address()?)
    }

    /// SO_RCVBUF of the listening socket.
    pub fn recv_buffer_size(&self) -> Result<usize, Error> {
        Ok(SockRef::from(&self.socket).recv_buffer_size()?)
    }

    /// SO_SNDBUF of the listening socket.
    pub fn send_buffer_size(&self) -> Result<usize, Error> {
        Ok(SockRef::from(&self.socket).send_buffer_size()?)
    }

    /// Whether SO_BROADCAST is set on the listening socket.
    pub fn broadcast(&self) -> Result<bool, Error> {
        Ok(SockRef::from(&self.socket).broadcast()?)
    }

    /// Logical non-blocking mode. An async socket never blocks the
    /// caller, so this is always true.
    pub fn non_blocking(&self) -> bool {
        true
    }

    /// Native non-blocking mode of the underlying socket.
    pub fn native_non_blocking(&self) -> bool {
        true
    }

    /// Change the native non-blocking mode.
    ///
    /// Enabling is a no-op (the socket already is non-blocking).
    /// Disabling while the logical mode is non-blocking makes no sense
    /// and is rejected with [`Error::InvalidArgument`].
    pub fn set_native_non_blocking(&self, mode: bool) -> Result<(), Error> {
        if !mode {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Open a fresh socket for a verified peer: listener's protocol,
    /// address reuse, bound to the listener's local endpoint, connected
    /// to the peer.
    fn promote(&self, peer: SocketAddr) -> Result<UdpSocket, Error> {
        let local = self.socket.local_addr()?;
        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&local.into())?;
        socket.connect(&peer.into())?;
        socket.set_nonblocking(true)?;
        Ok(UdpSocket::from_std(socket.into())?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn socket_options_round_trip() {
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).expect("bind");

        assert!(acceptor.reuse_address().expect("reuse_address"));

        acceptor
            .set_option(SocketOption::Broadcast(true))
            .expect("set broadcast");
        assert!(acceptor.broadcast().expect("broadcast"));

        acceptor
            .set_option(SocketOption::RecvBufferSize(128 * 1024))
            .expect("set rcvbuf");
        assert!(acceptor.recv_buffer_size().expect("rcvbuf") > 0);
    }

    #[tokio::test]
    async fn native_non_blocking_guard() {
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).expect("bind");

        assert!(acceptor.non_blocking());
        assert!(acceptor.native_non_blocking());
        assert!(acceptor.set_native_non_blocking(true).is_ok());
        assert!(matches!(
            acceptor.set_native_non_blocking(false),
            Err(Error::InvalidArgument)
        ));
    }
}
