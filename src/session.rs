use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::time;

use crate::cookie::{GenerateCookie, VerifyCookie};
use crate::engine::{Engine, Status, Want};
use crate::{Config, Error, Side};

/// Ciphertext scratch size. Large enough for any UDP payload.
const SCRATCH_LEN: usize = 64 * 1024;

/// Per-peer DTLS association over a connected datagram socket.
///
/// Pairs a record [`Engine`] with a connected [`UdpSocket`] and drives the
/// engine's want signals: pending ciphertext is sent, requests for input
/// await a datagram. The socket is attached either by an
/// [`Acceptor`](crate::Acceptor) promoting a verified peer, or directly by
/// the caller ([`DtlsSocket::with_socket`]) for the client role.
pub struct DtlsSocket {
    config: Arc<Config>,
    engine: Engine,
    socket: Option<UdpSocket>,
    scratch: Vec<u8>,
}

impl DtlsSocket {
    /// Create a session with no transport attached yet.
    ///
    /// This is the shape an acceptor expects: the listening side attaches
    /// a freshly connected socket once the peer's cookie is verified.
    pub fn new(config: Arc<Config>) -> Result<DtlsSocket, Error> {
        let engine = Engine::new(config.clone())?;
        Ok(DtlsSocket {
            config,
            engine,
            socket: None,
            scratch: vec![0; SCRATCH_LEN],
        })
    }

    /// Create a session over an already connected socket (client role).
    pub fn with_socket(config: Arc<Config>, socket: UdpSocket) -> Result<DtlsSocket, Error> {
        let mut session = DtlsSocket::new(config)?;
        session.socket = Some(socket);
        Ok(session)
    }

    /// Attach a connected socket, returning any previous one.
    pub fn set_socket(&mut self, socket: UdpSocket) -> Option<UdpSocket> {
        self.socket.replace(socket)
    }

    /// The attached socket, if any.
    pub fn socket(&self) -> Option<&UdpSocket> {
        self.socket.as_ref()
    }

    /// Local endpoint of the attached socket.
    pub fn local_endpoint(&self) -> Result<SocketAddr, Error> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        Ok(socket.local_addr()?)
    }

    /// Peer endpoint of the attached socket.
    pub fn peer_endpoint(&self) -> Result<SocketAddr, Error> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        Ok(socket.peer_addr()?)
    }

    /// The record engine backing this session.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Mutable access to the record engine.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Pin a path MTU on the session. See [`Engine::set_mtu`].
    pub fn set_mtu(&mut self, mtu: usize) -> bool {
        self.engine.set_mtu(mtu)
    }

    /// Install the cookie generator for this session.
    pub fn set_cookie_generate_callback(&mut self, cb: impl GenerateCookie + 'static) {
        self.engine.set_cookie_generate_callback(Arc::new(cb));
    }

    /// Install the cookie verifier for this session.
    pub fn set_cookie_verify_callback(&mut self, cb: impl VerifyCookie + 'static) {
        self.engine.set_cookie_verify_callback(Arc::new(cb));
    }

    /// Drive the handshake to completion in the given direction.
    ///
    /// Bounded by the configured handshake timeout.
    pub async fn handshake(&mut self, side: Side) -> Result<(), Error> {
        let timeout = self.config.handshake_timeout();
        match time::timeout(timeout, self.drive(|engine| engine.handshake(side))).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(Error::Timeout("handshake")),
        }
    }

    /// Read plaintext from the peer into `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.drive(|engine| engine.read(buf)).await
    }

    /// Write plaintext to the peer. Returns the bytes consumed.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.drive(|engine| engine.write(buf)).await
    }

    /// Drive the bidirectional close.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.drive(|engine| engine.shutdown()).await.map(|_| ())
    }

    /// One round of the stateless cookie exchange, on behalf of an
    /// acceptor.
    ///
    /// Feeds `datagram` (received on the *listening* socket from `peer`)
    /// into the engine and drives the listen step. A HelloVerifyRequest
    /// produced along the way is sent back through the listening socket.
    /// Returns true once a ClientHello with a verified cookie has been
    /// absorbed; the server flight queued past that point is retained and
    /// flushed through the promoted socket by the next handshake drive.
    pub(crate) async fn verify_cookie(
        &mut self,
        listener: &UdpSocket,
        datagram: &[u8],
        peer: SocketAddr,
    ) -> Result<bool, Error> {
        self.engine.set_transient_peer(Some(peer));
        let result = self.listen_step(listener, datagram, peer).await;
        self.engine.set_transient_peer(None);

        match result {
            Ok(ready) => Ok(ready),
            Err(err) => {
                // A hostile or malformed datagram must not wedge the
                // listener: start the session over and keep listening.
                debug!("listen step failed for {}: {}", peer, err);
                self.engine.reset()?;
                Ok(false)
            }
        }
    }

    async fn listen_step(
        &mut self,
        listener: &UdpSocket,
        datagram: &[u8],
        peer: SocketAddr,
    ) -> Result<bool, Error> {
        self.engine.put_input(datagram);

        loop {
            let status = self.engine.dtls_listen()?;

            if self.engine.is_cookie_verified() {
                return Ok(true);
            }

            match status.want {
                Want::Output | Want::OutputAndRetry => {
                    loop {
                        let n = self.engine.get_output(&mut self.scratch);
                        if n == 0 {
                            break;
                        }
                        trace!("listen reply: {} bytes to {}", n, peer);
                        listener.send_to(&self.scratch[..n], peer).await?;
                    }
                    if status.want == Want::Output {
                        return Ok(false);
                    }
                }
                Want::InputAndRetry | Want::Nothing => return Ok(false),
            }
        }
    }

    /// The driver loop: run one engine operation, translating want
    /// signals into socket sends and receives until the operation
    /// completes.
    async fn drive<F>(&mut self, mut op: F) -> Result<usize, Error>
    where
        F: FnMut(&mut Engine) -> Result<Status, Error>,
    {
        if self.socket.is_none() {
            return Err(Error::NotConnected);
        }

        loop {
            let status = match op(&mut self.engine) {
                Ok(status) => status,
                Err(err) => return Err(self.engine.map_error(err)),
            };

            match status.want {
                Want::Nothing => return Ok(status.bytes),
                Want::Output => {
                    self.flush().await?;
                    return Ok(status.bytes);
                }
                Want::OutputAndRetry => {
                    self.flush().await?;
                }
                Want::InputAndRetry => {
                    // Anything still queued (e.g. the server flight held
                    // back across promotion) goes out before we wait.
                    self.flush().await?;
                    let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
                    let n = socket.recv(&mut self.scratch).await?;
                    self.engine.put_input(&self.scratch[..n]);
                }
            }
        }
    }

    /// Send every pending ciphertext datagram on the attached socket.
    async fn flush(&mut self) -> Result<(), Error> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        loop {
            let n = self.engine.get_output(&mut self.scratch);
            if n == 0 {
                return Ok(());
            }
            socket.send(&self.scratch[..n]).await?;
        }
    }
}
