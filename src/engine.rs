use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use openssl::error::ErrorStack;
use openssl::ssl::{ErrorCode, ShutdownResult, ShutdownState};
use openssl::ssl::{Ssl, SslOptions, SslStream, SslVerifyMode};
use openssl::x509::X509StoreContextRef;

use crate::buffer::IoBuffer;
use crate::cookie::{AppData, GenerateCookie, VerifyCookie, APP_DATA_INDEX};
use crate::{Config, Error, Side};

/// What the engine needs from the transport to make progress.
///
/// Every driving operation returns one of these. `Nothing` means the
/// operation is complete (successfully, or with the error carried in the
/// `Err` arm of the result). The other variants are cooperative yields:
/// the caller moves ciphertext and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    /// Operation complete; nothing further to move.
    Nothing,
    /// Feed a received datagram via [`Engine::put_input`], then retry the
    /// same operation.
    InputAndRetry,
    /// Ciphertext is pending and the operation is complete: drain via
    /// [`Engine::get_output`] and send, then done.
    Output,
    /// Ciphertext is pending and the operation needs more I/O: drain,
    /// send, then continue driving.
    OutputAndRetry,
}

/// Result of one driving operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// The cooperative-yield signal.
    pub want: Want,
    /// Plaintext bytes transferred by this step (reads/writes), or the
    /// raw library result for shutdown (0 = unidirectional so far).
    pub bytes: usize,
}

impl Status {
    fn new(want: Want, bytes: usize) -> Status {
        Status { want, bytes }
    }
}

/// Record engine: one TLS session driven through an in-memory datagram
/// buffer pair.
///
/// The engine is Sans-IO: operations never block and never touch a
/// socket. They return a [`Want`] signal that the session driver (or any
/// custom event loop) translates into datagram reads and writes via
/// [`Engine::put_input`] and [`Engine::get_output`].
pub struct Engine {
    config: Arc<Config>,

    /// Session state. `Setup` until the first driving operation; the
    /// session handle can only be reconfigured while in `Setup`.
    tls: Option<Tls>,

    /// Per-session record the C callback trampolines recover via the
    /// session handle. Lives exactly as long as the engine.
    app_data: Arc<AppData>,

    /// Whether the stateless cookie exchange has been armed.
    listen_armed: bool,
}

enum Tls {
    Setup { ssl: Ssl, buffer: IoBuffer },
    Active(SslStream<IoBuffer>),
}

impl Engine {
    /// Create a new engine from the shared configuration.
    ///
    /// Pins the configured MTU on the session (disabling the library's
    /// own MTU query) and attaches the application-data record.
    pub fn new(config: Arc<Config>) -> Result<Engine, Error> {
        let app_data = Arc::new(AppData::default());
        let ssl = new_ssl(&config, &app_data)?;

        Ok(Engine {
            config,
            tls: Some(Tls::Setup {
                ssl,
                buffer: IoBuffer::default(),
            }),
            app_data,
            listen_armed: false,
        })
    }

    /// Discard the session state and start over with a fresh session.
    ///
    /// Installed cookie callbacks survive (they live in the app-data
    /// record, which is re-attached to the new session handle).
    pub(crate) fn reset(&mut self) -> Result<(), Error> {
        let ssl = new_ssl(&self.config, &self.app_data)?;
        self.tls = Some(Tls::Setup {
            ssl,
            buffer: IoBuffer::default(),
        });
        self.listen_armed = false;
        self.app_data.reset_cookie_verified();
        Ok(())
    }

    /// Pin a path MTU on the session.
    ///
    /// Returns whether the set took effect exactly. Once the first
    /// driving operation has run the session can no longer be
    /// reconfigured and this returns false.
    pub fn set_mtu(&mut self, mtu: usize) -> bool {
        match self.tls.as_mut() {
            Some(Tls::Setup { ssl, .. }) => ssl.set_mtu(mtu as u32).is_ok(),
            _ => false,
        }
    }

    /// Install the cookie generator for this session.
    pub fn set_cookie_generate_callback(&mut self, cb: Arc<dyn GenerateCookie>) {
        self.app_data.set_generate(Some(cb));
    }

    /// Install the cookie verifier for this session.
    pub fn set_cookie_verify_callback(&mut self, cb: Arc<dyn VerifyCookie>) {
        self.app_data.set_verify(Some(cb));
    }

    /// Set the peer-certificate verification mode for this session.
    ///
    /// Returns false once the session is active (too late to change).
    pub fn set_verify_mode(&mut self, mode: SslVerifyMode) -> bool {
        match self.tls.as_mut() {
            Some(Tls::Setup { ssl, .. }) => {
                ssl.set_verify(mode);
                true
            }
            _ => false,
        }
    }

    /// Set the peer-certificate verification callback for this session.
    ///
    /// Returns false once the session is active (too late to change).
    pub fn set_verify_callback<F>(&mut self, mode: SslVerifyMode, callback: F) -> bool
    where
        F: Fn(bool, &mut X509StoreContextRef) -> bool + Send + Sync + 'static,
    {
        match self.tls.as_mut() {
            Some(Tls::Setup { ssl, .. }) => {
                ssl.set_verify_callback(mode, callback);
                true
            }
            _ => false,
        }
    }

    /// Set or clear the transient peer endpoint the cookie trampolines
    /// see. Set immediately before a [`Engine::dtls_listen`] drive and
    /// cleared after it.
    pub fn set_transient_peer(&mut self, peer: Option<SocketAddr>) {
        self.app_data.set_peer(peer);
    }

    /// Whether a ClientHello carrying a cookie the verifier accepted has
    /// been absorbed. This is the readiness signal of the listen step.
    pub fn is_cookie_verified(&self) -> bool {
        self.app_data.is_cookie_verified()
    }

    /// Drive one step of the handshake in the given direction.
    pub fn handshake(&mut self, side: Side) -> Result<Status, Error> {
        match side {
            Side::Client => self.perform(|stream| stream.connect().map(|()| 0)),
            Side::Server => self.perform(|stream| stream.accept().map(|()| 0)),
        }
    }

    /// Drive one step of the stateless listen/cookie exchange.
    ///
    /// The first call arms the server state machine with the cookie
    /// exchange enabled; each step then absorbs queued input. A
    /// HelloVerifyRequest shows up as pending output; a verified cookie
    /// echo flips [`Engine::is_cookie_verified`].
    ///
    /// Requires OpenSSL 1.1.1 or later.
    pub fn dtls_listen(&mut self) -> Result<Status, Error> {
        self.arm_listen()?;
        self.perform(|stream| stream.accept().map(|()| 0))
    }

    /// Drive the bidirectional close.
    ///
    /// If the first attempt only completes the unidirectional close, a
    /// second attempt is issued within the same call.
    pub fn shutdown(&mut self) -> Result<Status, Error> {
        let first = self.perform(shutdown_op)?;
        if first.bytes == 0 && matches!(first.want, Want::Nothing | Want::Output) {
            return self.perform(shutdown_op);
        }
        Ok(first)
    }

    /// Read plaintext from the session into `buf`.
    ///
    /// A zero-length `buf` completes immediately with 0 bytes and does
    /// not alter buffer state.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Status, Error> {
        if buf.is_empty() {
            return Ok(Status::new(Want::Nothing, 0));
        }
        self.perform(|stream| stream.ssl_read(buf))
    }

    /// Write plaintext from `buf` into the session.
    ///
    /// A zero-length `buf` completes immediately with 0 bytes and does
    /// not alter buffer state.
    pub fn write(&mut self, buf: &[u8]) -> Result<Status, Error> {
        if buf.is_empty() {
            return Ok(Status::new(Want::Nothing, 0));
        }
        self.perform(|stream| stream.ssl_write(buf))
    }

    /// Drain one pending ciphertext datagram into `buf`.
    ///
    /// Returns the datagram length, 0 when nothing is pending.
    pub fn get_output(&mut self, buf: &mut [u8]) -> usize {
        match self.buffer_mut() {
            Some(buffer) => buffer.take_output(buf),
            None => 0,
        }
    }

    /// Queue one received ciphertext datagram for the session.
    ///
    /// The queue preserves datagram boundaries and always consumes the
    /// whole buffer.
    pub fn put_input(&mut self, datagram: &[u8]) {
        if let Some(buffer) = self.buffer_mut() {
            buffer.put_input(datagram);
        }
    }

    /// Ciphertext bytes buffered towards the network.
    pub fn pending_output(&self) -> usize {
        match self.tls.as_ref() {
            Some(Tls::Setup { buffer, .. }) => buffer.pending_output(),
            Some(Tls::Active(stream)) => stream.get_ref().pending_output(),
            None => 0,
        }
    }

    /// Whether the peer's protocol-level shutdown has been received.
    pub fn received_shutdown(&mut self) -> bool {
        match self.tls.as_mut() {
            Some(Tls::Active(stream)) => stream.get_shutdown().contains(ShutdownState::RECEIVED),
            _ => false,
        }
    }

    /// Post-process a transport EOF.
    ///
    /// An EOF while ciphertext is still pending, or before the peer's
    /// protocol-level shutdown arrived, is reclassified as
    /// [`Error::StreamTruncated`]. Everything else passes through.
    pub fn map_error(&mut self, err: Error) -> Error {
        match err {
            Error::Eof if self.pending_output() > 0 || !self.received_shutdown() => {
                Error::StreamTruncated
            }
            err => err,
        }
    }

    fn arm_listen(&mut self) -> Result<(), Error> {
        if self.listen_armed {
            return Ok(());
        }
        let Some(Tls::Setup { ssl, .. }) = self.tls.as_mut() else {
            // The handshake already started without the cookie exchange.
            return Err(Error::InvalidArgument);
        };
        ssl.set_options(SslOptions::COOKIE_EXCHANGE);
        self.app_data.reset_cookie_verified();
        self.listen_armed = true;
        Ok(())
    }

    fn buffer_mut(&mut self) -> Option<&mut IoBuffer> {
        match self.tls.as_mut() {
            Some(Tls::Setup { buffer, .. }) => Some(buffer),
            Some(Tls::Active(stream)) => Some(stream.get_mut()),
            None => None,
        }
    }

    fn stream(&mut self) -> Result<&mut SslStream<IoBuffer>, Error> {
        if matches!(self.tls.as_ref(), Some(Tls::Setup { .. })) {
            // Unwrap is ok, we just checked the variant.
            let Some(Tls::Setup { ssl, buffer }) = self.tls.take() else {
                unreachable!();
            };
            self.tls = Some(Tls::Active(SslStream::new(ssl, buffer)?));
        }
        match self.tls.as_mut() {
            Some(Tls::Active(stream)) => Ok(stream),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Run one library operation and classify its outcome into a [`Want`].
    ///
    /// The tie-break matters: a completed step that flushed ciphertext is
    /// reported as `Output` (one final drain, then done), while a step
    /// that flushed ciphertext but still needs I/O is `OutputAndRetry`.
    fn perform<F>(&mut self, mut op: F) -> Result<Status, Error>
    where
        F: FnMut(&mut SslStream<IoBuffer>) -> Result<usize, openssl::ssl::Error>,
    {
        let stream = self.stream()?;

        let pending_before = stream.get_ref().pending_output();
        let result = op(stream);
        let pending_after = stream.get_ref().pending_output();

        let err = match result {
            Ok(bytes) => {
                let want = if pending_after > pending_before {
                    Want::Output
                } else {
                    Want::Nothing
                };
                return Ok(Status::new(want, bytes));
            }
            Err(err) => err,
        };

        let code = err.code();
        if code == ErrorCode::WANT_WRITE {
            Ok(Status::new(Want::OutputAndRetry, 0))
        } else if code == ErrorCode::WANT_READ {
            let want = if pending_after > pending_before {
                Want::OutputAndRetry
            } else {
                Want::InputAndRetry
            };
            Ok(Status::new(want, 0))
        } else if code == ErrorCode::ZERO_RETURN {
            Err(Error::Eof)
        } else if code == ErrorCode::SSL {
            match err.ssl_error() {
                Some(stack) => Err(Error::Ssl(stack.clone())),
                None => Err(Error::Ssl(ErrorStack::get())),
            }
        } else if code == ErrorCode::SYSCALL {
            match err.into_io_error() {
                Ok(io) => Err(Error::Io(io)),
                // A syscall result without a queued code is a
                // transport-level EOF; classify by the shutdown flag.
                Err(_) => {
                    if stream.get_shutdown().contains(ShutdownState::RECEIVED) {
                        Err(Error::Eof)
                    } else {
                        Ok(Status::new(Want::Nothing, 0))
                    }
                }
            }
        } else {
            Err(Error::Ssl(ErrorStack::get()))
        }
    }
}

fn new_ssl(config: &Config, app_data: &Arc<AppData>) -> Result<Ssl, Error> {
    let mut ssl = Ssl::new(config.context())?;
    ssl.set_mtu(config.mtu() as u32)?;
    ssl.set_ex_data(*APP_DATA_INDEX, app_data.clone());
    Ok(ssl)
}

fn shutdown_op(stream: &mut SslStream<IoBuffer>) -> Result<usize, openssl::ssl::Error> {
    stream.shutdown().map(|result| match result {
        ShutdownResult::Sent => 0,
        ShutdownResult::Received => 1,
    })
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.tls.as_ref() {
            Some(Tls::Setup { .. }) => "setup",
            Some(Tls::Active(_)) => "active",
            None => "poisoned",
        };
        f.debug_struct("Engine")
            .field("state", &state)
            .field("pending_output", &self.pending_output())
            .field("listen_armed", &self.listen_armed)
            .finish()
    }
}
