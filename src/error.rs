use std::io;

/// Errors produced by the engine, session driver and acceptor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A fatal protocol error reported by the TLS library.
    #[error("{0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// A system error from the underlying socket, or a TLS syscall
    /// error carrying a queued system code.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// The peer performed a protocol-level shutdown (clean EOF).
    #[error("end of stream")]
    Eof,

    /// The transport ended while ciphertext was still pending, or before
    /// a protocol-level shutdown was received.
    #[error("stream truncated")]
    StreamTruncated,

    /// The operation was cancelled.
    #[error("operation aborted")]
    Aborted,

    /// `accept` was started without both cookie callbacks installed.
    #[error("cookie generate/verify callbacks not installed")]
    MissingCookieCallbacks,

    /// The session has no datagram socket attached yet.
    #[error("no socket attached to session")]
    NotConnected,

    /// The requested combination of modes/arguments makes no sense.
    #[error("invalid argument")]
    InvalidArgument,

    /// A deadline expired. The string names the operation.
    #[error("timeout: {0}")]
    Timeout(&'static str),
}

impl Error {
    /// True if this is the clean end-of-stream marker.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }
}
