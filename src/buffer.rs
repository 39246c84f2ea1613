use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};

/// In-memory datagram buffer pair bridging the TLS session and the network.
///
/// The TLS library reads and writes through the [`Read`]/[`Write`] half (the
/// internal side); the application drains and fills the queues through
/// [`IoBuffer::take_output`] and [`IoBuffer::put_input`] (the external side).
///
/// Datagram boundaries are preserved in both directions: each queued
/// incoming buffer is handed to the library as one read, and each write the
/// library performs becomes one outgoing datagram.
#[derive(Default)]
pub(crate) struct IoBuffer {
    incoming: VecDeque<Vec<u8>>,
    outgoing: VecDeque<Vec<u8>>,
}

impl IoBuffer {
    /// Queue one received ciphertext datagram for the TLS session.
    pub fn put_input(&mut self, datagram: &[u8]) {
        self.incoming.push_back(datagram.to_vec());
    }

    /// Move the next pending ciphertext datagram into `buf`.
    ///
    /// Returns the number of bytes copied, 0 when nothing is pending. A
    /// datagram larger than `buf` is truncated to fit; callers size their
    /// scratch buffers at 64 KiB, above any possible UDP payload.
    pub fn take_output(&mut self, buf: &mut [u8]) -> usize {
        let Some(datagram) = self.outgoing.pop_front() else {
            return 0;
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        n
    }

    /// Total ciphertext bytes queued towards the network.
    pub fn pending_output(&self) -> usize {
        self.outgoing.iter().map(|d| d.len()).sum()
    }
}

impl Read for IoBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // One datagram per read. An empty queue is the retry signal that
        // surfaces as WANT_READ from the session.
        let Some(datagram) = self.incoming.pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }
}

impl Write for IoBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.push_back(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuffer")
            .field("incoming", &self.incoming.len())
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}
