//! Byte transports underneath a TLS session.
//!
//! A transport moves raw record bytes. Non-blocking transports report
//! `io::ErrorKind::WouldBlock`, which the session turns into its retryable
//! want-read / want-write errors.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};

/// Byte-stream collaborator for [`crate::TlsSession`].
pub trait Transport: Send {
    /// Send some bytes, returning how many were accepted.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receive into `buf`. `Ok(0)` means the peer closed the stream.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bytes that can be received without blocking.
    fn bytes_available(&self) -> io::Result<usize>;

    /// OS-level handle for readiness polling, if there is one.
    fn fileno(&self) -> Option<i64>;
}

impl Transport for TcpStream {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    #[cfg(unix)]
    fn bytes_available(&self) -> io::Result<usize> {
        use std::os::unix::io::AsRawFd;

        let mut pending: libc::c_int = 0;
        // FIONREAD writes a single c_int through the pointer.
        #[allow(unsafe_code)]
        let rc = unsafe { libc::ioctl(self.as_raw_fd(), libc::FIONREAD, &mut pending as *mut libc::c_int) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(usize::try_from(pending).unwrap_or(0))
    }

    #[cfg(not(unix))]
    fn bytes_available(&self) -> io::Result<usize> {
        Ok(0)
    }

    #[cfg(unix)]
    fn fileno(&self) -> Option<i64> {
        use std::os::unix::io::AsRawFd;
        Some(i64::from(self.as_raw_fd()))
    }

    #[cfg(windows)]
    fn fileno(&self) -> Option<i64> {
        use std::os::windows::io::AsRawSocket;
        i64::try_from(self.as_raw_socket()).ok()
    }

    #[cfg(not(any(unix, windows)))]
    fn fileno(&self) -> Option<i64> {
        None
    }
}

#[derive(Default)]
struct Channel {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-process, non-blocking byte pipe.
///
/// `recv` on an empty open channel returns `WouldBlock`; once the peer is
/// dropped or shut down, remaining bytes drain and then `recv` returns 0.
pub struct MemoryTransport {
    incoming: Arc<Mutex<Channel>>,
    outgoing: Arc<Mutex<Channel>>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(Channel::default()));
        let b_to_a = Arc::new(Mutex::new(Channel::default()));
        (
            Self {
                incoming: Arc::clone(&b_to_a),
                outgoing: Arc::clone(&a_to_b),
            },
            Self {
                incoming: a_to_b,
                outgoing: b_to_a,
            },
        )
    }

    /// Close both directions. The peer sees end-of-stream after draining.
    pub fn shutdown(&self) {
        for channel in [&self.incoming, &self.outgoing] {
            if let Ok(mut ch) = channel.lock() {
                ch.closed = true;
            }
        }
    }

    fn lock(channel: &Mutex<Channel>) -> io::Result<MutexGuard<'_, Channel>> {
        channel
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory transport lock poisoned"))
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut ch = Self::lock(&self.outgoing)?;
        if ch.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        ch.buf.extend(buf);
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut ch = Self::lock(&self.incoming)?;
        if ch.buf.is_empty() {
            return if ch.closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(ch.buf.len());
        for (slot, byte) in buf.iter_mut().zip(ch.buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn bytes_available(&self) -> io::Result<usize> {
        Ok(Self::lock(&self.incoming)?.buf.len())
    }

    fn fileno(&self) -> Option<i64> {
        None
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `Read`/`Write` view over a transport, as the record layer expects.
pub(crate) struct TransportIo<'a>(pub(crate) &'a mut dyn Transport);

impl Read for TransportIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.recv(buf)
    }
}

impl Write for TransportIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
