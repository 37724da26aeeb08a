use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;
use crate::loopback::LoopbackStream;

/// A connected byte stream: implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// Channels clone it so one handle can read while another writes or
/// shuts the connection down.
pub struct WireStream {
    inner: WireStreamInner,
}

enum WireStreamInner {
    Tcp(TcpStream),
    Loopback(LoopbackStream),
}

impl Read for WireStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            WireStreamInner::Tcp(stream) => stream.read(buf),
            WireStreamInner::Loopback(stream) => stream.read(buf),
        }
    }
}

impl Write for WireStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            WireStreamInner::Tcp(stream) => stream.write(buf),
            WireStreamInner::Loopback(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            WireStreamInner::Tcp(stream) => stream.flush(),
            WireStreamInner::Loopback(stream) => stream.flush(),
        }
    }
}

impl WireStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: WireStreamInner::Tcp(stream),
        }
    }

    /// A connected in-process pair.
    pub fn loopback_pair() -> (Self, Self) {
        let (a, b) = LoopbackStream::pair();
        (
            Self {
                inner: WireStreamInner::Loopback(a),
            },
            Self {
                inner: WireStreamInner::Loopback(b),
            },
        )
    }

    /// Set read timeout on the underlying stream.
    ///
    /// An expired timeout surfaces from `read` as `WouldBlock` or `TimedOut`.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            WireStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            WireStreamInner::Loopback(stream) => {
                stream.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Set write timeout on the underlying stream. Loopback writes never block.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            WireStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            WireStreamInner::Loopback(_) => Ok(()),
        }
    }

    /// Try to clone this stream (a new handle to the same connection).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            WireStreamInner::Tcp(stream) => WireStreamInner::Tcp(stream.try_clone()?),
            WireStreamInner::Loopback(stream) => WireStreamInner::Loopback(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Shut down both directions; blocked readers on either side see EOF.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            WireStreamInner::Tcp(stream) => match stream.shutdown(Shutdown::Both) {
                Err(err) if err.kind() != std::io::ErrorKind::NotConnected => Err(err.into()),
                _ => Ok(()),
            },
            WireStreamInner::Loopback(stream) => {
                stream.shutdown();
                Ok(())
            }
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            WireStreamInner::Tcp(_) => "tcp",
            WireStreamInner::Loopback(_) => "loopback",
        }
    }
}

impl std::fmt::Debug for WireStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("WireStream");
        debug.field("type", &self.transport_name());
        if let WireStreamInner::Tcp(stream) = &self.inner {
            debug.field("peer", &stream.peer_addr().ok());
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_connection() {
        let (mut a, b) = WireStream::loopback_pair();
        let mut reader = b.try_clone().unwrap();
        a.write_all(b"hi").unwrap();
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");

        b.shutdown().unwrap();
        assert_eq!(a.read(&mut buf).unwrap(), 0);
        assert_eq!(a.transport_name(), "loopback");
    }
}
