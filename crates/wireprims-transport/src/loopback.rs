use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Longest a blocked read waits before re-checking for shutdown.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

/// One end of an in-process byte pipe pair.
///
/// Writes are delivered as chunks over a channel; reads drain them. Shutting
/// down either end makes both ends read EOF.
pub struct LoopbackStream {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    pending: Arc<Mutex<BytesMut>>,
    closed: Arc<AtomicBool>,
    read_timeout: Option<Duration>,
}

impl LoopbackStream {
    /// A connected pair of streams.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = crossbeam_channel::unbounded();
        let (b_tx, a_rx) = crossbeam_channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let end = |tx, rx| Self {
            tx,
            rx,
            pending: Arc::new(Mutex::new(BytesMut::new())),
            closed: Arc::clone(&closed),
            read_timeout: None,
        };
        (end(a_tx, a_rx), end(b_tx, b_rx))
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Another handle to the same end. Clones share buffered input.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            pending: Arc::clone(&self.pending),
            closed: Arc::clone(&self.closed),
            read_timeout: self.read_timeout,
        })
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn drain_pending(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| io::Error::other("loopback buffer poisoned"))?;
        let n = buf.len().min(pending.len());
        buf[..n].copy_from_slice(&pending[..n]);
        pending.advance(n);
        Ok(n)
    }

    fn stash(&self, chunk: &[u8]) -> io::Result<()> {
        self.pending
            .lock()
            .map_err(|_| io::Error::other("loopback buffer poisoned"))?
            .extend_from_slice(chunk);
        Ok(())
    }
}

impl Read for LoopbackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = self.read_timeout.map(|t| Instant::now() + t);
        loop {
            let n = self.drain_pending(buf)?;
            if n > 0 {
                return Ok(n);
            }
            if self.is_closed() {
                // Bytes written before the shutdown are still delivered.
                match self.rx.try_recv() {
                    Ok(chunk) => {
                        self.stash(&chunk)?;
                        continue;
                    }
                    Err(_) => return Ok(0),
                }
            }

            let wait = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(io::Error::new(
                            io::ErrorKind::WouldBlock,
                            "loopback read timed out",
                        ));
                    }
                    left.min(SHUTDOWN_CHECK)
                }
                None => SHUTDOWN_CHECK,
            };
            match self.rx.recv_timeout(wait) {
                Ok(chunk) => self.stash(&chunk)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
    }
}

impl Write for LoopbackStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback stream shut down",
            ));
        }
        self.tx
            .send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback peer dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for LoopbackStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_flow_both_ways() {
        let (mut a, mut b) = LoopbackStream::pair();
        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").unwrap();
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn partial_reads_keep_the_rest() {
        let (mut a, mut b) = LoopbackStream::pair();
        a.write_all(b"abcdef").unwrap();
        let mut two = [0u8; 2];
        b.read_exact(&mut two).unwrap();
        assert_eq!(&two, b"ab");
        let mut clone = b.try_clone().unwrap();
        let mut four = [0u8; 4];
        clone.read_exact(&mut four).unwrap();
        assert_eq!(&four, b"cdef");
    }

    #[test]
    fn read_timeout_surfaces_would_block() {
        let (_a, mut b) = LoopbackStream::pair();
        b.set_read_timeout(Some(Duration::from_millis(20)));
        let err = b.read(&mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn shutdown_reads_eof_on_both_ends() {
        let (a, mut b) = LoopbackStream::pair();
        let reader = std::thread::spawn(move || b.read(&mut [0u8; 1]).unwrap());
        std::thread::sleep(Duration::from_millis(20));
        a.shutdown();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn shutdown_delivers_bytes_already_written() {
        let (mut a, mut b) = LoopbackStream::pair();
        a.write_all(b"last").unwrap();
        a.shutdown();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"last");
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn dropped_peer_is_eof_and_broken_pipe() {
        let (a, mut b) = LoopbackStream::pair();
        drop(a);
        assert_eq!(b.read(&mut [0u8; 1]).unwrap(), 0);
        let err = b.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
