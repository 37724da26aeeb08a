use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::warn;
use wireprims_transport::WireStream;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally, so callers always get complete frames.
/// A read that times out keeps what it has buffered; the next call resumes.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match decode_frame(&mut self.buf, self.config.max_payload_size) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, buffered = self.buf.len(), "rejecting frame stream");
                    return Err(err);
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<WireStream> {
    /// Create a frame reader for `WireStream` and apply read timeout from config.
    pub fn with_config_stream(mut inner: WireStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the read timeout of the underlying stream.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.config.read_timeout = timeout;
        self.inner
            .set_read_timeout(timeout)
            .map_err(transport_to_frame_error)
    }
}

pub(crate) fn transport_to_frame_error(err: wireprims_transport::TransportError) -> FrameError {
    match err {
        wireprims_transport::TransportError::Io(io)
        | wireprims_transport::TransportError::Accept(io) => FrameError::Io(io),
        wireprims_transport::TransportError::Bind { source, .. }
        | wireprims_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, HEADER_SIZE, MAGIC};
    use crate::document::{flags, DocumentKind, METADATA, TEXT_WIRE};

    #[test]
    fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame(METADATA, b"hello", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert!(frame.is_metadata());
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn frames_keep_their_document_kind_and_wire() {
        let documents: [(DocumentKind, bool, &[u8]); 4] = [
            (DocumentKind::Data, false, b"binary data"),
            (DocumentKind::Metadata, false, b"binary header"),
            (DocumentKind::Data, true, b"text data"),
            (DocumentKind::Metadata, true, b"text heartbeat"),
        ];
        let mut wire = BytesMut::new();
        for (kind, text, payload) in documents {
            encode_frame(flags(kind, text), payload, &mut wire).expect("known flags should encode");
        }

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        for (kind, text, payload) in documents {
            let frame = reader.read_frame().expect("frame should decode");
            assert_eq!(frame.kind(), kind);
            assert_eq!(frame.is_metadata(), kind == DocumentKind::Metadata);
            assert_eq!(frame.is_text(), text);
            assert_eq!(frame.payload.as_ref(), payload);
        }
        assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn unknown_flags_in_stream_are_rejected() {
        let mut wire = BytesMut::new();
        encode_frame(METADATA, b"ok", &mut wire).expect("known flags should encode");
        wire.put_slice(&MAGIC);
        wire.put_u32_le(2);
        wire.put_u16_le(TEXT_WIRE | 0x0100);
        wire.put_slice(b"no");

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let first = reader.read_frame().expect("first frame should decode");
        assert!(first.is_metadata());
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::UnknownFlags(f) if f == TEXT_WIRE | 0x0100));
        assert_eq!(reader.buffered(), HEADER_SIZE + 2, "rejected frame stays buffered");
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let mut wire = BytesMut::new();
        encode_frame(0, &payload, &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_frame(TEXT_WIRE, b"slow", &mut wire).unwrap();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap();
        assert!(frame.is_text());
        assert_eq!(frame.payload.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(16);
        partial.put_u16_le(0);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn invalid_magic_in_stream() {
        let bytes = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u32_le(1024);
        wire.put_u16_le(0);

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn roundtrip_over_loopback() {
        let (left, right) = WireStream::loopback_pair();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send(METADATA, b"ping").unwrap();
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.kind(), DocumentKind::Metadata);
        assert_eq!(frame.payload.as_ref(), b"ping");
    }

    #[test]
    fn concurrent_reader_writer_threads() {
        let (left, right) = WireStream::loopback_pair();
        let mut writer = crate::writer::FrameWriter::new(left);
        let reader = Arc::new(Mutex::new(FrameReader::new(right)));

        let reader_thread = {
            let reader = Arc::clone(&reader);
            std::thread::spawn(move || {
                for expected in 0..64u16 {
                    let frame = reader.lock().unwrap().read_frame().unwrap();
                    let kind = if expected % 8 == 0 {
                        DocumentKind::Metadata
                    } else {
                        DocumentKind::Data
                    };
                    assert_eq!(frame.kind(), kind);
                    assert!(!frame.is_text());
                    assert_eq!(frame.payload.as_ref(), format!("msg-{expected}").as_bytes());
                }
            })
        };

        for i in 0..64u16 {
            let payload = format!("msg-{i}");
            let kind = if i % 8 == 0 {
                DocumentKind::Metadata
            } else {
                DocumentKind::Data
            };
            writer.send(flags(kind, false), payload.as_bytes()).unwrap();
        }

        reader_thread.join().unwrap();
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let mut wire = BytesMut::new();
        encode_frame(0, b"ok", &mut wire).unwrap();

        let reader = WouldBlockThenData {
            state: 0,
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(err.is_timeout());

        // The retry picks the frame up.
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    struct WouldBlockThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for WouldBlockThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_frame(METADATA, b"ok", &mut wire).unwrap();

        let reader = InterruptedThenData {
            state: 0,
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert!(frame.is_metadata());
        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn applies_read_timeout_for_wire_stream() {
        let (_left, right) = WireStream::loopback_pair();
        let cfg = FrameConfig {
            read_timeout: Some(Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let mut reader = FrameReader::with_config_stream(right, cfg).unwrap();
        let err = reader.read_frame().unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn roundtrip_over_tcp() {
        let endpoint = wireprims_transport::TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr().to_string();

        let server = std::thread::spawn(move || {
            let stream = endpoint.accept().unwrap();
            let mut reader = FrameReader::new(stream);
            let frame = reader.read_frame().unwrap();
            assert!(frame.is_text());
            assert_eq!(frame.payload.as_ref(), b"tcp");
        });

        let stream =
            wireprims_transport::TcpEndpoint::connect(&addr, Duration::from_secs(2)).unwrap();
        let mut writer = crate::writer::FrameWriter::new(stream);
        writer.send(TEXT_WIRE, b"tcp").unwrap();

        server.join().unwrap();
    }
}
