//! Open channels and the operations they share.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;
use wireprims_frame::{DocumentKind, FrameConfig, FrameError, FrameReader, FrameWriter};
use wireprims_transport::WireStream;
use wireprims_wire::{Result as WireResult, ValueOut, WireOut, WireValue};

use crate::config::ChannelConfig;
use crate::control::{self, TEST_MESSAGE};
use crate::document::{encode, write_history, Document};
use crate::error::{ChannelError, Result};
use crate::handshake::{read_header, write_header};
use crate::header::ChannelHeader;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Closes a channel from any thread.
///
/// Closing is idempotent and shuts the transport down, so a peer blocked
/// on a read observes end of stream.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    inner: Arc<CloseInner>,
}

#[derive(Debug)]
struct CloseInner {
    closed: AtomicBool,
    stream: WireStream,
}

impl CloseHandle {
    fn new(stream: WireStream) -> Self {
        Self {
            inner: Arc::new(CloseInner {
                closed: AtomicBool::new(false),
                stream,
            }),
        }
    }

    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.inner.stream.shutdown() {
            debug!(error = %err, "shutdown after close failed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// A connected, header-negotiated stream of documents.
pub trait WireChannel: Send + std::fmt::Debug {
    fn config(&self) -> &ChannelConfig;

    /// The header this side sent.
    fn header_out(&self) -> &ChannelHeader;

    /// The header the peer answered with.
    fn header_in(&self) -> &ChannelHeader;

    /// Write one document; `body` writes its fields.
    fn write_document(
        &mut self,
        metadata: bool,
        body: &mut dyn FnMut(&mut dyn WireOut) -> WireResult<()>,
    ) -> Result<()>;

    /// The next document, or `None` if none arrived within the poll interval.
    fn reading_document(&mut self) -> Result<Option<Document>>;

    /// Highest heartbeat timestamp seen on any metadata document read.
    fn last_test_message(&self) -> i64;

    fn close_handle(&self) -> CloseHandle;

    fn close(&mut self);

    fn is_closed(&self) -> bool {
        self.close_handle().is_closed()
    }

    /// Write a single event, preceded by the current message history when
    /// the channel records history.
    fn write_event(
        &mut self,
        event: &str,
        body: &mut dyn FnMut(&mut dyn ValueOut) -> WireResult<()>,
    ) -> Result<()> {
        if control::is_reserved(event) {
            return Err(ChannelError::IllegalArgument(format!(
                "event name '{event}' is reserved"
            )));
        }
        let record = self.config().record_history;
        self.write_document(false, &mut |out| {
            if record {
                write_history(out)?;
            }
            body(out.write(event)?)
        })
    }

    /// Send a heartbeat; the peer's echo shows up in
    /// [`WireChannel::last_test_message`].
    fn test_message(&mut self, now: i64) -> Result<()> {
        self.write_document(true, &mut |out| out.write(TEST_MESSAGE)?.int64(now))
    }

    /// Read the next payload event, skipping metadata documents and waiting
    /// as long as the channel stays open.
    fn read_one(&mut self) -> Result<(String, WireValue)> {
        let source_id = self.config().source_id;
        while !self.is_closed() {
            let Some(document) = self.reading_document()? else {
                continue;
            };
            if document.is_metadata() {
                continue;
            }
            let event = document
                .with_event(source_id, |event, value| Ok((event.to_string(), value.value()?)))?;
            if let Some(event) = event {
                return Ok(event);
            }
        }
        Err(ChannelError::Closed)
    }
}

/// What the peer's header asked for.
#[derive(Debug)]
pub enum HeaderOutcome {
    Connected(TransportChannel),
    /// Try these locations instead. The connection is already closed.
    Redirect { locations: Vec<String> },
    /// The peer refused the session.
    Failed(String),
}

/// A channel writing directly to its transport.
pub struct TransportChannel {
    id: u64,
    config: ChannelConfig,
    header_out: ChannelHeader,
    header_in: ChannelHeader,
    reader: FrameReader<WireStream>,
    writer: FrameWriter<WireStream>,
    closer: CloseHandle,
    last_test_message: i64,
    documents_read: i64,
}

impl TransportChannel {
    /// Exchange headers over a fresh connection.
    pub fn handshake(
        stream: WireStream,
        config: ChannelConfig,
        header_out: ChannelHeader,
    ) -> Result<HeaderOutcome> {
        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
            read_timeout: Some(config.read_poll),
            write_timeout: Some(config.connection_timeout),
        };
        let closer = CloseHandle::new(stream.try_clone()?);
        let mut reader = FrameReader::with_config_stream(stream.try_clone()?, frame_config.clone())?;
        let mut writer = FrameWriter::with_config_stream(stream, frame_config)?;

        let exchanged = write_header(&mut writer, &header_out, config.wire_type)
            .and_then(|()| read_header(&mut reader, config.connection_timeout));
        let header_in = match exchanged {
            Ok((header, _)) => header,
            Err(err) => {
                closer.close();
                return Err(err);
            }
        };

        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            channel_id = id,
            location = %config.location,
            header = header_in.type_name(),
            "received header"
        );

        match header_in {
            ChannelHeader::Redirect(redirect) => {
                closer.close();
                Ok(HeaderOutcome::Redirect {
                    locations: redirect.locations,
                })
            }
            ChannelHeader::ErrorReply(reply) => {
                closer.close();
                Ok(HeaderOutcome::Failed(reply.error_msg))
            }
            header_in => Ok(HeaderOutcome::Connected(Self {
                id,
                config,
                header_out,
                header_in,
                reader,
                writer,
                closer,
                last_test_message: 0,
                documents_read: 0,
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Another handle on the connection for a dedicated writer.
    pub(crate) fn writer_stream(&self) -> Result<WireStream> {
        Ok(self.writer.get_ref().try_clone()?)
    }

    pub(crate) fn write_frame(&mut self, frame: &wireprims_frame::Frame) -> Result<()> {
        if self.closer.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.writer.write_frame(frame).map_err(|err| self.closed_or(err))
    }

    fn closed_or(&self, err: FrameError) -> ChannelError {
        if self.closer.is_closed() {
            ChannelError::Closed
        } else {
            ChannelError::Frame(err)
        }
    }
}

impl WireChannel for TransportChannel {
    fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn header_out(&self) -> &ChannelHeader {
        &self.header_out
    }

    fn header_in(&self) -> &ChannelHeader {
        &self.header_in
    }

    fn write_document(
        &mut self,
        metadata: bool,
        body: &mut dyn FnMut(&mut dyn WireOut) -> WireResult<()>,
    ) -> Result<()> {
        let kind = if metadata {
            DocumentKind::Metadata
        } else {
            DocumentKind::Data
        };
        let frame = encode(self.config.wire_type, kind, body)?;
        self.write_frame(&frame)
    }

    fn reading_document(&mut self) -> Result<Option<Document>> {
        if self.closer.is_closed() {
            return Err(ChannelError::Closed);
        }
        match self.reader.read_frame() {
            Ok(frame) => {
                let document = Document::from_frame(frame, self.documents_read);
                self.documents_read += 1;
                if let Some(sent) = document.test_message()? {
                    self.last_test_message = self.last_test_message.max(sent);
                }
                Ok(Some(document))
            }
            Err(err) if err.is_timeout() => Ok(None),
            Err(FrameError::ConnectionClosed) if !self.closer.is_closed() => {
                debug!(channel_id = self.id, "peer closed the connection");
                self.closer.close();
                Err(ChannelError::Disconnected(
                    "peer closed the connection".to_string(),
                ))
            }
            Err(err) => Err(self.closed_or(err)),
        }
    }

    fn last_test_message(&self) -> i64 {
        self.last_test_message
    }

    fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    fn close(&mut self) {
        if !self.closer.is_closed() {
            debug!(channel_id = self.id, "closing channel");
        }
        self.closer.close();
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.closer.close();
    }
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel")
            .field("id", &self.id)
            .field("location", &self.config.location)
            .field("header_in", &self.header_in.type_name())
            .field("closed", &self.closer.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use wireprims_wire::WireType;

    use super::*;
    use crate::header::{ErrorReplyHeader, HandlerHeader, OkHeader, RedirectHeader};

    /// Answers the client's header with `reply`, then echoes frames.
    fn fake_gateway(stream: WireStream, reply: ChannelHeader) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut reader = FrameReader::new(stream.try_clone().unwrap());
            let mut writer = FrameWriter::new(stream);
            read_header(&mut reader, Duration::from_secs(2)).unwrap();
            write_header(&mut writer, &reply, WireType::Binary).unwrap();
            while let Ok(frame) = reader.read_frame() {
                if writer.write_frame(&frame).is_err() {
                    break;
                }
            }
        })
    }

    fn open(reply: ChannelHeader) -> (HeaderOutcome, thread::JoinHandle<()>) {
        let (client, server) = WireStream::loopback_pair();
        let gateway = fake_gateway(server, reply);
        let outcome =
            TransportChannel::handshake(client, ChannelConfig::default(), HandlerHeader::echo().into())
                .unwrap();
        (outcome, gateway)
    }

    #[test]
    fn ok_header_connects_and_echoes() {
        let (outcome, gateway) = open(OkHeader::default().into());
        let HeaderOutcome::Connected(mut channel) = outcome else {
            panic!("expected a connection");
        };
        assert!(matches!(channel.header_in(), ChannelHeader::Ok(_)));

        channel
            .write_event("say", &mut |v| v.text(Some("Hello World")))
            .unwrap();
        let (event, value) = channel.read_one().unwrap();
        assert_eq!(event, "say");
        assert_eq!(value, WireValue::Text("Hello World".into()));

        channel.test_message(99).unwrap();
        let document = loop {
            if let Some(document) = channel.reading_document().unwrap() {
                break document;
            }
        };
        assert!(document.is_metadata());
        assert_eq!(channel.last_test_message(), 99);

        channel.close();
        assert!(channel.is_closed());
        assert!(matches!(channel.reading_document(), Err(ChannelError::Closed)));
        gateway.join().unwrap();
    }

    #[test]
    fn redirect_and_error_reply_close_the_connection() {
        let (outcome, gateway) = open(RedirectHeader::new(["tcp://127.0.0.1:1"]).into());
        assert!(
            matches!(outcome, HeaderOutcome::Redirect { ref locations } if locations == &["tcp://127.0.0.1:1"])
        );
        gateway.join().unwrap();

        let (outcome, gateway) = open(ErrorReplyHeader::new("no").into());
        assert!(matches!(outcome, HeaderOutcome::Failed(ref msg) if msg == "no"));
        gateway.join().unwrap();
    }

    #[test]
    fn reserved_event_names_are_rejected() {
        let (outcome, _gateway) = open(OkHeader::default().into());
        let HeaderOutcome::Connected(mut channel) = outcome else {
            panic!("expected a connection");
        };
        let err = channel
            .write_event(TEST_MESSAGE, &mut |v| v.int64(1))
            .unwrap_err();
        assert!(matches!(err, ChannelError::IllegalArgument(_)));
    }

    #[test]
    fn close_handle_unblocks_read_one() {
        let (outcome, gateway) = open(OkHeader::default().into());
        let HeaderOutcome::Connected(mut channel) = outcome else {
            panic!("expected a connection");
        };
        let handle = channel.close_handle();
        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.close();
        });
        assert!(matches!(channel.read_one(), Err(ChannelError::Closed)));
        closer.join().unwrap();
        gateway.join().unwrap();
    }

    #[test]
    fn peer_hangup_is_a_disconnect() {
        let (client, server) = WireStream::loopback_pair();
        let gateway = thread::spawn(move || {
            let mut reader = FrameReader::new(server.try_clone().unwrap());
            let mut writer = FrameWriter::new(server.try_clone().unwrap());
            read_header(&mut reader, Duration::from_secs(2)).unwrap();
            write_header(&mut writer, &OkHeader::default().into(), WireType::Text).unwrap();
            server.shutdown().unwrap();
        });
        let HeaderOutcome::Connected(mut channel) =
            TransportChannel::handshake(client, ChannelConfig::default(), HandlerHeader::echo().into())
                .unwrap()
        else {
            panic!("expected a connection");
        };
        gateway.join().unwrap();

        let err = loop {
            match channel.reading_document() {
                Ok(None) => continue,
                Ok(Some(_)) => panic!("no documents were sent"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, ChannelError::Disconnected(_)));
        assert!(channel.is_closed());
    }
}
