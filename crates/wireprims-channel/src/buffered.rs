//! Channel whose writes are sent by a background thread.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TryRecvError};
use tracing::{debug, warn};
use wireprims_frame::{DocumentKind, Frame, FrameConfig, FrameWriter};
use wireprims_wire::{Result as WireResult, WireOut};

use crate::channel::{CloseHandle, TransportChannel, WireChannel};
use crate::config::ChannelConfig;
use crate::document::{encode, Document};
use crate::error::{ChannelError, Result};
use crate::header::ChannelHeader;

/// Wraps a [`TransportChannel`]: documents are encoded on the calling
/// thread and queued; a writer thread drains the queue, idling with the
/// configured pauser. Reads go straight to the transport.
pub struct BufferedChannel {
    inner: TransportChannel,
    queue: Option<Sender<Frame>>,
    writer: Option<JoinHandle<()>>,
}

impl BufferedChannel {
    pub fn new(inner: TransportChannel) -> Result<Self> {
        let config = inner.config();
        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
            read_timeout: None,
            write_timeout: Some(config.connection_timeout),
        };
        let mut writer = FrameWriter::with_config_stream(inner.writer_stream()?, frame_config)?;
        let mut pauser = config.pauser_mode.pauser();
        let closer = inner.close_handle();
        let channel_id = inner.id();
        let (tx, rx) = crossbeam_channel::unbounded::<Frame>();

        let handle = thread::Builder::new()
            .name(format!("wireprims-writer-{channel_id}"))
            .spawn(move || loop {
                match rx.try_recv() {
                    Ok(frame) => {
                        if let Err(err) = writer.write_frame(&frame) {
                            if !closer.is_closed() {
                                warn!(channel_id, error = %err, "background writer stopped");
                                closer.close();
                            }
                            break;
                        }
                        pauser.reset();
                    }
                    Err(TryRecvError::Empty) if !closer.is_closed() => pauser.pause(),
                    Err(_) => break,
                }
            })?;
        debug!(channel_id, "started background writer");

        Ok(Self {
            inner,
            queue: Some(tx),
            writer: Some(handle),
        })
    }

    /// Let the writer drain what is queued, then stop it.
    fn stop_writer(&mut self) {
        self.queue.take();
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                warn!(channel_id = self.inner.id(), "background writer panicked");
            }
        }
    }
}

impl WireChannel for BufferedChannel {
    fn config(&self) -> &ChannelConfig {
        self.inner.config()
    }

    fn header_out(&self) -> &ChannelHeader {
        self.inner.header_out()
    }

    fn header_in(&self) -> &ChannelHeader {
        self.inner.header_in()
    }

    fn write_document(
        &mut self,
        metadata: bool,
        body: &mut dyn FnMut(&mut dyn WireOut) -> WireResult<()>,
    ) -> Result<()> {
        if self.inner.is_closed() {
            return Err(ChannelError::Closed);
        }
        let kind = if metadata {
            DocumentKind::Metadata
        } else {
            DocumentKind::Data
        };
        let frame = encode(self.config().wire_type, kind, body)?;
        let queue = self.queue.as_ref().ok_or(ChannelError::Closed)?;
        queue.send(frame).map_err(|_| ChannelError::Closed)
    }

    fn reading_document(&mut self) -> Result<Option<Document>> {
        self.inner.reading_document()
    }

    fn last_test_message(&self) -> i64 {
        self.inner.last_test_message()
    }

    fn close_handle(&self) -> CloseHandle {
        self.inner.close_handle()
    }

    fn close(&mut self) {
        self.stop_writer();
        self.inner.close();
    }
}

impl Drop for BufferedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for BufferedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedChannel")
            .field("inner", &self.inner)
            .field("writer_running", &self.writer.is_some())
            .finish()
    }
}
