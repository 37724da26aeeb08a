//! Documents as they cross a channel.

use bytes::{Bytes, BytesMut};
use wireprims_frame::{document, DocumentKind, Frame};
use wireprims_wire::{
    message_history, Result as WireResult, SourceContext, ValueIn, WireError, WireIn, WireOut,
    WireType,
};

use crate::control::{HISTORY, TEST_MESSAGE};
use crate::error::{ChannelError, Result};

/// Frame flags for a document, rejecting wires a channel cannot carry.
pub(crate) fn frame_flags(kind: DocumentKind, wire: WireType) -> Result<u16> {
    match wire {
        WireType::Binary => Ok(document::flags(kind, false)),
        WireType::Text => Ok(document::flags(kind, true)),
        WireType::Json => Err(ChannelError::IllegalArgument(
            "unsupported wire type; json is write-only".to_string(),
        )),
    }
}

/// Encode one document into a frame.
pub(crate) fn encode(
    wire: WireType,
    kind: DocumentKind,
    body: &mut dyn FnMut(&mut dyn WireOut) -> WireResult<()>,
) -> Result<Frame> {
    let flags = frame_flags(kind, wire)?;
    let mut buf = BytesMut::new();
    wire.write_document(&mut buf, |out| body(out))?;
    Ok(Frame::new(flags, buf.freeze()))
}

/// One received document.
#[derive(Debug, Clone)]
pub struct Document {
    kind: DocumentKind,
    wire: WireType,
    index: i64,
    payload: Bytes,
}

impl Document {
    pub(crate) fn from_frame(frame: Frame, index: i64) -> Self {
        let wire = if frame.is_text() {
            WireType::Text
        } else {
            WireType::Binary
        };
        Self {
            kind: frame.kind(),
            wire,
            index,
            payload: frame.payload,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn is_metadata(&self) -> bool {
        self.kind == DocumentKind::Metadata
    }

    pub fn wire_type(&self) -> WireType {
        self.wire
    }

    /// Position of this document among those read on its channel.
    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decode the document's fields.
    pub fn read<T>(&self, body: impl FnOnce(&mut dyn WireIn) -> WireResult<T>) -> Result<T> {
        Ok(self.wire.read_document(&self.payload, body)?)
    }

    /// Hand the document's event to `on_event`.
    ///
    /// A leading `history` event is read into the thread's current message
    /// history first, with this document recorded as coming from
    /// `source_id`. Returns `None` for a document without events.
    pub fn with_event<T>(
        &self,
        source_id: i32,
        on_event: impl FnOnce(&str, &mut dyn ValueIn) -> WireResult<T>,
    ) -> Result<Option<T>> {
        let index = self.index;
        self.read(|input| {
            let Some(mut event) = input.read_event_name()? else {
                return Ok(None);
            };
            if event == HISTORY {
                read_history(input.value_in(), SourceContext { source_id, index })?;
                match input.read_event_name()? {
                    Some(next) => event = next,
                    None => return Ok(None),
                }
            }
            on_event(&event, input.value_in()).map(Some)
        })
    }

    /// Timestamp of a heartbeat document, if this is one.
    pub fn test_message(&self) -> Result<Option<i64>> {
        if !self.is_metadata() {
            return Ok(None);
        }
        self.read(|input| match input.read(TEST_MESSAGE)? {
            Some(value) => value.int64().map(Some),
            None => Ok(None),
        })
    }
}

fn read_history(value: &mut dyn ValueIn, source: SourceContext) -> WireResult<()> {
    message_history::with(|history| {
        history.set_source_context(source);
        if value.marshallable(history)? {
            Ok(())
        } else {
            Err(WireError::IllegalArgument(
                "history event carries no history".to_string(),
            ))
        }
    })
}

/// Write the current message history as a `history` event.
pub(crate) fn write_history(out: &mut dyn WireOut) -> WireResult<()> {
    message_history::with(|history| out.write(HISTORY)?.typed_marshallable(Some(&*history)))
}

#[cfg(test)]
mod tests {
    use wireprims_frame::METADATA;
    use wireprims_wire::{MessageHistory, WireValue};

    use super::*;

    fn document(
        wire: WireType,
        kind: DocumentKind,
        body: &mut dyn FnMut(&mut dyn WireOut) -> WireResult<()>,
    ) -> Document {
        Document::from_frame(encode(wire, kind, body).unwrap(), 7)
    }

    #[test]
    fn json_cannot_be_framed() {
        let err = frame_flags(DocumentKind::Data, WireType::Json).unwrap_err();
        assert!(matches!(err, ChannelError::IllegalArgument(_)));
        assert_eq!(
            frame_flags(DocumentKind::Metadata, WireType::Binary).unwrap(),
            METADATA
        );
    }

    #[test]
    fn events_are_handed_over() {
        for wire in [WireType::Binary, WireType::Text] {
            let doc = document(wire, DocumentKind::Data, &mut |out| {
                out.write("say")?.text(Some("Hello World"))
            });
            assert_eq!(doc.wire_type(), wire);
            assert_eq!(doc.index(), 7);
            let event = doc
                .with_event(0, |name, value| Ok((name.to_string(), value.value()?)))
                .unwrap();
            assert_eq!(
                event,
                Some(("say".to_string(), WireValue::Text("Hello World".into())))
            );
        }
    }

    #[test]
    fn heartbeats_are_recognised() {
        let doc = document(WireType::Binary, DocumentKind::Metadata, &mut |out| {
            out.write(TEST_MESSAGE)?.int64(42)
        });
        assert!(doc.is_metadata());
        assert_eq!(doc.test_message().unwrap(), Some(42));

        let data = document(WireType::Binary, DocumentKind::Data, &mut |out| {
            out.write(TEST_MESSAGE)?.int64(42)
        });
        assert_eq!(data.test_message().unwrap(), None);
    }

    #[test]
    fn leading_history_updates_the_current_history() {
        let mut sent = MessageHistory::new().with_clock(std::sync::Arc::new(|| 30_000));
        sent.add_source(1, 0xff).unwrap();
        sent.add_timing(10_000).unwrap();
        message_history::set(Some(sent));

        let doc = document(WireType::Text, DocumentKind::Data, &mut |out| {
            write_history(out)?;
            out.write("say")?.text(Some("hi"))
        });

        let mut receiving = MessageHistory::new();
        receiving.add_source_details(true);
        message_history::set(Some(receiving));

        let event = doc
            .with_event(2, |name, value| Ok((name.to_string(), value.text()?)))
            .unwrap();
        assert_eq!(event, Some(("say".to_string(), Some("hi".to_string()))));

        message_history::with(|history| {
            assert_eq!(history.sources(), 2);
            assert!(history.source_ids_ends_with(&[1, 2]));
            assert_eq!(history.last_source_index(), Some(7));
            assert_eq!(history.timing(0), Some(10_000));
            assert_eq!(history.timing(1), Some(30_000));
            assert_eq!(history.timings(), 3);
        });
        message_history::take();
    }
}
