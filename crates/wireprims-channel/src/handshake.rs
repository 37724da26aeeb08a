//! Header exchange at the start of a connection.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use wireprims_frame::{DocumentKind, FrameError, FrameReader, FrameWriter};
use wireprims_wire::{WireOut, WireType};

use crate::control::HEADER;
use crate::document::{encode, Document};
use crate::error::{ChannelError, Result};
use crate::header::ChannelHeader;

/// Largest header document accepted before the session is established.
pub const MAX_HEADER_PAYLOAD: usize = 64 * 1024;

/// Send `header` as a metadata document.
pub fn write_header<W: Write>(
    writer: &mut FrameWriter<W>,
    header: &ChannelHeader,
    wire: WireType,
) -> Result<()> {
    let frame = encode(wire, DocumentKind::Metadata, &mut |out: &mut dyn WireOut| {
        out.write(HEADER)?.typed_marshallable(Some(header))
    })?;
    writer.write_frame(&frame)?;
    Ok(())
}

/// Wait up to `timeout` for the peer's header.
///
/// Returns the header and the wire it was written in, which is the wire a
/// reply should use.
pub fn read_header<R: Read>(
    reader: &mut FrameReader<R>,
    timeout: Duration,
) -> Result<(ChannelHeader, WireType)> {
    let deadline = Instant::now() + timeout;
    loop {
        if Instant::now() >= deadline {
            return Err(ChannelError::Timeout(timeout));
        }

        match reader.read_frame() {
            Ok(frame) => {
                if !frame.is_metadata() {
                    return Err(ChannelError::HandshakeFailed(
                        "expected a header document, got data".to_string(),
                    ));
                }
                if frame.payload.len() > MAX_HEADER_PAYLOAD {
                    return Err(ChannelError::HandshakeFailed(format!(
                        "header payload too large: {} (max {})",
                        frame.payload.len(),
                        MAX_HEADER_PAYLOAD
                    )));
                }
                let document = Document::from_frame(frame, 0);
                let header = document.read(|input| match input.read_event_name()? {
                    Some(event) if event == HEADER => {
                        Ok(Some(ChannelHeader::read_from(input.value_in())))
                    }
                    _ => Ok(None),
                })?;
                return match header {
                    Some(header) => Ok((header?, document.wire_type())),
                    None => Err(ChannelError::HandshakeFailed(
                        "first document is not a header".to_string(),
                    )),
                };
            }
            Err(err) if err.is_timeout() => continue,
            Err(FrameError::ConnectionClosed) => {
                return Err(ChannelError::Disconnected(
                    "connection closed during header exchange".to_string(),
                ));
            }
            Err(err) => return Err(ChannelError::Frame(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use wireprims_frame::FrameConfig;
    use wireprims_transport::WireStream;

    use super::*;
    use crate::header::{Header, HandlerHeader, OkHeader};

    #[test]
    fn header_round_trip_over_loopback() {
        let (left, right) = WireStream::loopback_pair();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::with_config_stream(
            right,
            FrameConfig {
                read_timeout: Some(Duration::from_millis(10)),
                ..FrameConfig::default()
            },
        )
        .unwrap();

        let sent: ChannelHeader = HandlerHeader::echo().session_name("s").into();
        write_header(&mut writer, &sent, WireType::Text).unwrap();

        let (got, wire) = read_header(&mut reader, Duration::from_secs(1)).unwrap();
        assert_eq!(got, sent);
        assert_eq!(wire, WireType::Text);
    }

    #[test]
    fn times_out_without_a_header() {
        let (_left, right) = WireStream::loopback_pair();
        let mut reader = FrameReader::with_config_stream(
            right,
            FrameConfig {
                read_timeout: Some(Duration::from_millis(5)),
                ..FrameConfig::default()
            },
        )
        .unwrap();

        let err = read_header(&mut reader, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
    }

    #[test]
    fn data_before_header_is_rejected() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        let frame = encode(WireType::Binary, DocumentKind::Data, &mut |out| {
            out.write("say")?.text(Some("too early"))
        })
        .unwrap();
        writer.write_frame(&frame).unwrap();

        let bytes = writer.into_inner().into_inner();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let err = read_header(&mut reader, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeFailed(_)));
    }

    #[test]
    fn eof_during_exchange_is_a_disconnect() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        write_header(&mut writer, &OkHeader::default().into(), WireType::Binary).unwrap();
        let mut bytes = writer.into_inner().into_inner();
        bytes.truncate(bytes.len() - 1);

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let err = read_header(&mut reader, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ChannelError::Disconnected(_)));
    }
}
