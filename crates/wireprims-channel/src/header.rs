//! Header documents exchanged when a channel opens.
//!
//! The client sends a [`HandlerHeader`] naming the session it wants; the
//! gateway answers with an [`OkHeader`], a [`RedirectHeader`] listing other
//! locations to try, or an [`ErrorReplyHeader`].

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use wireprims_wire::{
    Marshallable, ReadMarshallable, Result as WireResult, ValueIn, WireError, WireIn, WireOut,
    WriteMarshallable,
};

use crate::error::{ChannelError, Result};

pub const ECHO_HANDLER: &str = "EchoHandler";
pub const GATEWAY_HANDLER: &str = "GatewayHandler";
pub const OK_HEADER: &str = "OkHeader";
pub const REDIRECT_HEADER: &str = "RedirectHeader";
pub const ERROR_REPLY_HANDLER: &str = "ErrorReplyHandler";

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Facts about the process that sent a header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemContext {
    pub available_processors: u32,
    pub host_name: String,
    pub user_name: String,
    pub process_id: u32,
    pub version: String,
    pub up_time: i64,
}

impl SystemContext {
    /// Describe the current process.
    pub fn current() -> Self {
        let start = *PROCESS_START.get_or_init(Instant::now);
        let env_or = |names: &[&str], fallback: &str| {
            names
                .iter()
                .find_map(|name| std::env::var(name).ok())
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            available_processors: std::thread::available_parallelism()
                .map_or(1, |n| u32::try_from(n.get()).unwrap_or(u32::MAX)),
            host_name: env_or(&["HOSTNAME", "COMPUTERNAME"], "localhost"),
            user_name: env_or(&["USER", "USERNAME"], "unknown"),
            process_id: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            up_time: i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX),
        }
    }
}

impl fmt::Display for SystemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl WriteMarshallable for SystemContext {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> WireResult<()> {
        out.write("availableProcessors")?
            .int64(i64::from(self.available_processors))?;
        out.write("hostName")?.text(Some(&self.host_name))?;
        out.write("userName")?.text(Some(&self.user_name))?;
        out.write("processId")?.int64(i64::from(self.process_id))?;
        out.write("version")?.text(Some(&self.version))?;
        out.write("upTime")?.int64(self.up_time)
    }
}

impl ReadMarshallable for SystemContext {
    fn read_marshallable(&mut self, input: &mut dyn WireIn) -> WireResult<()> {
        if let Some(v) = input.read("availableProcessors")? {
            self.available_processors = v.uint32()?;
        }
        if let Some(v) = input.read("hostName")? {
            self.host_name = v.text()?.unwrap_or_default();
        }
        if let Some(v) = input.read("userName")? {
            self.user_name = v.text()?.unwrap_or_default();
        }
        if let Some(v) = input.read("processId")? {
            self.process_id = v.uint32()?;
        }
        if let Some(v) = input.read("version")? {
            self.version = v.text()?.unwrap_or_default();
        }
        if let Some(v) = input.read("upTime")? {
            self.up_time = v.int64()?;
        }
        Ok(())
    }
}

/// Fields every header carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    pub system_context: Option<SystemContext>,
    pub session_name: Option<String>,
}

impl HeaderFields {
    fn write(&self, out: &mut dyn WireOut) -> WireResult<()> {
        if let Some(context) = &self.system_context {
            out.write("systemContext")?.marshallable(context)?;
        }
        if let Some(name) = &self.session_name {
            out.write("sessionName")?.text(Some(name))?;
        }
        Ok(())
    }

    fn read(&mut self, input: &mut dyn WireIn) -> WireResult<()> {
        if let Some(v) = input.read("systemContext")? {
            let mut context = SystemContext::default();
            if v.marshallable(&mut context)? {
                self.system_context = Some(context);
            }
        }
        if let Some(v) = input.read("sessionName")? {
            self.session_name = v.text()?;
        }
        Ok(())
    }
}

/// Builder steps shared by every header type.
pub trait Header: Sized {
    fn fields(&self) -> &HeaderFields;

    fn fields_mut(&mut self) -> &mut HeaderFields;

    fn session_name(mut self, name: impl Into<String>) -> Self {
        self.fields_mut().session_name = Some(name.into());
        self
    }

    fn system_context(mut self, context: SystemContext) -> Self {
        self.fields_mut().system_context = Some(context);
        self
    }
}

/// The session a client asks a gateway for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Echo every document back.
    Echo,
    /// Let the gateway decide, typically through its header policy.
    Gateway,
}

impl HandlerKind {
    pub fn type_name(self) -> &'static str {
        match self {
            HandlerKind::Echo => ECHO_HANDLER,
            HandlerKind::Gateway => GATEWAY_HANDLER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerHeader {
    pub fields: HeaderFields,
    pub kind: HandlerKind,
    /// Whether the gateway should buffer its side of the session.
    pub buffered: bool,
}

impl HandlerHeader {
    pub fn echo() -> Self {
        Self::new(HandlerKind::Echo)
    }

    pub fn gateway() -> Self {
        Self::new(HandlerKind::Gateway)
    }

    pub fn new(kind: HandlerKind) -> Self {
        Self {
            fields: HeaderFields::default(),
            kind,
            buffered: false,
        }
    }

    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkHeader {
    pub fields: HeaderFields,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectHeader {
    pub fields: HeaderFields,
    pub locations: Vec<String>,
}

impl RedirectHeader {
    pub fn new<I, S>(locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: HeaderFields::default(),
            locations: locations.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorReplyHeader {
    pub fields: HeaderFields,
    pub error_msg: String,
}

impl ErrorReplyHeader {
    pub fn new(error_msg: impl Into<String>) -> Self {
        Self {
            fields: HeaderFields::default(),
            error_msg: error_msg.into(),
        }
    }
}

impl Header for HandlerHeader {
    fn fields(&self) -> &HeaderFields {
        &self.fields
    }
    fn fields_mut(&mut self) -> &mut HeaderFields {
        &mut self.fields
    }
}

impl Header for OkHeader {
    fn fields(&self) -> &HeaderFields {
        &self.fields
    }
    fn fields_mut(&mut self) -> &mut HeaderFields {
        &mut self.fields
    }
}

impl Header for RedirectHeader {
    fn fields(&self) -> &HeaderFields {
        &self.fields
    }
    fn fields_mut(&mut self) -> &mut HeaderFields {
        &mut self.fields
    }
}

impl Header for ErrorReplyHeader {
    fn fields(&self) -> &HeaderFields {
        &self.fields
    }
    fn fields_mut(&mut self) -> &mut HeaderFields {
        &mut self.fields
    }
}

/// Any header document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelHeader {
    Handler(HandlerHeader),
    Ok(OkHeader),
    Redirect(RedirectHeader),
    ErrorReply(ErrorReplyHeader),
}

impl ChannelHeader {
    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelHeader::Handler(h) => h.kind.type_name(),
            ChannelHeader::Ok(_) => OK_HEADER,
            ChannelHeader::Redirect(_) => REDIRECT_HEADER,
            ChannelHeader::ErrorReply(_) => ERROR_REPLY_HANDLER,
        }
    }

    pub fn fields(&self) -> &HeaderFields {
        match self {
            ChannelHeader::Handler(h) => h.fields(),
            ChannelHeader::Ok(h) => h.fields(),
            ChannelHeader::Redirect(h) => h.fields(),
            ChannelHeader::ErrorReply(h) => h.fields(),
        }
    }

    pub fn session_name(&self) -> Option<&str> {
        self.fields().session_name.as_deref()
    }

    pub fn system_context(&self) -> Option<&SystemContext> {
        self.fields().system_context.as_ref()
    }

    /// Read a typed header value.
    pub fn read_from(input: &mut dyn ValueIn) -> Result<Self> {
        let type_name = input
            .type_prefix()?
            .ok_or_else(|| ChannelError::HandshakeFailed("header has no type".to_string()))?;
        let mut header = match type_name.as_str() {
            ECHO_HANDLER => ChannelHeader::Handler(HandlerHeader::echo()),
            GATEWAY_HANDLER => ChannelHeader::Handler(HandlerHeader::gateway()),
            OK_HEADER => ChannelHeader::Ok(OkHeader::default()),
            REDIRECT_HEADER => ChannelHeader::Redirect(RedirectHeader::default()),
            ERROR_REPLY_HANDLER => ChannelHeader::ErrorReply(ErrorReplyHeader::default()),
            other => {
                return Err(ChannelError::HandshakeFailed(format!(
                    "unknown header type '{other}'"
                )))
            }
        };
        input.marshallable(&mut header)?;
        Ok(header)
    }
}

impl From<HandlerHeader> for ChannelHeader {
    fn from(header: HandlerHeader) -> Self {
        ChannelHeader::Handler(header)
    }
}

impl From<OkHeader> for ChannelHeader {
    fn from(header: OkHeader) -> Self {
        ChannelHeader::Ok(header)
    }
}

impl From<RedirectHeader> for ChannelHeader {
    fn from(header: RedirectHeader) -> Self {
        ChannelHeader::Redirect(header)
    }
}

impl From<ErrorReplyHeader> for ChannelHeader {
    fn from(header: ErrorReplyHeader) -> Self {
        ChannelHeader::ErrorReply(header)
    }
}

impl WriteMarshallable for ChannelHeader {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> WireResult<()> {
        self.fields().write(out)?;
        match self {
            ChannelHeader::Handler(h) => out.write("buffered")?.bool(h.buffered),
            ChannelHeader::Ok(_) => Ok(()),
            ChannelHeader::Redirect(h) => {
                let locations = &h.locations;
                out.write("locations")?.sequence(&mut |seq| {
                    for location in locations {
                        seq.text(Some(location))?;
                    }
                    Ok(())
                })
            }
            ChannelHeader::ErrorReply(h) => out.write("errorMsg")?.text(Some(&h.error_msg)),
        }
    }
}

impl ReadMarshallable for ChannelHeader {
    fn read_marshallable(&mut self, input: &mut dyn WireIn) -> WireResult<()> {
        match self {
            ChannelHeader::Handler(h) => {
                h.fields.read(input)?;
                if let Some(v) = input.read("buffered")? {
                    h.buffered = v.bool()?;
                }
            }
            ChannelHeader::Ok(h) => h.fields.read(input)?,
            ChannelHeader::Redirect(h) => {
                h.fields.read(input)?;
                if let Some(v) = input.read("locations")? {
                    let locations = &mut h.locations;
                    v.sequence(&mut |seq| {
                        while seq.has_next_sequence_item()? {
                            let location = seq.text()?.ok_or_else(|| {
                                WireError::IllegalArgument("null redirect location".to_string())
                            })?;
                            locations.push(location);
                        }
                        Ok(())
                    })?;
                }
            }
            ChannelHeader::ErrorReply(h) => {
                h.fields.read(input)?;
                if let Some(v) = input.read("errorMsg")? {
                    h.error_msg = v.text()?.unwrap_or_default();
                }
            }
        }
        Ok(())
    }
}

impl Marshallable for ChannelHeader {
    fn type_name(&self) -> &str {
        ChannelHeader::type_name(self)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use wireprims_wire::WireType;

    use super::*;

    fn round_trip(header: &ChannelHeader, wire: WireType) -> ChannelHeader {
        let mut buf = BytesMut::new();
        wire.write_document(&mut buf, |out| {
            out.write("header")?.typed_marshallable(Some(header))
        })
        .unwrap();
        wire.read_document(&buf, |input| {
            assert_eq!(input.read_event_name()?.as_deref(), Some("header"));
            ChannelHeader::read_from(input.value_in())
                .map_err(|err| WireError::IllegalState(err.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn headers_survive_both_wires() {
        let headers: Vec<ChannelHeader> = vec![
            HandlerHeader::echo()
                .session_name("s1")
                .system_context(SystemContext::current())
                .buffered(true)
                .into(),
            HandlerHeader::gateway().into(),
            OkHeader::default().session_name("gw").into(),
            RedirectHeader::new(["tcp://a:1", "tcp://b:2"]).into(),
            ErrorReplyHeader::new("Custom handlers not supported").into(),
        ];
        for wire in [WireType::Binary, WireType::Text] {
            for header in &headers {
                assert_eq!(&round_trip(header, wire), header, "{wire}");
            }
        }
    }

    #[test]
    fn text_form_is_typed() {
        let header: ChannelHeader = RedirectHeader::new(["tcp://b:2"]).into();
        let mut buf = BytesMut::new();
        WireType::Text
            .write_document(&mut buf, |out| {
                out.write("header")?.typed_marshallable(Some(&header))
            })
            .unwrap();
        let text = String::from_utf8(buf.to_vec()).unwrap();
        assert!(text.starts_with("header: !RedirectHeader"), "{text}");
        assert!(text.contains("tcp://b:2"), "{text}");
    }

    #[test]
    fn unknown_header_type_fails() {
        let mut buf = BytesMut::new();
        WireType::Binary
            .write_document(&mut buf, |out| {
                let v = out.write("header")?;
                v.type_prefix("MysteryHandler")?;
                v.marshallable(&ChannelHeader::from(OkHeader::default()))
            })
            .unwrap();
        let err = WireType::Binary
            .read_document(&buf, |input| {
                input.read_event_name()?;
                Ok(ChannelHeader::read_from(input.value_in()))
            })
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeFailed(_)));
    }

    #[test]
    fn system_context_displays_as_json() {
        let context = SystemContext {
            available_processors: 4,
            host_name: "box".into(),
            user_name: "me".into(),
            process_id: 7,
            version: "0.2.1".into(),
            up_time: 10,
        };
        let json: serde_json::Value = serde_json::from_str(&context.to_string()).unwrap();
        assert_eq!(json["hostName"], "box");
        assert_eq!(json["availableProcessors"], 4);
    }
}
