//! Header-negotiated document channels.
//!
//! A client [`connect`]s to a location, sends a header naming the session it
//! wants and reads back the gateway's answer: accepted, refused, or
//! redirected elsewhere. After that both sides exchange documents encoded
//! with one of the wires from `wireprims-wire`.
//!
//! ```no_run
//! use wireprims_channel::{connect, ChannelConfig, HandlerHeader, WireChannel};
//!
//! let mut channel = connect(ChannelConfig::new("tcp://localhost:9090"), HandlerHeader::echo())?;
//! channel.write_event("say", &mut |v| v.text(Some("hello")))?;
//! let (event, value) = channel.read_one()?;
//! # Ok::<(), wireprims_channel::ChannelError>(())
//! ```
//!
//! Also here: the [`Gateway`] that answers headers, the event pump
//! ([`run_event_loop`]) with its [`Pauser`]s, and write-only
//! [`DocumentSink`]s for files and HTTP endpoints.

pub mod buffered;
pub mod channel;
pub mod config;
pub mod connector;
pub mod control;
pub mod document;
pub mod error;
pub mod gateway;
pub mod handshake;
pub mod header;
pub mod location;
pub mod pauser;
pub mod reader;
pub mod sink;

pub use buffered::BufferedChannel;
pub use channel::{CloseHandle, HeaderOutcome, TransportChannel, WireChannel};
pub use config::ChannelConfig;
pub use connector::{connect, MAX_REDIRECT_DEPTH};
pub use control::{HEADER, HISTORY, TEST_MESSAGE};
pub use document::Document;
pub use error::{ChannelError, Result};
pub use gateway::{Gateway, GatewayConfig, HeaderHook, HeaderPolicy};
pub use header::{
    ChannelHeader, ErrorReplyHeader, HandlerHeader, HandlerKind, Header, HeaderFields, OkHeader,
    RedirectHeader, SystemContext,
};
pub use location::{Location, Scheme};
pub use pauser::{BalancedPauser, BusyPauser, Pauser, PauserMode, SleepyPauser, MAX_PAUSE};
pub use reader::{event_handler_as_runnable, run_event_loop, EventHandler, MethodReader};
pub use sink::{DocumentSink, FileSink, HttpSink, SinkBuilder, DOCUMENT_SEPARATOR};
