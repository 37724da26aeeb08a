//! Byte-stream transports.
//!
//! Provides a unified stream over the transports a channel can run on:
//! - TCP (`host:port`)
//! - In-process loopback pairs
//!
//! This is the lowest layer of wireprims. Everything else builds on top of
//! the [`WireStream`] type provided here.

pub mod error;
pub mod loopback;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use loopback::LoopbackStream;
pub use stream::WireStream;
pub use tcp::TcpEndpoint;
