//! Length-prefixed document framing.
//!
//! Every document travels in one frame:
//! - A 2-byte magic number ("WP") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian flag word (metadata bit, text wire bit)
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod document;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use document::{DocumentKind, METADATA, TEXT_WIRE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
