//! Self-describing wire serialization with header-negotiated channels.
//!
//! # Crate Structure
//!
//! - [`wire`]: value model, binary/text/json wires, symbol codec, message history
//! - [`frame`]: length-prefixed document frames with metadata and wire flags
//! - [`transport`]: tcp and in-process byte streams
//! - [`channel`]: channels, gateways, event pumps and output sinks (behind
//!   the `channel` feature)

/// Re-export wire types.
pub mod wire {
    pub use wireprims_wire::*;
}

/// Re-export frame types.
pub mod frame {
    pub use wireprims_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use wireprims_transport::*;
}

/// Re-export channel types (requires `channel` feature).
#[cfg(feature = "channel")]
pub mod channel {
    pub use wireprims_channel::*;
}
