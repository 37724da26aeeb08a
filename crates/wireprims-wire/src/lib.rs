//! Self-describing value serialization.
//!
//! Values are written through [`WireOut`]/[`ValueOut`] and read through
//! [`WireIn`]/[`ValueIn`], independent of the encoding:
//! - [`WireType::Binary`]: tagged little-endian bytes, bit-exact round trip
//! - [`WireType::Text`]: readable flow text with `!Type` prefixes
//! - [`WireType::Json`]: write-only JSON for external consumers
//!
//! Also home to the [`SymbolCodec`] for compact identifiers and the
//! [`MessageHistory`] chain that travels with messages.

pub mod binary;
mod dispatch;
pub mod error;
pub mod history;
pub mod input;
pub mod json;
pub mod out;
pub mod stack;
pub mod symbol;
pub mod text;
pub mod value;
pub mod wire_type;

pub use binary::{BinaryWireIn, BinaryWireOut};
pub use error::{Result, WireError};
pub use history::{message_history, Clock, MessageHistory, SourceContext, MESSAGE_HISTORY_LENGTH};
pub use input::{ValueIn, WireIn};
pub use json::JsonWireOut;
pub use out::{ValueOut, ValueOutExt, WireOut};
pub use stack::{NestedContextStack, Reset, ValueInState, MAX_NESTING_DEPTH};
pub use symbol::{LongConverter, SymbolCodec};
pub use text::{TextWireIn, TextWireOut};
pub use value::{
    LongValue, Marshallable, ReadMarshallable, Scalar, SerializedLambda, StackFrame, Throwable,
    WireValue, WriteMarshallable,
};
pub use wire_type::WireType;
