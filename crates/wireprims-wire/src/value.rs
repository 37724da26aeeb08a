//! Closed value type and the traits application types implement to take
//! part in serialization.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::error::{Result, WireError};
use crate::input::WireIn;
use crate::out::WireOut;

/// Any value the wire formats can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Float32(f32),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    ZonedDateTime(DateTime<FixedOffset>),
    Uuid(Uuid),
    /// A reference to a type by name.
    TypeLiteral(String),
    /// A value preceded by its type name: a typed scalar or a typed object.
    Typed {
        type_name: String,
        value: Box<WireValue>,
    },
    Sequence(Vec<WireValue>),
    /// Mapping with arbitrary keys, in encounter order.
    Map(Vec<(WireValue, WireValue)>),
    /// Named fields, in encounter order.
    Object(Vec<(String, WireValue)>),
    /// Current value of a bound 64-bit cell.
    Binding(i64),
}

impl WireValue {
    /// Short name of the variant, used in type mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            WireValue::Null => "null",
            WireValue::Bool(_) => "bool",
            WireValue::Int8(_) => "int8",
            WireValue::Int16(_) => "int16",
            WireValue::Int32(_) => "int32",
            WireValue::Int64(_) => "int64",
            WireValue::UInt8(_) => "uint8",
            WireValue::UInt16(_) => "uint16",
            WireValue::UInt32(_) => "uint32",
            WireValue::Float32(_) => "float32",
            WireValue::Float64(_) => "float64",
            WireValue::Text(_) => "text",
            WireValue::Bytes(_) => "bytes",
            WireValue::Date(_) => "date",
            WireValue::Time(_) => "time",
            WireValue::ZonedDateTime(_) => "zoned date-time",
            WireValue::Uuid(_) => "uuid",
            WireValue::TypeLiteral(_) => "type literal",
            WireValue::Typed { .. } => "typed value",
            WireValue::Sequence(_) => "sequence",
            WireValue::Map(_) => "map",
            WireValue::Object(_) => "object",
            WireValue::Binding(_) => "binding",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    /// Strip a type prefix, if any.
    pub fn untyped(&self) -> &WireValue {
        match self {
            WireValue::Typed { value, .. } => value.untyped(),
            other => other,
        }
    }

    /// Owned form of [`WireValue::untyped`].
    pub fn into_untyped(self) -> WireValue {
        match self {
            WireValue::Typed { value, .. } => value.into_untyped(),
            other => other,
        }
    }

    /// Any integer variant widened to `i64`.
    pub fn as_i64(&self) -> Result<i64> {
        match self.untyped() {
            WireValue::Int8(v) => Ok(i64::from(*v)),
            WireValue::Int16(v) => Ok(i64::from(*v)),
            WireValue::Int32(v) => Ok(i64::from(*v)),
            WireValue::Int64(v) | WireValue::Binding(v) => Ok(*v),
            WireValue::UInt8(v) => Ok(i64::from(*v)),
            WireValue::UInt16(v) => Ok(i64::from(*v)),
            WireValue::UInt32(v) => Ok(i64::from(*v)),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self.untyped() {
            WireValue::Float32(v) => Ok(f64::from(*v)),
            WireValue::Float64(v) => Ok(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self.untyped() {
            WireValue::Bool(v) => Ok(*v),
            other => Err(mismatch("bool", other)),
        }
    }

    /// Text, with null mapping to `None`.
    pub fn as_text(&self) -> Result<Option<&str>> {
        match self.untyped() {
            WireValue::Null => Ok(None),
            WireValue::Text(s) => Ok(Some(s)),
            other => Err(mismatch("text", other)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self.untyped() {
            WireValue::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", other)),
        }
    }

    pub fn as_sequence(&self) -> Result<&[WireValue]> {
        match self.untyped() {
            WireValue::Sequence(items) => Ok(items),
            other => Err(mismatch("sequence", other)),
        }
    }

    /// Field of an object by name.
    pub fn field(&self, name: &str) -> Option<&WireValue> {
        match self.untyped() {
            WireValue::Object(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            WireValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| matches!(k, WireValue::Text(t) if t == name))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

pub(crate) fn mismatch(expected: &'static str, found: &WireValue) -> WireError {
    WireError::UnexpectedType {
        expected,
        found: found.kind().to_string(),
    }
}

pub(crate) fn narrow<T: TryFrom<i64>>(value: i64, target: &'static str) -> Result<T> {
    T::try_from(value).map_err(|_| WireError::Overflow { value, target })
}

/// A shared 64-bit cell written by reference rather than by value.
#[derive(Debug, Clone, Default)]
pub struct LongValue(Arc<AtomicI64>);

impl LongValue {
    pub fn new(value: i64) -> Self {
        Self(Arc::new(AtomicI64::new(value)))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    pub fn add(&self, delta: i64) -> i64 {
        self.0.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

/// A value that writes its fields to a wire.
pub trait WriteMarshallable {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> Result<()>;
}

/// A value that populates itself from a wire.
pub trait ReadMarshallable {
    fn read_marshallable(&mut self, input: &mut dyn WireIn) -> Result<()>;
}

/// A structured value with a runtime type name.
pub trait Marshallable: WriteMarshallable {
    fn type_name(&self) -> &str;
}

/// An enum-like value written as a typed text scalar.
pub trait Scalar {
    fn type_name(&self) -> &str;
    fn to_text(&self) -> String;
}

/// One frame of a [`Throwable`] stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub class: String,
    pub method: String,
    pub file: Option<String>,
    pub line: i32,
}

impl StackFrame {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            file: None,
            line: 0,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: i32) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    fn is_runtime_internal(&self) -> bool {
        INTERNAL_FRAME_PREFIXES
            .iter()
            .any(|prefix| self.class.starts_with(prefix))
    }
}

/// Frames from these modules at the bottom of a trace are noise.
const INTERNAL_FRAME_PREFIXES: &[&str] = &["std::", "core::", "alloc::", "test::", "__rust"];

/// An error captured as data: type, message and an optional stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throwable {
    pub type_name: String,
    pub message: Option<String>,
    pub stack_trace: Vec<StackFrame>,
}

impl Throwable {
    pub fn new(type_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message,
            stack_trace: Vec::new(),
        }
    }

    /// Capture a concrete error, named by its Rust type.
    pub fn from_error<E: std::error::Error + 'static>(err: &E) -> Self {
        Self::new(std::any::type_name::<E>(), Some(err.to_string()))
    }

    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.stack_trace.push(frame);
        self
    }

    /// Stack trace without trailing runtime frames.
    pub fn trimmed_stack_trace(&self) -> &[StackFrame] {
        let keep = self
            .stack_trace
            .iter()
            .rposition(|frame| !frame.is_runtime_internal())
            .map_or(0, |idx| idx + 1);
        &self.stack_trace[..keep]
    }

    /// Rebuild from the value a wire read back.
    pub fn from_value(value: &WireValue) -> Result<Self> {
        let WireValue::Typed { type_name, value } = value else {
            return Err(mismatch("typed throwable", value));
        };
        let message = match value.field("message") {
            Some(m) => m.as_text()?.map(str::to_string),
            None => None,
        };
        let mut throwable = Throwable::new(type_name.clone(), message);
        if let Some(trace) = value.field("stackTrace") {
            for frame in trace.as_sequence()? {
                let text = |name: &str| -> Result<Option<String>> {
                    match frame.field(name) {
                        Some(v) => Ok(v.as_text()?.map(str::to_string)),
                        None => Ok(None),
                    }
                };
                throwable.stack_trace.push(StackFrame {
                    class: text("class")?.unwrap_or_default(),
                    method: text("method")?.unwrap_or_default(),
                    file: text("file")?,
                    line: match frame.field("line") {
                        Some(v) => narrow(v.as_i64()?, "int32")?,
                        None => 0,
                    },
                });
            }
        }
        Ok(throwable)
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.type_name, message),
            None => f.write_str(&self.type_name),
        }
    }
}

/// A serializable function reference: the type that captured it, the target
/// method and the captured arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedLambda {
    pub capturing_type: String,
    pub method: String,
    pub captured_args: Vec<WireValue>,
}

impl WriteMarshallable for SerializedLambda {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> Result<()> {
        out.write("capturingType")?.text(Some(&self.capturing_type))?;
        out.write("method")?.text(Some(&self.method))?;
        let args = &self.captured_args;
        out.write("capturedArgs")?.sequence(&mut |seq| {
            for arg in args {
                seq.value(arg)?;
            }
            Ok(())
        })
    }
}

impl Marshallable for SerializedLambda {
    fn type_name(&self) -> &str {
        "SerializedLambda"
    }
}

/// Writes borrowed object fields; used when emitting a [`WireValue::Object`].
pub(crate) struct Fields<'a>(pub &'a [(String, WireValue)]);

impl WriteMarshallable for Fields<'_> {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> Result<()> {
        for (name, value) in self.0 {
            out.write(name)?.value(value)?;
        }
        Ok(())
    }
}

/// Writes a `&dyn Marshallable` through the `WriteMarshallable` surface.
pub(crate) struct AsWrite<'a>(pub &'a dyn Marshallable);

impl WriteMarshallable for AsWrite<'_> {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> Result<()> {
        self.0.write_marshallable(out)
    }
}
