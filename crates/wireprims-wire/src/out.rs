//! Writer surface shared by every wire format.

use std::any::Any;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::dispatch;
use crate::error::{Result, WireError};
use crate::value::{
    narrow, AsWrite, Fields, LongValue, Marshallable, Scalar, StackFrame, Throwable, WireValue,
    WriteMarshallable,
};

/// Writes named fields; each call returns the writer for that field's value.
pub trait WireOut {
    fn write(&mut self, name: &str) -> Result<&mut dyn ValueOut>;
}

/// Writes one value. Structural values take closures, so every structure
/// is closed before its next sibling starts.
pub trait ValueOut {
    fn bool(&mut self, flag: bool) -> Result<()>;

    /// Text, or a textual null for `None`.
    fn text(&mut self, text: Option<&str>) -> Result<()>;

    fn int8(&mut self, value: i8) -> Result<()>;
    fn int16(&mut self, value: i16) -> Result<()>;
    fn int32(&mut self, value: i32) -> Result<()>;
    fn int64(&mut self, value: i64) -> Result<()>;
    fn uint8(&mut self, value: u8) -> Result<()>;
    fn uint16(&mut self, value: u16) -> Result<()>;
    fn uint32(&mut self, value: u32) -> Result<()>;
    fn float32(&mut self, value: f32) -> Result<()>;
    fn float64(&mut self, value: f64) -> Result<()>;

    /// A byte block carried as a value.
    fn bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// A raw byte array.
    fn raw_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    fn date(&mut self, date: NaiveDate) -> Result<()>;
    fn time(&mut self, time: NaiveTime) -> Result<()>;
    fn zoned_date_time(&mut self, value: &DateTime<FixedOffset>) -> Result<()>;
    fn uuid(&mut self, uuid: Uuid) -> Result<()>;

    /// Prefix the next value with a type name.
    fn type_prefix(&mut self, type_name: &str) -> Result<()>;

    /// A reference to a type, not an instance of it.
    fn type_literal(&mut self, type_name: &str) -> Result<()>;

    /// The current value of a bound cell.
    fn binding(&mut self, value: i64) -> Result<()>;

    fn sequence(&mut self, items: &mut dyn FnMut(&mut dyn ValueOut) -> Result<()>)
        -> Result<()>;

    fn marshallable(&mut self, object: &dyn WriteMarshallable) -> Result<()>;

    /// A mapping; `entries` writes keys and values alternately.
    fn mapping(&mut self, entries: &mut dyn FnMut(&mut dyn ValueOut) -> Result<()>)
        -> Result<()>;

    /// Lay the next structure out on a single line. Formats without layout
    /// ignore it.
    fn leaf(&mut self) -> &mut dyn ValueOut;

    fn null(&mut self) -> Result<()> {
        self.text(None)
    }

    fn int8_checked(&mut self, value: i64) -> Result<()> {
        self.int8(narrow(value, "int8")?)
    }

    fn int16_checked(&mut self, value: i64) -> Result<()> {
        self.int16(narrow(value, "int16")?)
    }

    fn int32_checked(&mut self, value: i64) -> Result<()> {
        self.int32(narrow(value, "int32")?)
    }

    fn uint8_checked(&mut self, value: i64) -> Result<()> {
        self.uint8(narrow(value, "uint8")?)
    }

    fn uint16_checked(&mut self, value: i64) -> Result<()> {
        self.uint16(narrow(value, "uint16")?)
    }

    fn uint32_checked(&mut self, value: i64) -> Result<()> {
        self.uint32(narrow(value, "uint32")?)
    }

    fn int64_for_binding(&mut self, cell: &LongValue) -> Result<()> {
        self.binding(cell.get())
    }

    /// A structured value preceded by its type name; `None` writes a
    /// textual null, which readers treat like an absent structure.
    fn typed_marshallable(&mut self, object: Option<&dyn Marshallable>) -> Result<()> {
        match object {
            None => self.text(None),
            Some(object) => {
                self.type_prefix(object.type_name())?;
                self.marshallable(&AsWrite(object))
            }
        }
    }

    fn typed_marshallable_as(
        &mut self,
        type_name: &str,
        object: &dyn WriteMarshallable,
    ) -> Result<()> {
        self.type_prefix(type_name)?;
        self.marshallable(object)
    }

    fn typed_scalar(&mut self, scalar: &dyn Scalar) -> Result<()> {
        self.type_prefix(scalar.type_name())?;
        self.text(Some(&scalar.to_text()))
    }

    /// An error as a typed object with `message` and `stackTrace`.
    fn throwable(&mut self, throwable: &Throwable) -> Result<()> {
        self.type_prefix(&throwable.type_name)?;
        self.marshallable(&ThrowableFields(throwable))
    }

    /// A mapping whose keys and values must each be text, a boxed primitive
    /// or a structured value.
    fn map(&mut self, entries: &[(&dyn Any, &dyn Any)]) -> Result<()> {
        for (key, value) in entries {
            for side in [key, value] {
                if !dispatch::is_map_element(*side) {
                    return Err(WireError::IllegalArgument(
                        "map keys and values must be text, boxed primitives or marshallable"
                            .to_string(),
                    ));
                }
            }
        }
        self.mapping(&mut |out| {
            for (key, value) in entries {
                out.object(Some(*key))?;
                out.object(Some(*value))?;
            }
            Ok(())
        })
    }

    fn value(&mut self, value: &WireValue) -> Result<()> {
        match value {
            WireValue::Null => self.null(),
            WireValue::Bool(v) => self.bool(*v),
            WireValue::Int8(v) => self.int8(*v),
            WireValue::Int16(v) => self.int16(*v),
            WireValue::Int32(v) => self.int32(*v),
            WireValue::Int64(v) => self.int64(*v),
            WireValue::UInt8(v) => self.uint8(*v),
            WireValue::UInt16(v) => self.uint16(*v),
            WireValue::UInt32(v) => self.uint32(*v),
            WireValue::Float32(v) => self.float32(*v),
            WireValue::Float64(v) => self.float64(*v),
            WireValue::Text(v) => self.text(Some(v)),
            WireValue::Bytes(v) => self.bytes(v),
            WireValue::Date(v) => self.date(*v),
            WireValue::Time(v) => self.time(*v),
            WireValue::ZonedDateTime(v) => self.zoned_date_time(v),
            WireValue::Uuid(v) => self.uuid(*v),
            WireValue::TypeLiteral(name) => self.type_literal(name),
            WireValue::Typed { type_name, value } => {
                self.type_prefix(type_name)?;
                self.value(value)
            }
            WireValue::Sequence(items) => self.sequence(&mut |out| {
                for item in items {
                    out.value(item)?;
                }
                Ok(())
            }),
            WireValue::Map(entries) => self.mapping(&mut |out| {
                for (key, value) in entries {
                    out.value(key)?;
                    out.value(value)?;
                }
                Ok(())
            }),
            WireValue::Object(fields) => self.marshallable(&Fields(fields)),
            WireValue::Binding(v) => self.binding(*v),
        }
    }

    /// Write a value of any supported runtime shape, choosing the encoding
    /// by the first matching dispatch rule.
    fn object(&mut self, value: Option<&dyn Any>) -> Result<()> {
        dispatch::write_object(self, value, "dyn Any")
    }
}

/// Generic helpers that know the static type being written.
pub trait ValueOutExt {
    /// Like [`ValueOut::object`], naming `T` if the shape is unsupported.
    fn object_of<T: Any>(&mut self, value: &T) -> Result<()>;
}

impl<V: ValueOut + ?Sized> ValueOutExt for V {
    fn object_of<T: Any>(&mut self, value: &T) -> Result<()> {
        dispatch::write_object(self, Some(value as &dyn Any), std::any::type_name::<T>())
    }
}

struct ThrowableFields<'a>(&'a Throwable);

impl WriteMarshallable for ThrowableFields<'_> {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> Result<()> {
        out.write("message")?.text(self.0.message.as_deref())?;
        let frames = self.0.trimmed_stack_trace();
        out.write("stackTrace")?.sequence(&mut |seq| {
            for frame in frames {
                seq.leaf().marshallable(&FrameFields(frame))?;
            }
            Ok(())
        })
    }
}

struct FrameFields<'a>(&'a StackFrame);

impl WriteMarshallable for FrameFields<'_> {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> Result<()> {
        out.write("class")?.text(Some(&self.0.class))?;
        out.write("method")?.text(Some(&self.0.method))?;
        out.write("file")?.text(self.0.file.as_deref())?;
        out.write("line")?.int32(self.0.line)
    }
}
