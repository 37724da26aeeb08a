//! Compact tagged binary wire.
//!
//! Every value starts with a one-byte tag. Scalars are fixed-width
//! little-endian; text, bytes and containers carry a u32 length; field and
//! type names carry a u16 length.
//!
//! ```text
//! document  := field*
//! field     := FIELD name value
//! value     := NULL | FALSE | TRUE | I8 i8 | ... | TEXT len utf8
//!            | TYPE_PREFIX name value | SEQUENCE len value*
//!            | OBJECT len field* | MAP len (value value)*
//! ```

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike};
use uuid::Uuid;

use crate::error::{Result, WireError};
use crate::input::{ValueIn, WireIn};
use crate::out::{ValueOut, WireOut};
use crate::stack::{NestedContextStack, ValueInState, MAX_NESTING_DEPTH};
use crate::value::{ReadMarshallable, WireValue, WriteMarshallable};

const NULL: u8 = 0x00;
const FALSE: u8 = 0x01;
const TRUE: u8 = 0x02;
const I8: u8 = 0x03;
const I16: u8 = 0x04;
const I32: u8 = 0x05;
const I64: u8 = 0x06;
const U8: u8 = 0x07;
const U16: u8 = 0x08;
const U32: u8 = 0x09;
const F32: u8 = 0x0A;
const F64: u8 = 0x0B;
const TEXT: u8 = 0x0C;
const BYTES: u8 = 0x0D;
const DATE: u8 = 0x0E;
const TIME: u8 = 0x0F;
const ZONED: u8 = 0x10;
const UUID: u8 = 0x11;
const TYPE_LITERAL: u8 = 0x12;
const TYPE_PREFIX: u8 = 0x13;
const BINDING: u8 = 0x14;
const SEQUENCE: u8 = 0x15;
const OBJECT: u8 = 0x16;
const MAP: u8 = 0x17;
const FIELD: u8 = 0x18;

fn tag_name(tag: u8) -> String {
    let name = match tag {
        NULL => "null",
        FALSE | TRUE => "bool",
        I8 => "int8",
        I16 => "int16",
        I32 => "int32",
        I64 => "int64",
        U8 => "uint8",
        U16 => "uint16",
        U32 => "uint32",
        F32 => "float32",
        F64 => "float64",
        TEXT => "text",
        BYTES => "bytes",
        DATE => "date",
        TIME => "time",
        ZONED => "zoned date-time",
        UUID => "uuid",
        TYPE_LITERAL => "type literal",
        TYPE_PREFIX => "type prefix",
        BINDING => "binding",
        SEQUENCE => "sequence",
        OBJECT => "object",
        MAP => "map",
        FIELD => "field",
        other => return format!("unknown tag 0x{other:02x}"),
    };
    name.to_string()
}

/// Appends binary-encoded fields and values to a buffer.
pub struct BinaryWireOut<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> BinaryWireOut<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    fn name(&mut self, name: &str) -> Result<()> {
        let len = u16::try_from(name.len()).map_err(|_| WireError::CapacityExceeded {
            what: "name",
            max: u16::MAX as usize,
        })?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(name.as_bytes());
        Ok(())
    }

    fn block(&mut self, tag: u8, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| WireError::CapacityExceeded {
            what: "value",
            max: u32::MAX as usize,
        })?;
        self.buf.put_u8(tag);
        self.buf.put_u32_le(len);
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Write `tag`, a length placeholder and the body, then patch the length.
    fn container(&mut self, tag: u8, body: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.buf.put_u8(tag);
        let len_at = self.buf.len();
        self.buf.put_u32_le(0);
        body(self)?;
        let body_len = self.buf.len() - len_at - 4;
        let len = u32::try_from(body_len).map_err(|_| WireError::CapacityExceeded {
            what: "container",
            max: u32::MAX as usize,
        })?;
        self.buf[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }
}

impl WireOut for BinaryWireOut<'_> {
    fn write(&mut self, name: &str) -> Result<&mut dyn ValueOut> {
        self.buf.put_u8(FIELD);
        self.name(name)?;
        Ok(self)
    }
}

impl ValueOut for BinaryWireOut<'_> {
    fn bool(&mut self, flag: bool) -> Result<()> {
        self.buf.put_u8(if flag { TRUE } else { FALSE });
        Ok(())
    }

    fn text(&mut self, text: Option<&str>) -> Result<()> {
        match text {
            None => {
                self.buf.put_u8(NULL);
                Ok(())
            }
            Some(text) => self.block(TEXT, text.as_bytes()),
        }
    }

    fn int8(&mut self, value: i8) -> Result<()> {
        self.buf.put_u8(I8);
        self.buf.put_i8(value);
        Ok(())
    }

    fn int16(&mut self, value: i16) -> Result<()> {
        self.buf.put_u8(I16);
        self.buf.put_i16_le(value);
        Ok(())
    }

    fn int32(&mut self, value: i32) -> Result<()> {
        self.buf.put_u8(I32);
        self.buf.put_i32_le(value);
        Ok(())
    }

    fn int64(&mut self, value: i64) -> Result<()> {
        self.buf.put_u8(I64);
        self.buf.put_i64_le(value);
        Ok(())
    }

    fn uint8(&mut self, value: u8) -> Result<()> {
        self.buf.put_u8(U8);
        self.buf.put_u8(value);
        Ok(())
    }

    fn uint16(&mut self, value: u16) -> Result<()> {
        self.buf.put_u8(U16);
        self.buf.put_u16_le(value);
        Ok(())
    }

    fn uint32(&mut self, value: u32) -> Result<()> {
        self.buf.put_u8(U32);
        self.buf.put_u32_le(value);
        Ok(())
    }

    fn float32(&mut self, value: f32) -> Result<()> {
        self.buf.put_u8(F32);
        self.buf.put_f32_le(value);
        Ok(())
    }

    fn float64(&mut self, value: f64) -> Result<()> {
        self.buf.put_u8(F64);
        self.buf.put_f64_le(value);
        Ok(())
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.block(BYTES, bytes)
    }

    fn raw_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.block(BYTES, bytes)
    }

    fn date(&mut self, date: NaiveDate) -> Result<()> {
        self.buf.put_u8(DATE);
        self.buf.put_i32_le(date.num_days_from_ce());
        Ok(())
    }

    fn time(&mut self, time: NaiveTime) -> Result<()> {
        self.buf.put_u8(TIME);
        self.buf.put_u32_le(time.num_seconds_from_midnight());
        self.buf.put_u32_le(time.nanosecond());
        Ok(())
    }

    fn zoned_date_time(&mut self, value: &DateTime<FixedOffset>) -> Result<()> {
        self.buf.put_u8(ZONED);
        self.buf.put_i64_le(value.timestamp());
        self.buf.put_u32_le(value.timestamp_subsec_nanos());
        self.buf.put_i32_le(value.offset().local_minus_utc());
        Ok(())
    }

    fn uuid(&mut self, uuid: Uuid) -> Result<()> {
        self.buf.put_u8(UUID);
        self.buf.put_slice(uuid.as_bytes());
        Ok(())
    }

    fn type_prefix(&mut self, type_name: &str) -> Result<()> {
        self.buf.put_u8(TYPE_PREFIX);
        self.name(type_name)
    }

    fn type_literal(&mut self, type_name: &str) -> Result<()> {
        self.buf.put_u8(TYPE_LITERAL);
        self.name(type_name)
    }

    fn binding(&mut self, value: i64) -> Result<()> {
        self.buf.put_u8(BINDING);
        self.buf.put_i64_le(value);
        Ok(())
    }

    fn sequence(
        &mut self,
        items: &mut dyn FnMut(&mut dyn ValueOut) -> Result<()>,
    ) -> Result<()> {
        self.container(SEQUENCE, |out| items(out))
    }

    fn marshallable(&mut self, object: &dyn WriteMarshallable) -> Result<()> {
        self.container(OBJECT, |out| object.write_marshallable(out))
    }

    fn mapping(
        &mut self,
        entries: &mut dyn FnMut(&mut dyn ValueOut) -> Result<()>,
    ) -> Result<()> {
        self.container(MAP, |out| entries(out))
    }

    fn leaf(&mut self) -> &mut dyn ValueOut {
        self
    }
}

/// Reads a binary document from a byte slice.
///
/// Each container entered pushes a [`ValueInState`] window onto the
/// reader's [`NestedContextStack`], so reads by name search only the
/// enclosing container and unread values are skipped on exit.
pub struct BinaryWireIn<'a> {
    input: &'a [u8],
    pos: usize,
    stack: NestedContextStack<ValueInState>,
    /// Containers and type prefixes currently being decoded.
    nesting: usize,
}

impl<'a> BinaryWireIn<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        let mut stack = NestedContextStack::new();
        *stack.curr() = ValueInState {
            start: 0,
            limit: input.len(),
        };
        Self {
            input,
            pos: 0,
            stack,
            nesting: 0,
        }
    }

    /// Current depth of container nesting.
    pub fn depth(&self) -> usize {
        self.stack.level()
    }

    fn limit(&mut self) -> usize {
        self.stack.curr().limit
    }

    fn at_end(&mut self) -> bool {
        let limit = self.limit();
        self.pos >= limit
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.limit() {
            return Err(WireError::malformed(
                self.pos,
                format!("need {n} bytes, container ends first"),
            ));
        }
        let input = self.input;
        let slice = &input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn peek(&mut self) -> Result<u8> {
        if self.at_end() {
            return Err(WireError::malformed(self.pos, "unexpected end of container"));
        }
        Ok(self.input[self.pos])
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(self.take(2)?.get_u16_le())
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(self.take(4)?.get_u32_le())
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.take(4)?.get_i32_le())
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(self.take(8)?.get_i64_le())
    }

    fn name(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let at = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::malformed(at, "name is not UTF-8"))
    }

    fn block(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Descend into the container whose length prefix is next, run `body`
    /// inside its window, then continue after it whatever `body` consumed.
    fn enter<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let len = self.u32()? as usize;
        let start = self.pos;
        let end = start + len;
        if end > self.limit() {
            return Err(WireError::malformed(start, "container overruns its parent"));
        }
        self.stack.push();
        *self.stack.curr() = ValueInState { start, limit: end };
        let result = self.descend(body);
        self.stack.pop()?;
        self.pos = end;
        result
    }

    /// Run `body` one level deeper, failing once [`MAX_NESTING_DEPTH`] is
    /// reached.
    fn descend<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(WireError::malformed(
                self.pos,
                format!("nesting deeper than {MAX_NESTING_DEPTH}"),
            ));
        }
        self.nesting += 1;
        let result = body(self);
        self.nesting -= 1;
        result
    }

    fn expect(&mut self, tag: u8, expected: &'static str) -> Result<()> {
        let found = self.u8()?;
        if found != tag {
            return Err(WireError::UnexpectedType {
                expected,
                found: tag_name(found),
            });
        }
        Ok(())
    }

    fn skip_value(&mut self) -> Result<()> {
        let at = self.pos;
        let width = match self.u8()? {
            NULL | FALSE | TRUE => 0,
            I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 | DATE => 4,
            I64 | F64 | TIME | BINDING => 8,
            ZONED | UUID => 16,
            TEXT | BYTES | SEQUENCE | OBJECT | MAP => self.u32()? as usize,
            TYPE_LITERAL => self.u16()? as usize,
            TYPE_PREFIX => {
                let len = self.u16()? as usize;
                self.take(len)?;
                return self.descend(|r| r.skip_value());
            }
            other => return Err(WireError::malformed(at, tag_name(other))),
        };
        self.take(width).map(drop)
    }
}

impl WireIn for BinaryWireIn<'_> {
    fn read_event_name(&mut self) -> Result<Option<String>> {
        if self.at_end() {
            return Ok(None);
        }
        self.expect(FIELD, "field")?;
        self.name().map(Some)
    }

    fn read(&mut self, name: &str) -> Result<Option<&mut dyn ValueIn>> {
        let ValueInState { start, limit } = *self.stack.curr();
        let resume = self.pos;

        self.pos = start;
        let mut wrapped = None;
        let mut found = None;
        while self.pos < limit {
            let field_at = self.pos;
            self.expect(FIELD, "field")?;
            let matches = self.name()? == name;
            let value_at = self.pos;
            if matches {
                if field_at >= resume {
                    found = Some(value_at);
                    break;
                }
                wrapped.get_or_insert(value_at);
            }
            self.skip_value()?;
        }

        match found.or(wrapped) {
            Some(value_at) => {
                self.pos = value_at;
                Ok(Some(self))
            }
            None => {
                self.pos = resume;
                Ok(None)
            }
        }
    }

    fn value_in(&mut self) -> &mut dyn ValueIn {
        self
    }

    fn has_more(&mut self) -> Result<bool> {
        Ok(!self.at_end())
    }
}

impl ValueIn for BinaryWireIn<'_> {
    fn value(&mut self) -> Result<WireValue> {
        let at = self.pos;
        let value = match self.u8()? {
            NULL => WireValue::Null,
            FALSE => WireValue::Bool(false),
            TRUE => WireValue::Bool(true),
            I8 => WireValue::Int8(self.u8()? as i8),
            I16 => WireValue::Int16(self.u16()? as i16),
            I32 => WireValue::Int32(self.i32()?),
            I64 => WireValue::Int64(self.i64()?),
            U8 => WireValue::UInt8(self.u8()?),
            U16 => WireValue::UInt16(self.u16()?),
            U32 => WireValue::UInt32(self.u32()?),
            F32 => WireValue::Float32(f32::from_bits(self.u32()?)),
            F64 => WireValue::Float64(f64::from_bits(self.i64()? as u64)),
            TEXT => {
                let bytes = self.block()?;
                WireValue::Text(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| WireError::malformed(at, "text is not UTF-8"))?,
                )
            }
            BYTES => WireValue::Bytes(self.block()?.to_vec()),
            DATE => {
                let days = self.i32()?;
                WireValue::Date(
                    NaiveDate::from_num_days_from_ce_opt(days)
                        .ok_or_else(|| WireError::malformed(at, "date out of range"))?,
                )
            }
            TIME => {
                let secs = self.u32()?;
                let nanos = self.u32()?;
                WireValue::Time(
                    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                        .ok_or_else(|| WireError::malformed(at, "time out of range"))?,
                )
            }
            ZONED => {
                let secs = self.i64()?;
                let nanos = self.u32()?;
                let offset = FixedOffset::east_opt(self.i32()?)
                    .ok_or_else(|| WireError::malformed(at, "offset out of range"))?;
                let utc = DateTime::from_timestamp(secs, nanos)
                    .ok_or_else(|| WireError::malformed(at, "timestamp out of range"))?;
                WireValue::ZonedDateTime(utc.with_timezone(&offset))
            }
            UUID => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(self.take(16)?);
                WireValue::Uuid(Uuid::from_bytes(bytes))
            }
            TYPE_LITERAL => WireValue::TypeLiteral(self.name()?),
            TYPE_PREFIX => {
                let type_name = self.name()?;
                WireValue::Typed {
                    type_name,
                    value: Box::new(self.descend(|r| r.value())?),
                }
            }
            BINDING => WireValue::Binding(self.i64()?),
            SEQUENCE => WireValue::Sequence(self.enter(|r| {
                let mut items = Vec::new();
                while !r.at_end() {
                    items.push(r.value()?);
                }
                Ok(items)
            })?),
            OBJECT => WireValue::Object(self.enter(|r| {
                let mut fields = Vec::new();
                while let Some(name) = r.read_event_name()? {
                    fields.push((name, r.value()?));
                }
                Ok(fields)
            })?),
            MAP => WireValue::Map(self.enter(|r| {
                let mut entries = Vec::new();
                while !r.at_end() {
                    let key = r.value()?;
                    entries.push((key, r.value()?));
                }
                Ok(entries)
            })?),
            other => return Err(WireError::malformed(at, tag_name(other))),
        };
        Ok(value)
    }

    fn type_prefix(&mut self) -> Result<Option<String>> {
        if !self.at_end() && self.peek()? == TYPE_PREFIX {
            self.pos += 1;
            return self.name().map(Some);
        }
        Ok(None)
    }

    fn skip(&mut self) -> Result<()> {
        self.skip_value()
    }

    fn sequence(&mut self, items: &mut dyn FnMut(&mut dyn ValueIn) -> Result<()>) -> Result<()> {
        self.type_prefix()?;
        if self.peek()? == NULL {
            self.pos += 1;
            return Ok(());
        }
        self.expect(SEQUENCE, "sequence")?;
        self.enter(|r| items(r))
    }

    fn has_next_sequence_item(&mut self) -> Result<bool> {
        Ok(!self.at_end())
    }

    fn marshallable(&mut self, object: &mut dyn ReadMarshallable) -> Result<bool> {
        self.type_prefix()?;
        if self.peek()? == NULL {
            self.pos += 1;
            return Ok(false);
        }
        self.expect(OBJECT, "object")?;
        self.enter(|r| object.read_marshallable(r))?;
        Ok(true)
    }
}
