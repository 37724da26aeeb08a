//! Reader surface shared by every readable wire format.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::error::Result;
use crate::value::{mismatch, narrow, LongValue, ReadMarshallable, WireValue};

/// Reads named fields of the current container.
pub trait WireIn {
    /// Name of the next field, or `None` at the end of the container.
    fn read_event_name(&mut self) -> Result<Option<String>>;

    /// Position on the field called `name`, searching the rest of the
    /// container and then wrapping to its start. `None` if there is no such
    /// field; the position is then unchanged.
    fn read(&mut self, name: &str) -> Result<Option<&mut dyn ValueIn>>;

    /// Reader for the value after the last field name.
    fn value_in(&mut self) -> &mut dyn ValueIn;

    /// Whether any fields remain in the current container.
    fn has_more(&mut self) -> Result<bool>;
}

/// Reads one value. Typed getters are built on [`ValueIn::value`] and
/// narrow with overflow checks.
pub trait ValueIn {
    /// Decode the next value, whatever its shape.
    fn value(&mut self) -> Result<WireValue>;

    /// Consume a type prefix if one is next.
    fn type_prefix(&mut self) -> Result<Option<String>>;

    /// Enter a sequence; `items` reads elements while
    /// [`ValueIn::has_next_sequence_item`] holds. Unread elements are
    /// skipped. A null reads as an empty sequence.
    fn sequence(&mut self, items: &mut dyn FnMut(&mut dyn ValueIn) -> Result<()>) -> Result<()>;

    fn has_next_sequence_item(&mut self) -> Result<bool>;

    /// Read a structure into `object`, skipping any type prefix and any
    /// fields it leaves unread. Returns `false` for a null, leaving `object`
    /// untouched.
    fn marshallable(&mut self, object: &mut dyn ReadMarshallable) -> Result<bool>;

    fn skip(&mut self) -> Result<()> {
        self.value().map(drop)
    }

    fn bool(&mut self) -> Result<bool> {
        self.value()?.as_bool()
    }

    fn int8(&mut self) -> Result<i8> {
        narrow(self.value()?.as_i64()?, "int8")
    }

    fn int16(&mut self) -> Result<i16> {
        narrow(self.value()?.as_i64()?, "int16")
    }

    fn int32(&mut self) -> Result<i32> {
        narrow(self.value()?.as_i64()?, "int32")
    }

    fn int64(&mut self) -> Result<i64> {
        self.value()?.as_i64()
    }

    fn uint8(&mut self) -> Result<u8> {
        narrow(self.value()?.as_i64()?, "uint8")
    }

    fn uint16(&mut self) -> Result<u16> {
        narrow(self.value()?.as_i64()?, "uint16")
    }

    fn uint32(&mut self) -> Result<u32> {
        narrow(self.value()?.as_i64()?, "uint32")
    }

    fn float32(&mut self) -> Result<f32> {
        Ok(self.value()?.as_f64()? as f32)
    }

    fn float64(&mut self) -> Result<f64> {
        self.value()?.as_f64()
    }

    /// Text, with a null reading as `None`.
    fn text(&mut self) -> Result<Option<String>> {
        match self.value()?.into_untyped() {
            WireValue::Null => Ok(None),
            WireValue::Text(text) => Ok(Some(text)),
            other => Err(mismatch("text", &other)),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        match self.value()?.into_untyped() {
            WireValue::Bytes(bytes) => Ok(bytes),
            other => Err(mismatch("bytes", &other)),
        }
    }

    fn date(&mut self) -> Result<NaiveDate> {
        match self.value()?.into_untyped() {
            WireValue::Date(date) => Ok(date),
            other => Err(mismatch("date", &other)),
        }
    }

    fn time(&mut self) -> Result<NaiveTime> {
        match self.value()?.into_untyped() {
            WireValue::Time(time) => Ok(time),
            other => Err(mismatch("time", &other)),
        }
    }

    fn zoned_date_time(&mut self) -> Result<DateTime<FixedOffset>> {
        match self.value()?.into_untyped() {
            WireValue::ZonedDateTime(value) => Ok(value),
            other => Err(mismatch("zoned date-time", &other)),
        }
    }

    fn uuid(&mut self) -> Result<Uuid> {
        match self.value()?.into_untyped() {
            WireValue::Uuid(uuid) => Ok(uuid),
            other => Err(mismatch("uuid", &other)),
        }
    }

    fn type_literal(&mut self) -> Result<String> {
        match self.value()? {
            WireValue::TypeLiteral(name) => Ok(name),
            other => Err(mismatch("type literal", &other)),
        }
    }

    /// Store the next integer into a bound cell.
    fn int64_for_binding(&mut self, cell: &LongValue) -> Result<()> {
        cell.set(self.value()?.as_i64()?);
        Ok(())
    }

    /// Entries of a map or object, in encounter order.
    fn map(&mut self) -> Result<Vec<(WireValue, WireValue)>> {
        match self.value()?.into_untyped() {
            WireValue::Null => Ok(Vec::new()),
            WireValue::Map(entries) => Ok(entries),
            WireValue::Object(fields) => Ok(fields
                .into_iter()
                .map(|(name, value)| (WireValue::Text(name), value))
                .collect()),
            other => Err(mismatch("map", &other)),
        }
    }
}
