//! Compact JSON output.
//!
//! A document is one JSON object. Typed values become single-key objects
//! `{"@Type": value}`, bytes are base64 strings and temporal values are ISO
//! strings. There is no reader: JSON loses the integer widths and tags the
//! other wires keep.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use uuid::Uuid;

use crate::error::{Result, WireError};
use crate::out::{ValueOut, WireOut};
use crate::value::WriteMarshallable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Object,
    Array,
    Map,
    /// Closes itself after one value.
    Typed,
}

#[derive(Debug)]
struct Level {
    scope: Scope,
    count: usize,
}

fn json_string(text: &str) -> Result<String> {
    serde_json::to_string(text).map_err(|err| WireError::IllegalArgument(err.to_string()))
}

/// Writes a JSON document; call [`JsonWireOut::finish`] to close it.
pub struct JsonWireOut<'a> {
    buf: &'a mut BytesMut,
    levels: Vec<Level>,
    value_pending: bool,
}

impl<'a> JsonWireOut<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        buf.extend_from_slice(b"{");
        Self {
            buf,
            levels: vec![Level {
                scope: Scope::Object,
                count: 0,
            }],
            value_pending: false,
        }
    }

    /// Close the document object.
    pub fn finish(mut self) -> Result<()> {
        if self.levels.len() != 1 {
            return Err(WireError::IllegalState(
                "json document finished inside a value".to_string(),
            ));
        }
        self.push_str("}");
        Ok(())
    }

    fn push_str(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    /// Write the separator owed before a value; true in a map key position.
    fn begin_value(&mut self) -> Result<bool> {
        if std::mem::take(&mut self.value_pending) {
            return Ok(false);
        }
        let Some(level) = self.levels.last_mut() else {
            return Err(WireError::IllegalState("json document already closed".to_string()));
        };
        let (sep, key) = match level.scope {
            Scope::Array if level.count > 0 => (",", false),
            Scope::Map if level.count % 2 == 1 => (":", false),
            Scope::Map if level.count > 0 => (",", true),
            Scope::Map => ("", true),
            Scope::Object => {
                return Err(WireError::IllegalState(
                    "json object values need a field name".to_string(),
                ))
            }
            _ => ("", false),
        };
        level.count += 1;
        self.push_str(sep);
        Ok(key)
    }

    /// Close any typed wrappers completed by the value just written.
    fn end_value(&mut self) {
        while self
            .levels
            .last()
            .is_some_and(|level| level.scope == Scope::Typed)
        {
            self.levels.pop();
            self.push_str("}");
        }
    }

    fn scalar(&mut self, json: &str) -> Result<()> {
        if self.begin_value()? && !json.starts_with('"') {
            let key = json_string(json)?;
            self.push_str(&key);
        } else {
            self.push_str(json);
        }
        self.end_value();
        Ok(())
    }

    fn string(&mut self, text: &str) -> Result<()> {
        let json = json_string(text)?;
        self.scalar(&json)
    }

    fn float(&mut self, value: f64, text: String) -> Result<()> {
        if value.is_finite() {
            self.scalar(&text)
        } else {
            self.string(&text)
        }
    }

    fn nested(
        &mut self,
        scope: Scope,
        open: &str,
        close: &str,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        if self.begin_value()? {
            return Err(WireError::IllegalArgument(
                "json map keys must be scalars".to_string(),
            ));
        }
        self.push_str(open);
        self.levels.push(Level { scope, count: 0 });
        body(self)?;
        self.levels.pop();
        self.push_str(close);
        self.end_value();
        Ok(())
    }
}

impl WireOut for JsonWireOut<'_> {
    fn write(&mut self, name: &str) -> Result<&mut dyn ValueOut> {
        let key = json_string(name)?;
        let Some(level) = self.levels.last_mut() else {
            return Err(WireError::IllegalState("json document already closed".to_string()));
        };
        if level.scope != Scope::Object {
            return Err(WireError::IllegalState(format!(
                "field '{name}' written outside an object"
            )));
        }
        let sep = if level.count > 0 { "," } else { "" };
        level.count += 1;
        self.push_str(sep);
        self.push_str(&key);
        self.push_str(":");
        self.value_pending = true;
        Ok(self)
    }
}

impl ValueOut for JsonWireOut<'_> {
    fn bool(&mut self, flag: bool) -> Result<()> {
        self.scalar(if flag { "true" } else { "false" })
    }

    fn text(&mut self, text: Option<&str>) -> Result<()> {
        match text {
            None => self.scalar("null"),
            Some(text) => self.string(text),
        }
    }

    fn int8(&mut self, value: i8) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn int16(&mut self, value: i16) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn int32(&mut self, value: i32) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn int64(&mut self, value: i64) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn uint8(&mut self, value: u8) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn uint16(&mut self, value: u16) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn uint32(&mut self, value: u32) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn float32(&mut self, value: f32) -> Result<()> {
        self.float(f64::from(value), value.to_string())
    }

    fn float64(&mut self, value: f64) -> Result<()> {
        self.float(value, value.to_string())
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.string(&BASE64.encode(bytes))
    }

    fn raw_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes(bytes)
    }

    fn date(&mut self, date: NaiveDate) -> Result<()> {
        self.string(&date.to_string())
    }

    fn time(&mut self, time: NaiveTime) -> Result<()> {
        self.string(&time.to_string())
    }

    fn zoned_date_time(&mut self, value: &DateTime<FixedOffset>) -> Result<()> {
        self.string(&value.to_rfc3339_opts(SecondsFormat::AutoSi, false))
    }

    fn uuid(&mut self, uuid: Uuid) -> Result<()> {
        self.string(&uuid.hyphenated().to_string())
    }

    fn type_prefix(&mut self, type_name: &str) -> Result<()> {
        if self.begin_value()? {
            return Err(WireError::IllegalArgument(
                "json map keys must be scalars".to_string(),
            ));
        }
        let key = json_string(&format!("@{type_name}"))?;
        self.push_str("{");
        self.push_str(&key);
        self.push_str(":");
        self.levels.push(Level {
            scope: Scope::Typed,
            count: 0,
        });
        self.value_pending = true;
        Ok(())
    }

    fn type_literal(&mut self, type_name: &str) -> Result<()> {
        self.string(type_name)
    }

    fn binding(&mut self, value: i64) -> Result<()> {
        self.int64(value)
    }

    fn sequence(
        &mut self,
        items: &mut dyn FnMut(&mut dyn ValueOut) -> Result<()>,
    ) -> Result<()> {
        self.nested(Scope::Array, "[", "]", |out| items(out))
    }

    fn marshallable(&mut self, object: &dyn WriteMarshallable) -> Result<()> {
        self.nested(Scope::Object, "{", "}", |out| object.write_marshallable(out))
    }

    fn mapping(
        &mut self,
        entries: &mut dyn FnMut(&mut dyn ValueOut) -> Result<()>,
    ) -> Result<()> {
        self.nested(Scope::Map, "{", "}", |out| entries(out))
    }

    fn leaf(&mut self) -> &mut dyn ValueOut {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Marshallable, Scalar, Throwable};

    fn render(body: impl FnOnce(&mut JsonWireOut<'_>) -> Result<()>) -> serde_json::Value {
        let mut buf = BytesMut::new();
        let mut out = JsonWireOut::new(&mut buf);
        body(&mut out).unwrap();
        out.finish().unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    struct Quote {
        bid: f64,
        venue: &'static str,
    }

    impl WriteMarshallable for Quote {
        fn write_marshallable(&self, out: &mut dyn WireOut) -> Result<()> {
            out.write("bid")?.float64(self.bid)?;
            out.write("venue")?.text(Some(self.venue))
        }
    }

    impl Marshallable for Quote {
        fn type_name(&self) -> &str {
            "Quote"
        }
    }

    #[test]
    fn writes_valid_json_documents() {
        let quote = Quote {
            bid: 1.5,
            venue: "XLON",
        };
        let json = render(|out| {
            out.write("id")?.int64(3)?;
            out.write("quote")?.typed_marshallable(Some(&quote))?;
            out.write("tags")?.sequence(&mut |seq| {
                seq.text(Some("a"))?;
                seq.text(None)
            })?;
            out.write("raw")?.bytes(b"hi")
        });
        assert_eq!(
            json,
            serde_json::json!({
                "id": 3,
                "quote": {"@Quote": {"bid": 1.5, "venue": "XLON"}},
                "tags": ["a", null],
                "raw": "aGk=",
            })
        );
    }

    struct Side;

    impl Scalar for Side {
        fn type_name(&self) -> &str {
            "Side"
        }
        fn to_text(&self) -> String {
            "SELL".to_string()
        }
    }

    #[test]
    fn typed_scalars_and_errors_wrap_in_objects() {
        let error = Throwable::new("app::Error", Some("boom".into()));
        let json = render(|out| {
            out.write("err")?.throwable(&error)?;
            out.write("side")?.typed_scalar(&Side)?;
            out.write("after")?.int8(1)
        });
        assert_eq!(json["err"]["@app::Error"]["message"], "boom");
        assert!(json["err"]["@app::Error"]["stackTrace"]
            .as_array()
            .unwrap()
            .is_empty());
        assert_eq!(json["side"], serde_json::json!({"@Side": "SELL"}));
        assert_eq!(json["after"], 1);
    }

    #[test]
    fn map_keys_are_quoted() {
        let json = render(|out| {
            out.write("m")?.mapping(&mut |m| {
                m.int32(1)?;
                m.text(Some("one"))?;
                m.bool(true)?;
                m.float64(f64::NAN)
            })
        });
        assert_eq!(json["m"]["1"], "one");
        assert_eq!(json["m"]["true"], "NaN");
    }

    #[test]
    fn structured_map_keys_are_rejected() {
        let mut buf = BytesMut::new();
        let mut out = JsonWireOut::new(&mut buf);
        let err = out
            .write("m")
            .unwrap()
            .mapping(&mut |m| m.sequence(&mut |_| Ok(())))
            .unwrap_err();
        assert!(matches!(err, WireError::IllegalArgument(_)));
    }
}
