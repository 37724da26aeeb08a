//! Human-readable flow text wire.
//!
//! ```text
//! id: 7
//! order: !Order {
//!   symbol: EURUSD
//!   legs: [1, 2]
//!   fill: !Fill { px: 1.25, at: !!time 09:30:00 }
//! }
//! ```
//!
//! Document fields sit one per line. Objects are laid out one field per
//! line unless written as a leaf or nested inside a sequence or map.
//! Builtin tags use `!!`, type prefixes a single `!`. Mappings are tagged
//! `!!map { k: v }` so they read back as maps even when every key is text.
//! Text that would read back as something else is JSON-quoted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use uuid::Uuid;

use crate::error::{Result, WireError};
use crate::input::{ValueIn, WireIn};
use crate::out::{ValueOut, WireOut};
use crate::stack::{NestedContextStack, ValueInState, MAX_NESTING_DEPTH};
use crate::value::{ReadMarshallable, WireValue, WriteMarshallable};

const INDENT: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Document,
    Object,
    Sequence,
    Map,
}

#[derive(Debug, Clone, Copy)]
struct Level {
    scope: Scope,
    inline: bool,
    indent: usize,
    count: usize,
}

fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text == "true"
        || text == "false"
        || text.starts_with('!')
        || text.parse::<i64>().is_ok()
        || text.parse::<f64>().is_ok()
        || !text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./$@".contains(c))
}

fn quote(text: &str) -> Result<String> {
    serde_json::to_string(text).map_err(|err| WireError::IllegalArgument(err.to_string()))
}

fn token_text(text: &str) -> Result<String> {
    if needs_quotes(text) {
        quote(text)
    } else {
        Ok(text.to_string())
    }
}

fn type_token(name: &str) -> Result<String> {
    if name.is_empty() || name.contains(|c: char| c.is_whitespace() || ",[]{}\"".contains(c)) {
        quote(name)
    } else {
        Ok(name.to_string())
    }
}

/// Writes the text form of fields and values to a buffer.
pub struct TextWireOut<'a> {
    buf: &'a mut BytesMut,
    levels: Vec<Level>,
    value_pending: bool,
    leaf_next: bool,
}

impl<'a> TextWireOut<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self {
            buf,
            levels: vec![Level {
                scope: Scope::Document,
                inline: false,
                indent: 0,
                count: 0,
            }],
            value_pending: false,
            leaf_next: false,
        }
    }

    fn push_str(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    fn top(&mut self) -> &mut Level {
        // The document level is never popped.
        let last = self.levels.len() - 1;
        &mut self.levels[last]
    }

    /// Separator owed before the next value in the current scope.
    fn begin_value(&mut self) {
        if std::mem::take(&mut self.value_pending) {
            return;
        }
        let level = self.top();
        let sep = match level.scope {
            Scope::Sequence if level.count > 0 => ", ",
            Scope::Map if level.count % 2 == 1 => ": ",
            Scope::Map if level.count > 0 => ", ",
            Scope::Map => " ",
            _ => "",
        };
        level.count += 1;
        self.push_str(sep);
    }

    fn scalar(&mut self, text: &str) -> Result<()> {
        self.begin_value();
        self.leaf_next = false;
        self.push_str(text);
        Ok(())
    }

    fn tagged(&mut self, tag: &str, text: &str) -> Result<()> {
        self.scalar(&format!("!!{tag} {text}"))
    }

    fn open(&mut self, scope: Scope, bracket: &str) {
        self.begin_value();
        let parent = *self.top();
        let inline = std::mem::take(&mut self.leaf_next)
            || parent.inline
            || matches!(scope, Scope::Sequence | Scope::Map);
        let level = Level {
            scope,
            inline,
            indent: parent.indent + usize::from(parent.scope != Scope::Document),
            count: 0,
        };
        self.levels.push(level);
        self.push_str(bracket);
    }

    fn close(&mut self) {
        let Some(level) = self.levels.pop() else {
            return;
        };
        match level.scope {
            Scope::Sequence => self.push_str("]"),
            Scope::Map => self.push_str(" }"),
            Scope::Object if level.inline => self.push_str(" }"),
            Scope::Object if level.count == 0 => self.push_str("}"),
            _ => {
                let closing = format!("\n{}}}", INDENT.repeat(level.indent));
                self.push_str(&closing);
            }
        }
    }

    fn nested(
        &mut self,
        scope: Scope,
        bracket: &str,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.open(scope, bracket);
        let result = body(self);
        self.close();
        result
    }
}

impl WireOut for TextWireOut<'_> {
    fn write(&mut self, name: &str) -> Result<&mut dyn ValueOut> {
        let key = token_text(name)?;
        let level = *self.top();
        let prefix = match level.scope {
            Scope::Document if level.count == 0 => String::new(),
            Scope::Document => "\n".to_string(),
            Scope::Object if level.inline && level.count == 0 => " ".to_string(),
            Scope::Object if level.inline => ", ".to_string(),
            Scope::Object => format!("\n{}", INDENT.repeat(level.indent + 1)),
            Scope::Sequence | Scope::Map => {
                return Err(WireError::IllegalState(format!(
                    "field '{name}' written inside a {:?}",
                    level.scope
                )))
            }
        };
        self.top().count += 1;
        self.push_str(&prefix);
        self.push_str(&key);
        self.push_str(": ");
        self.value_pending = true;
        Ok(self)
    }
}

impl ValueOut for TextWireOut<'_> {
    fn bool(&mut self, flag: bool) -> Result<()> {
        self.scalar(if flag { "true" } else { "false" })
    }

    fn text(&mut self, text: Option<&str>) -> Result<()> {
        match text {
            None => self.scalar("!!null"),
            Some(text) => self.scalar(&token_text(text)?),
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
        self.scalar(&format!("{value:?}"))
    }

    fn float64(&mut self, value: f64) -> Result<()> {
        self.scalar(&format!("{value:?}"))
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.tagged("binary", &quote(&BASE64.encode(bytes))?)
    }

    fn raw_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes(bytes)
    }

    fn date(&mut self, date: NaiveDate) -> Result<()> {
        self.tagged("date", &date.to_string())
    }

    fn time(&mut self, time: NaiveTime) -> Result<()> {
        self.tagged("time", &time.to_string())
    }

    fn zoned_date_time(&mut self, value: &DateTime<FixedOffset>) -> Result<()> {
        self.tagged("zdt", &value.to_rfc3339_opts(SecondsFormat::AutoSi, false))
    }

    fn uuid(&mut self, uuid: Uuid) -> Result<()> {
        self.tagged("uuid", &uuid.hyphenated().to_string())
    }

    fn type_prefix(&mut self, type_name: &str) -> Result<()> {
        self.begin_value();
        let token = format!("!{} ", type_token(type_name)?);
        self.push_str(&token);
        self.value_pending = true;
        Ok(())
    }

    fn type_literal(&mut self, type_name: &str) -> Result<()> {
        self.tagged("type", &type_token(type_name)?)
    }

    fn binding(&mut self, value: i64) -> Result<()> {
        self.tagged("atomic", &value.to_string())
    }

    fn sequence(
        &mut self,
        items: &mut dyn FnMut(&mut dyn ValueOut) -> Result<()>,
    ) -> Result<()> {
        self.nested(Scope::Sequence, "[", |out| items(out))
    }

    fn marshallable(&mut self, object: &dyn WriteMarshallable) -> Result<()> {
        self.nested(Scope::Object, "{", |out| object.write_marshallable(out))
    }

    fn mapping(
        &mut self,
        entries: &mut dyn FnMut(&mut dyn ValueOut) -> Result<()>,
    ) -> Result<()> {
        self.nested(Scope::Map, "!!map {", |out| entries(out))
    }

    fn leaf(&mut self) -> &mut dyn ValueOut {
        self.leaf_next = true;
        self
    }
}

/// Parses a text document.
pub struct TextWireIn<'a> {
    input: &'a str,
    pos: usize,
    stack: NestedContextStack<ValueInState>,
    nesting: usize,
}

impl<'a> TextWireIn<'a> {
    pub fn new(input: &'a str) -> Self {
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

    fn src(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn limit(&mut self) -> usize {
        self.stack.curr().limit
    }

    fn at_end(&mut self) -> bool {
        let limit = self.limit();
        self.pos >= limit
    }

    fn peek(&mut self) -> Option<u8> {
        if self.at_end() {
            None
        } else {
            Some(self.src()[self.pos])
        }
    }

    /// Skip whitespace and the commas separating entries.
    fn skip_ws(&mut self) {
        let limit = self.limit();
        let bytes = self.src();
        while self.pos < limit && (bytes[self.pos].is_ascii_whitespace() || bytes[self.pos] == b',') {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        self.skip_ws();
        if self.peek() != Some(byte) {
            return Err(WireError::malformed(
                self.pos,
                format!("expected '{}'", byte as char),
            ));
        }
        self.pos += 1;
        Ok(())
    }

    /// End of a bare token starting at the current position.
    fn token_end(&mut self) -> usize {
        let limit = self.limit();
        let bytes = self.src();
        let mut end = self.pos;
        while end < limit {
            match bytes[end] {
                b if b.is_ascii_whitespace() => break,
                b',' | b'[' | b']' | b'{' | b'}' => break,
                b':' if end + 1 >= limit || bytes[end + 1].is_ascii_whitespace() => break,
                _ => end += 1,
            }
        }
        end
    }

    /// Offset just past the closing quote of the string starting at `from`.
    fn quoted_end(&self, from: usize) -> Result<usize> {
        let bytes = self.src();
        let mut i = from + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'"' => return Ok(i + 1),
                _ => i += 1,
            }
        }
        Err(WireError::malformed(from, "unterminated string"))
    }

    /// Offset of the bracket closing the one at `open`.
    fn closing_bracket(&self, open: usize) -> Result<usize> {
        let bytes = self.src();
        let mut depth = 0usize;
        let mut i = open;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => {
                    i = self.quoted_end(i)?;
                    continue;
                }
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Err(WireError::malformed(open, "unclosed bracket"))
    }

    /// A token, quoted or bare, as raw text.
    fn token(&mut self) -> Result<(String, bool)> {
        self.skip_ws();
        let start = self.pos;
        if self.peek() == Some(b'"') {
            let end = self.quoted_end(start)?;
            if end > self.limit() {
                return Err(WireError::malformed(start, "string overruns its container"));
            }
            let text: String = serde_json::from_str(&self.input[start..end])
                .map_err(|err| WireError::malformed(start, err.to_string()))?;
            self.pos = end;
            return Ok((text, true));
        }
        let end = self.token_end();
        if end == start {
            return Err(WireError::malformed(start, "expected a value"));
        }
        self.pos = end;
        Ok((self.input[start..end].to_string(), false))
    }

    fn key(&mut self) -> Result<String> {
        let (key, _) = self.token()?;
        self.expect(b':')?;
        Ok(key)
    }

    fn at_null(&mut self) -> bool {
        self.skip_ws();
        if !self.input[self.pos..].starts_with("!!null") {
            return false;
        }
        let start = self.pos;
        self.pos += "!!null".len();
        let end = self.token_end();
        self.pos = start;
        end == start + "!!null".len()
    }

    fn enter<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.skip_ws();
        let open = self.pos;
        let close = self.closing_bracket(open)?;
        if close >= self.limit() {
            return Err(WireError::malformed(open, "container overruns its parent"));
        }
        self.stack.push();
        *self.stack.curr() = ValueInState {
            start: open + 1,
            limit: close,
        };
        self.pos = open + 1;
        let result = self.descend(body);
        self.stack.pop()?;
        self.pos = close + 1;
        result
    }

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

    fn builtin(&mut self) -> Result<WireValue> {
        let at = self.pos;
        self.pos += 2;
        let (tag, _) = self.token()?;
        match tag.as_str() {
            "null" => return Ok(WireValue::Null),
            "map" => {
                self.skip_ws();
                if self.peek() != Some(b'{') {
                    return Err(WireError::malformed(self.pos, "expected '{' after !!map"));
                }
                return self.pairs().map(WireValue::Map);
            }
            _ => {}
        }
        let (text, _) = self.token()?;
        let bad = |what: &str| WireError::malformed(at, format!("invalid !!{what} value '{text}'"));
        let value = match tag.as_str() {
            "binary" => WireValue::Bytes(BASE64.decode(&text).map_err(|_| bad("binary"))?),
            "date" => WireValue::Date(text.parse().map_err(|_| bad("date"))?),
            "time" => WireValue::Time(text.parse().map_err(|_| bad("time"))?),
            "zdt" => WireValue::ZonedDateTime(
                DateTime::parse_from_rfc3339(&text).map_err(|_| bad("zdt"))?,
            ),
            "uuid" => WireValue::Uuid(Uuid::parse_str(&text).map_err(|_| bad("uuid"))?),
            "type" => WireValue::TypeLiteral(text.clone()),
            "atomic" => WireValue::Binding(text.parse().map_err(|_| bad("atomic"))?),
            other => return Err(WireError::malformed(at, format!("unknown tag !!{other}"))),
        };
        Ok(value)
    }

    fn scalar(&mut self) -> Result<WireValue> {
        let (token, quoted) = self.token()?;
        if quoted {
            return Ok(WireValue::Text(token));
        }
        Ok(match token.as_str() {
            "true" => WireValue::Bool(true),
            "false" => WireValue::Bool(false),
            _ => {
                if let Ok(v) = token.parse::<i64>() {
                    WireValue::Int64(v)
                } else if let Ok(v) = token.parse::<f64>() {
                    WireValue::Float64(v)
                } else {
                    WireValue::Text(token)
                }
            }
        })
    }

    /// Key and value pairs of the braced container that is next.
    fn pairs(&mut self) -> Result<Vec<(WireValue, WireValue)>> {
        self.enter(|r| {
            let mut entries = Vec::new();
            loop {
                r.skip_ws();
                if r.at_end() {
                    break;
                }
                let key = r.value()?;
                r.expect(b':')?;
                entries.push((key, r.value()?));
            }
            Ok(entries)
        })
    }

    /// An untagged braced container: an object when every key is text.
    fn entries(&mut self) -> Result<WireValue> {
        let entries = self.pairs()?;
        if entries.iter().all(|(k, _)| matches!(k, WireValue::Text(_))) {
            Ok(WireValue::Object(
                entries
                    .into_iter()
                    .filter_map(|(k, v)| match k {
                        WireValue::Text(name) => Some((name, v)),
                        _ => None,
                    })
                    .collect(),
            ))
        } else {
            Ok(WireValue::Map(entries))
        }
    }
}

impl WireIn for TextWireIn<'_> {
    fn read_event_name(&mut self) -> Result<Option<String>> {
        self.skip_ws();
        if self.at_end() {
            return Ok(None);
        }
        self.key().map(Some)
    }

    fn read(&mut self, name: &str) -> Result<Option<&mut dyn ValueIn>> {
        let start = self.stack.curr().start;
        let resume = self.pos;

        self.pos = start;
        let mut wrapped = None;
        let mut found = None;
        loop {
            self.skip_ws();
            if self.at_end() {
                break;
            }
            let field_at = self.pos;
            let matches = self.key()? == name;
            self.skip_ws();
            let value_at = self.pos;
            if matches {
                if field_at >= resume {
                    found = Some(value_at);
                    break;
                }
                wrapped.get_or_insert(value_at);
            }
            self.value()?;
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
        self.skip_ws();
        Ok(!self.at_end())
    }
}

impl ValueIn for TextWireIn<'_> {
    fn value(&mut self) -> Result<WireValue> {
        self.skip_ws();
        match self.peek() {
            None => Err(WireError::malformed(self.pos, "expected a value")),
            Some(b'{') => self.entries(),
            Some(b'[') => Ok(WireValue::Sequence(self.enter(|r| {
                let mut items = Vec::new();
                while r.has_next_sequence_item()? {
                    items.push(r.value()?);
                }
                Ok(items)
            })?)),
            Some(b'!') if self.src().get(self.pos + 1) == Some(&b'!') => self.builtin(),
            Some(b'!') => {
                let type_name = self.type_prefix()?.unwrap_or_default();
                Ok(WireValue::Typed {
                    type_name,
                    value: Box::new(self.descend(|r| r.value())?),
                })
            }
            Some(_) => self.scalar(),
        }
    }

    fn type_prefix(&mut self) -> Result<Option<String>> {
        self.skip_ws();
        let bytes = self.src();
        if self.peek() != Some(b'!') || bytes.get(self.pos + 1) == Some(&b'!') {
            return Ok(None);
        }
        self.pos += 1;
        let (name, _) = self.token()?;
        Ok(Some(name))
    }

    fn sequence(&mut self, items: &mut dyn FnMut(&mut dyn ValueIn) -> Result<()>) -> Result<()> {
        self.type_prefix()?;
        if self.at_null() {
            return self.skip();
        }
        if self.peek() != Some(b'[') {
            return Err(WireError::UnexpectedType {
                expected: "sequence",
                found: self.value()?.kind().to_string(),
            });
        }
        self.enter(|r| items(r))
    }

    fn has_next_sequence_item(&mut self) -> Result<bool> {
        self.skip_ws();
        Ok(!self.at_end())
    }

    fn marshallable(&mut self, object: &mut dyn ReadMarshallable) -> Result<bool> {
        self.type_prefix()?;
        if self.at_null() {
            self.skip()?;
            return Ok(false);
        }
        if self.peek() != Some(b'{') {
            return Err(WireError::UnexpectedType {
                expected: "object",
                found: self.value()?.kind().to_string(),
            });
        }
        self.enter(|r| object.read_marshallable(r))?;
        Ok(true)
    }
}
