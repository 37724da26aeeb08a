//! Bit-packed text codec for 64-bit identifiers.
//!
//! An alphabet of `2^k` ASCII symbols maps each `k`-bit group of a value to
//! one character, most significant group first. Zero encodes as the empty
//! string and decodes back to zero.

use tracing::warn;

use crate::error::{Result, WireError};

const ASCII_TABLE_SIZE: usize = 128;
const INVALID: i16 = -1;

/// Converts between 64-bit values and short text forms.
pub trait LongConverter {
    /// Decode `text` to a value.
    fn parse(&self, text: &str) -> Result<i64>;

    /// Append the text form of `value` to `text`.
    fn append(&self, text: &mut String, value: i64);

    /// Longest text `parse` accepts.
    fn max_parse_length(&self) -> usize;
}

/// [`LongConverter`] over a power-of-two alphabet.
#[derive(Debug, Clone)]
pub struct SymbolCodec {
    shift: u32,
    mask: u64,
    encode: [i16; ASCII_TABLE_SIZE],
    decode: Vec<u8>,
    max_parse_length: usize,
}

impl SymbolCodec {
    /// Build a codec from an alphabet; its length must be a power of two
    /// between 2 and 128 and every symbol must be distinct ASCII.
    pub fn new(symbols: &str) -> Result<Self> {
        let len = symbols.len();
        if !symbols.is_ascii() {
            return Err(WireError::IllegalArgument(format!(
                "alphabet must be ASCII: {symbols:?}"
            )));
        }
        if len < 2 || len > ASCII_TABLE_SIZE || !len.is_power_of_two() {
            return Err(WireError::IllegalArgument(format!(
                "alphabet length must be a power of two in 2..=128, got {len}"
            )));
        }

        let shift = len.trailing_zeros();
        let mut encode = [INVALID; ASCII_TABLE_SIZE];
        for (i, ch) in symbols.bytes().enumerate() {
            if encode[ch as usize] != INVALID {
                return Err(WireError::IllegalArgument(format!(
                    "duplicate symbol '{}' in alphabet",
                    ch as char
                )));
            }
            encode[ch as usize] = i as i16;
        }

        Ok(Self {
            shift,
            mask: (1u64 << shift) - 1,
            encode,
            decode: symbols.as_bytes().to_vec(),
            max_parse_length: 64usize.div_ceil(shift as usize),
        })
    }

    /// `0-9a-f`, accepting upper-case `A-F` as aliases.
    pub fn hex() -> Self {
        let mut codec = Self::from_static("0123456789abcdef");
        for (upper, lower) in ('A'..='F').zip('a'..='f') {
            codec.alias_unchecked(upper, lower);
        }
        codec
    }

    /// RFC 4648 base32 symbols in value order, accepting lower case.
    pub fn base32() -> Self {
        let mut codec = Self::from_static("ABCDEFGHIJKLMNOPQRSTUVWXYZ234567");
        for (lower, upper) in ('a'..='z').zip('A'..='Z') {
            codec.alias_unchecked(lower, upper);
        }
        codec
    }

    /// URL-safe 64-symbol alphabet ordered by ASCII code.
    pub fn base64() -> Self {
        Self::from_static("-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz")
    }

    /// Bits consumed per symbol.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Make `alias` decode to the same value as `canonical`. Encoding still
    /// emits `canonical`.
    pub fn add_alias(&mut self, alias: char, canonical: char) -> Result<()> {
        let value = self.lookup(canonical).ok_or_else(|| {
            WireError::IllegalArgument(format!("'{canonical}' is not in the alphabet"))
        })?;
        if !alias.is_ascii() {
            return Err(WireError::IllegalArgument(format!(
                "alias '{alias}' is not ASCII"
            )));
        }
        self.encode[alias as usize] = value;
        Ok(())
    }

    /// Text form of `value`.
    pub fn encode(&self, value: i64) -> String {
        let mut text = String::with_capacity(self.max_parse_length);
        self.append(&mut text, value);
        text
    }

    fn from_static(symbols: &'static str) -> Self {
        match Self::new(symbols) {
            Ok(codec) => codec,
            Err(err) => unreachable!("built-in alphabet rejected: {err}"),
        }
    }

    fn alias_unchecked(&mut self, alias: char, canonical: char) {
        self.encode[alias as usize] = self.encode[canonical as usize];
    }

    fn lookup(&self, ch: char) -> Option<i16> {
        let idx = ch as usize;
        if idx >= ASCII_TABLE_SIZE || self.encode[idx] == INVALID {
            None
        } else {
            Some(self.encode[idx])
        }
    }
}

impl LongConverter for SymbolCodec {
    fn parse(&self, text: &str) -> Result<i64> {
        if text.len() > self.max_parse_length {
            return Err(WireError::InvalidSymbol {
                text: text.to_string(),
                reason: format!("longer than {} symbols", self.max_parse_length),
            });
        }

        let mut value: u64 = 0;
        for ch in text.chars() {
            let code = self.lookup(ch).ok_or_else(|| WireError::InvalidSymbol {
                text: text.to_string(),
                reason: format!("unexpected character '{ch}'"),
            })?;
            value = (value << self.shift).wrapping_add(code as u64);
        }
        Ok(value as i64)
    }

    fn append(&self, text: &mut String, value: i64) {
        let mut rest = value as u64;
        let mut digits = Vec::with_capacity(self.max_parse_length + 1);
        while rest != 0 {
            digits.push(self.decode[(rest & self.mask) as usize]);
            rest >>= self.shift;
        }

        if digits.len() > self.max_parse_length {
            warn!(value, "symbol text truncated because the value was too large");
        }
        digits.reverse();
        digits.truncate(self.max_parse_length);
        text.extend(digits.into_iter().map(char::from));
    }

    fn max_parse_length(&self) -> usize {
        self.max_parse_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_matches_std_formatting() {
        let codec = SymbolCodec::hex();
        for value in [1i64, 0xff, 0xfff, 0xdead_beef, i64::MAX] {
            assert_eq!(codec.encode(value), format!("{value:x}"));
            assert_eq!(codec.parse(&format!("{value:x}")).unwrap(), value);
        }
    }

    #[test]
    fn zero_is_empty_text() {
        let codec = SymbolCodec::base64();
        assert_eq!(codec.encode(0), "");
        assert_eq!(codec.parse("").unwrap(), 0);
    }

    #[test]
    fn round_trips_across_alphabets() {
        let codecs = [
            SymbolCodec::hex(),
            SymbolCodec::base32(),
            SymbolCodec::base64(),
            SymbolCodec::new("01").unwrap(),
            SymbolCodec::new("0123").unwrap(),
        ];
        let mut value: i64 = 1;
        let mut samples = vec![0, i64::MAX, i64::MAX - 1];
        while value > 0 {
            samples.push(value);
            samples.push(value.wrapping_mul(7) & i64::MAX);
            value = value.wrapping_mul(3);
        }

        for codec in &codecs {
            for &v in &samples {
                let text = codec.encode(v);
                assert!(text.len() <= codec.max_parse_length());
                assert_eq!(codec.parse(&text).unwrap(), v, "shift {}", codec.shift());
            }
        }
    }

    #[test]
    fn negative_values_use_all_bits() {
        let codec = SymbolCodec::hex();
        let text = codec.encode(-1);
        assert_eq!(text, "ffffffffffffffff");
        assert_eq!(codec.parse(&text).unwrap(), -1);
    }

    #[test]
    fn max_parse_length_per_alphabet() {
        assert_eq!(SymbolCodec::hex().max_parse_length(), 16);
        assert_eq!(SymbolCodec::base32().max_parse_length(), 13);
        assert_eq!(SymbolCodec::base64().max_parse_length(), 11);
        assert_eq!(SymbolCodec::new("01").unwrap().max_parse_length(), 64);
    }

    #[test]
    fn rejects_unknown_character() {
        let codec = SymbolCodec::hex();
        let err = codec.parse("12g").unwrap_err();
        assert!(matches!(err, WireError::InvalidSymbol { .. }));
        assert!(codec.parse("é").is_err());
    }

    #[test]
    fn rejects_overlong_text() {
        let codec = SymbolCodec::hex();
        let err = codec.parse(&"1".repeat(17)).unwrap_err();
        assert!(matches!(err, WireError::InvalidSymbol { .. }));
    }

    #[test]
    fn aliases_decode_like_canonicals() {
        let codec = SymbolCodec::hex();
        assert_eq!(codec.parse("DEADBEEF").unwrap(), codec.parse("deadbeef").unwrap());
        assert_eq!(codec.encode(0xab), "ab");

        let mut custom = SymbolCodec::new("0123456789ABCDEF").unwrap();
        custom.add_alias('o', '0').unwrap();
        assert_eq!(custom.parse("1o").unwrap(), 0x10);
        assert!(custom.add_alias('x', 'z').is_err());
    }

    #[test]
    fn rejects_bad_alphabets() {
        assert!(matches!(
            SymbolCodec::new("abc"),
            Err(WireError::IllegalArgument(_))
        ));
        assert!(matches!(
            SymbolCodec::new("aa"),
            Err(WireError::IllegalArgument(_))
        ));
        assert!(SymbolCodec::new("0").is_err());
    }

    #[test]
    fn append_preserves_existing_prefix() {
        let codec = SymbolCodec::hex();
        let mut text = String::from("id=");
        codec.append(&mut text, 0xfff);
        assert_eq!(text, "id=fff");
    }
}
