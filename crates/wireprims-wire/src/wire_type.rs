use std::fmt;
use std::str::FromStr;

use bytes::BytesMut;

use crate::binary::{BinaryWireIn, BinaryWireOut};
use crate::error::{Result, WireError};
use crate::input::WireIn;
use crate::json::JsonWireOut;
use crate::out::WireOut;
use crate::text::{TextWireIn, TextWireOut};

/// Encoding used for a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WireType {
    #[default]
    Binary,
    Text,
    /// Write-only.
    Json,
}

impl WireType {
    pub fn name(self) -> &'static str {
        match self {
            WireType::Binary => "binary",
            WireType::Text => "text",
            WireType::Json => "json",
        }
    }

    /// Encode one document into `buf` with `body` writing its fields.
    pub fn write_document<F>(self, buf: &mut BytesMut, body: F) -> Result<()>
    where
        F: FnOnce(&mut dyn WireOut) -> Result<()>,
    {
        match self {
            WireType::Binary => body(&mut BinaryWireOut::new(buf)),
            WireType::Text => body(&mut TextWireOut::new(buf)),
            WireType::Json => {
                let mut out = JsonWireOut::new(buf);
                body(&mut out)?;
                out.finish()
            }
        }
    }

    /// Decode one document from `input`, handing its fields to `body`.
    pub fn read_document<T, F>(self, input: &[u8], body: F) -> Result<T>
    where
        F: FnOnce(&mut dyn WireIn) -> Result<T>,
    {
        match self {
            WireType::Binary => body(&mut BinaryWireIn::new(input)),
            WireType::Text => {
                let text = std::str::from_utf8(input)
                    .map_err(|err| WireError::malformed(err.valid_up_to(), "text is not UTF-8"))?;
                body(&mut TextWireIn::new(text))
            }
            WireType::Json => Err(WireError::UnsupportedOperation(
                "the json wire is write-only".to_string(),
            )),
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WireType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(WireType::Binary),
            "text" | "yaml" => Ok(WireType::Text),
            "json" => Ok(WireType::Json),
            other => Err(WireError::IllegalArgument(format!(
                "unknown wire type '{other}'"
            ))),
        }
    }
}
