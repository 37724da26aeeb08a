//! Write-only document outputs: files and HTTP endpoints.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use tracing::debug;
use wireprims_wire::{Result as WireResult, ValueOut, WireOut, WireType};

use crate::error::{ChannelError, Result};
use crate::location::{Location, Scheme};

/// Line written between documents in a file sink.
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Destination for documents that are never read back.
pub trait DocumentSink: Send + std::fmt::Debug {
    fn wire_type(&self) -> WireType;

    /// Write one document; `body` writes its fields.
    fn write_document(
        &mut self,
        body: &mut dyn FnMut(&mut dyn WireOut) -> WireResult<()>,
    ) -> Result<()>;

    /// Write a document holding a single event.
    fn write_event(
        &mut self,
        event: &str,
        body: &mut dyn FnMut(&mut dyn ValueOut) -> WireResult<()>,
    ) -> Result<()> {
        self.write_document(&mut |out| body(out.write(event)?))
    }
}

/// Opens a [`DocumentSink`] for a `file://` or `http(s)://` location.
#[derive(Debug, Clone)]
pub struct SinkBuilder {
    location: String,
    wire_type: Option<WireType>,
    timeout: Duration,
}

impl SinkBuilder {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            wire_type: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Wire to write with. Files take text, HTTP endpoints take json; those
    /// are also the defaults.
    pub fn wire_type(mut self, wire_type: WireType) -> Self {
        self.wire_type = Some(wire_type);
        self
    }

    /// Bound on each HTTP request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Box<dyn DocumentSink>> {
        let location = Location::parse(&self.location)?;
        match location.scheme() {
            Scheme::File => {
                require_wire(&location, self.wire_type, WireType::Text)?;
                Ok(Box::new(FileSink::open(location.file_path()?)?))
            }
            Scheme::Http | Scheme::Https => {
                require_wire(&location, self.wire_type, WireType::Json)?;
                Ok(Box::new(HttpSink::new(location.as_str(), self.timeout)?))
            }
            scheme @ (Scheme::Tcp | Scheme::Internal) => Err(ChannelError::UnsupportedOperation(
                format!("{scheme} locations are channels; connect to them instead"),
            )),
        }
    }
}

fn require_wire(location: &Location, requested: Option<WireType>, supported: WireType) -> Result<()> {
    match requested {
        Some(wire) if wire != supported => Err(ChannelError::IllegalArgument(format!(
            "unsupported wire type; {} sinks write {supported}, not {wire}",
            location.scheme()
        ))),
        _ => Ok(()),
    }
}

/// Appends text documents to a file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    /// Nothing precedes the next document.
    at_start: bool,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let at_start = file.metadata()?.len() == 0;
        debug!(path = %path.display(), "opened file sink");
        Ok(Self {
            path,
            file,
            at_start,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSink for FileSink {
    fn wire_type(&self) -> WireType {
        WireType::Text
    }

    fn write_document(
        &mut self,
        body: &mut dyn FnMut(&mut dyn WireOut) -> WireResult<()>,
    ) -> Result<()> {
        let mut buf = BytesMut::new();
        if !self.at_start {
            buf.extend_from_slice(DOCUMENT_SEPARATOR.as_bytes());
        }
        WireType::Text.write_document(&mut buf, |out| body(out))?;
        if !buf.ends_with(b"\n") {
            buf.extend_from_slice(b"\n");
        }
        self.file.write_all(&buf)?;
        self.file.flush()?;
        self.at_start = false;
        Ok(())
    }
}

/// POSTs each document as a json body.
#[derive(Debug)]
pub struct HttpSink {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl DocumentSink for HttpSink {
    fn wire_type(&self) -> WireType {
        WireType::Json
    }

    fn write_document(
        &mut self,
        body: &mut dyn FnMut(&mut dyn WireOut) -> WireResult<()>,
    ) -> Result<()> {
        let mut buf = BytesMut::new();
        WireType::Json.write_document(&mut buf, |out| body(out))?;
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(buf.to_vec())
            .send()?;
        let status = response.status();
        response.error_for_status()?;
        debug!(url = %self.url, %status, "posted document");
        Ok(())
    }
}
