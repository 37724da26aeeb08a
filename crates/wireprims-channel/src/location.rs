//! Location strings such as `tcp://host:port` or `internal://`.

use std::fmt;
use std::path::PathBuf;

use url::Url;

use crate::error::{ChannelError, Result};

/// Host used when a location names only a port, as in `tcp://:0`.
const DEFAULT_HOST: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    /// In-process loopback to a gateway session.
    Internal,
    File,
    Http,
    Https,
}

impl Scheme {
    pub fn name(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Internal => "internal",
            Scheme::File => "file",
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Schemes that only accept output, never a channel.
    pub fn is_sink(self) -> bool {
        matches!(self, Scheme::File | Scheme::Http | Scheme::Https)
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "tcp" => Some(Scheme::Tcp),
            "internal" => Some(Scheme::Internal),
            "file" => Some(Scheme::File),
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    scheme: Scheme,
    url: Url,
}

impl Location {
    /// Parse a location. Unknown schemes fail with `UnsupportedOperation`.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: String| ChannelError::Location {
            location: text.to_string(),
            reason,
        };
        let (scheme_name, rest) = text
            .split_once("://")
            .ok_or_else(|| invalid("missing '://'".to_string()))?;
        let scheme_name = scheme_name.to_ascii_lowercase();
        let scheme = Scheme::from_name(&scheme_name).ok_or_else(|| {
            ChannelError::UnsupportedOperation(format!("'{scheme_name}' locations are not supported"))
        })?;

        // A bare port leaves the host empty, which URLs reject.
        let normalized = if rest.starts_with(':') {
            format!("{scheme_name}://{DEFAULT_HOST}{rest}")
        } else {
            format!("{scheme_name}://{rest}")
        };
        let url = Url::parse(&normalized).map_err(|err| invalid(err.to_string()))?;
        Ok(Self { scheme, url })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// `host:port` of a tcp location.
    pub fn socket_addr(&self) -> Result<String> {
        let host = self.url.host_str().filter(|host| !host.is_empty());
        match (self.scheme, host, self.url.port()) {
            (Scheme::Tcp, Some(host), Some(port)) => Ok(format!("{host}:{port}")),
            (Scheme::Tcp, _, _) => Err(ChannelError::Location {
                location: self.as_str().to_string(),
                reason: "tcp locations need a host and port".to_string(),
            }),
            (scheme, _, _) => Err(ChannelError::IllegalArgument(format!(
                "{scheme} locations have no socket address"
            ))),
        }
    }

    /// Local path of a file location.
    pub fn file_path(&self) -> Result<PathBuf> {
        if self.scheme != Scheme::File {
            return Err(ChannelError::IllegalArgument(format!(
                "{} locations have no file path",
                self.scheme
            )));
        }
        self.url.to_file_path().map_err(|()| ChannelError::Location {
            location: self.as_str().to_string(),
            reason: "not a local file path".to_string(),
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_schemes() {
        let tcp = Location::parse("tcp://127.0.0.1:6502").unwrap();
        assert_eq!(tcp.scheme(), Scheme::Tcp);
        assert_eq!(tcp.socket_addr().unwrap(), "127.0.0.1:6502");

        assert_eq!(
            Location::parse("internal://").unwrap().scheme(),
            Scheme::Internal
        );
        assert!(Location::parse("HTTPS://example.com/in")
            .unwrap()
            .scheme()
            .is_sink());
    }

    #[test]
    fn bare_port_defaults_the_host() {
        let location = Location::parse("tcp://:0").unwrap();
        assert_eq!(location.socket_addr().unwrap(), "localhost:0");
    }

    #[test]
    fn unknown_scheme_is_unsupported() {
        let err = Location::parse("ftp://example.com/file").unwrap_err();
        assert!(matches!(err, ChannelError::UnsupportedOperation(_)));
    }

    #[test]
    fn malformed_locations_are_rejected() {
        let err = Location::parse("localhost:80").unwrap_err();
        assert!(matches!(err, ChannelError::Location { .. }));

        let err = Location::parse("tcp://localhost").unwrap().socket_addr().unwrap_err();
        assert!(matches!(err, ChannelError::Location { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn file_locations_have_paths() {
        let location = Location::parse("file:///tmp/out.yaml").unwrap();
        assert_eq!(location.file_path().unwrap(), PathBuf::from("/tmp/out.yaml"));
        assert!(location.socket_addr().is_err());
    }
}
