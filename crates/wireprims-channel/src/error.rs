use wireprims_frame::FrameError;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] wireprims_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Encoding or decoding a document failed.
    #[error("wire error: {0}")]
    Wire(#[from] wireprims_wire::WireError),

    /// The header exchange failed or the peer refused the session.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// No header arrived within the connection timeout.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Every location a redirect offered failed.
    #[error("no redirect location reachable: {locations:?}")]
    RedirectExhausted { locations: Vec<String> },

    /// The channel was closed locally.
    #[error("channel closed")]
    Closed,

    /// The location or operation is recognised but not implemented.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A location string could not be parsed.
    #[error("invalid location '{location}': {reason}")]
    Location { location: String, reason: String },

    /// HTTP sink request failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// True for failures of reaching or talking to a peer, as opposed to
    /// failures of what was said. Redirects move on to the next location
    /// only for these.
    pub fn is_io(&self) -> bool {
        match self {
            ChannelError::Transport(_)
            | ChannelError::Io(_)
            | ChannelError::Disconnected(_)
            | ChannelError::Timeout(_)
            | ChannelError::RedirectExhausted { .. } => true,
            ChannelError::Frame(err) => {
                matches!(err, FrameError::Io(_) | FrameError::ConnectionClosed)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_io_failures() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(ChannelError::Io(refused).is_io());
        assert!(ChannelError::Frame(FrameError::ConnectionClosed).is_io());
        assert!(!ChannelError::Frame(FrameError::InvalidMagic).is_io());
        assert!(!ChannelError::HandshakeFailed("refused".into()).is_io());
        assert!(!ChannelError::UnsupportedOperation("ftp".into()).is_io());
    }
}
