use std::thread;

use tracing::debug;
use wireprims_transport::{TcpEndpoint, WireStream};

use crate::buffered::BufferedChannel;
use crate::channel::{HeaderOutcome, TransportChannel, WireChannel};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::gateway::{Gateway, GatewayConfig};
use crate::header::ChannelHeader;
use crate::location::{Location, Scheme};

/// Redirects followed before giving up.
pub const MAX_REDIRECT_DEPTH: usize = 8;

/// Open a channel to `config.location`, sending `header`.
///
/// Redirects are followed: each offered location is tried in order and the
/// first that connects wins. Locations that fail to connect are skipped;
/// any other failure is returned as is.
pub fn connect(config: ChannelConfig, header: impl Into<ChannelHeader>) -> Result<Box<dyn WireChannel>> {
    let header = header.into();
    let location = config.location.clone();
    let channel = connect_at(&config, &header, &location, 0)?;
    if channel.config().buffered {
        Ok(Box::new(BufferedChannel::new(channel)?))
    } else {
        Ok(Box::new(channel))
    }
}

fn connect_at(
    config: &ChannelConfig,
    header: &ChannelHeader,
    location: &str,
    depth: usize,
) -> Result<TransportChannel> {
    let stream = open_stream(config, location)?;
    let config = ChannelConfig {
        location: location.to_string(),
        ..config.clone()
    };
    match TransportChannel::handshake(stream, config.clone(), header.clone())? {
        HeaderOutcome::Connected(channel) => Ok(channel),
        HeaderOutcome::Failed(reason) => Err(ChannelError::HandshakeFailed(reason)),
        HeaderOutcome::Redirect { locations } => {
            debug!(%location, ?locations, "redirected");
            if depth >= MAX_REDIRECT_DEPTH {
                return Err(ChannelError::HandshakeFailed(format!(
                    "more than {MAX_REDIRECT_DEPTH} redirects"
                )));
            }
            for next in &locations {
                match connect_at(&config, header, next, depth + 1) {
                    Ok(channel) => return Ok(channel),
                    Err(err) if err.is_io() => {
                        debug!(location = %next, error = %err, "redirect target failed");
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(ChannelError::RedirectExhausted { locations })
        }
    }
}

fn open_stream(config: &ChannelConfig, location: &str) -> Result<WireStream> {
    let parsed = Location::parse(location)?;
    match parsed.scheme() {
        Scheme::Tcp => {
            let addr = parsed.socket_addr()?;
            debug!(%addr, "connecting over tcp");
            Ok(TcpEndpoint::connect(&addr, config.connection_timeout)?)
        }
        Scheme::Internal => {
            let (client, server) = WireStream::loopback_pair();
            let gateway_config = GatewayConfig {
                connection_timeout: config.connection_timeout,
                max_payload_size: config.max_payload_size,
                ..GatewayConfig::default()
            };
            thread::Builder::new()
                .name("wireprims-internal".to_string())
                .spawn(move || {
                    if let Err(err) = Gateway::serve_session(server, &gateway_config) {
                        debug!(error = %err, "internal session ended");
                    }
                })?;
            Ok(client)
        }
        scheme => Err(ChannelError::UnsupportedOperation(format!(
            "{scheme} locations are output sinks, not channels"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HandlerHeader;

    #[test]
    fn unknown_scheme_fails_before_connecting() {
        let err = connect(ChannelConfig::new("ftp://example.com"), HandlerHeader::echo())
            .expect_err("ftp should be rejected");
        assert!(matches!(err, ChannelError::UnsupportedOperation(_)));
    }

    #[test]
    fn sink_schemes_are_not_channels() {
        let err = connect(ChannelConfig::new("file:///tmp/x"), HandlerHeader::echo())
            .expect_err("file should be rejected");
        assert!(matches!(err, ChannelError::UnsupportedOperation(_)));
    }

    #[test]
    fn internal_channel_echoes() {
        let mut channel = connect(ChannelConfig::default(), HandlerHeader::echo())
            .expect("internal channel should connect");
        channel
            .write_event("say", &mut |v| v.text(Some("hi")))
            .expect("write should succeed");
        let (event, value) = channel.read_one().expect("echo should arrive");
        assert_eq!(event, "say");
        assert_eq!(value.as_text().expect("text value"), Some("hi"));
    }

    #[test]
    fn json_wire_is_rejected_at_connect() {
        let config = ChannelConfig {
            wire_type: wireprims_wire::WireType::Json,
            ..ChannelConfig::default()
        };
        let err = connect(config, HandlerHeader::echo()).expect_err("json cannot be framed");
        assert!(matches!(err, ChannelError::IllegalArgument(_)));
    }
}
