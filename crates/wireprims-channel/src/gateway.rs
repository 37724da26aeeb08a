//! Server side of the header exchange.
//!
//! A gateway accepts connections, answers each client's header and runs the
//! requested session. The only built-in session echoes every document back.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;
use wireprims_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD};
use wireprims_transport::{TcpEndpoint, WireStream};

use crate::error::{ChannelError, Result};
use crate::handshake::{read_header, write_header};
use crate::header::{
    ChannelHeader, ErrorReplyHeader, HandlerKind, Header, OkHeader, SystemContext,
};
use crate::location::{Location, Scheme};

/// Longest a session read blocks before checking for gateway shutdown.
const SESSION_POLL: Duration = Duration::from_millis(50);

/// Sleep between accept attempts when no client is waiting.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

pub type HeaderHook = Arc<dyn Fn(ChannelHeader) -> ChannelHeader + Send + Sync>;

/// Hooks that rewrite headers on their way through a gateway.
#[derive(Clone, Default)]
pub struct HeaderPolicy {
    replace_in_header: Option<HeaderHook>,
    replace_out_header: Option<HeaderHook>,
}

impl HeaderPolicy {
    /// Rewrite the client's header before the gateway acts on it.
    pub fn replace_in_header(
        mut self,
        hook: impl Fn(ChannelHeader) -> ChannelHeader + Send + Sync + 'static,
    ) -> Self {
        self.replace_in_header = Some(Arc::new(hook));
        self
    }

    /// Rewrite the gateway's reply before it is sent.
    pub fn replace_out_header(
        mut self,
        hook: impl Fn(ChannelHeader) -> ChannelHeader + Send + Sync + 'static,
    ) -> Self {
        self.replace_out_header = Some(Arc::new(hook));
        self
    }

    fn apply_in(&self, header: ChannelHeader) -> ChannelHeader {
        match &self.replace_in_header {
            Some(hook) => hook(header),
            None => header,
        }
    }

    fn apply_out(&self, header: ChannelHeader) -> ChannelHeader {
        match &self.replace_out_header {
            Some(hook) => hook(header),
            None => header,
        }
    }
}

impl fmt::Debug for HeaderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderPolicy")
            .field("replace_in_header", &self.replace_in_header.is_some())
            .field("replace_out_header", &self.replace_out_header.is_some())
            .finish()
    }
}

/// Configuration for a gateway and the sessions it serves.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Prefix of generated session names.
    pub name: String,
    pub policy: HeaderPolicy,
    /// Include this process's [`SystemContext`] in replies.
    pub system_context: bool,
    /// Bound on waiting for a client's header.
    pub connection_timeout: Duration,
    pub max_payload_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "gateway".to_string(),
            policy: HeaderPolicy::default(),
            system_context: true,
            connection_timeout: Duration::from_secs(5),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Accepts channels on a tcp location.
pub struct Gateway {
    endpoint: Arc<TcpEndpoint>,
    config: Arc<GatewayConfig>,
    stop: Arc<AtomicBool>,
    accept_loop: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Bind to `location`, which must be `tcp://host:port`. Port 0 picks a
    /// free port; see [`Gateway::local_location`].
    pub fn bind(location: &str, config: GatewayConfig) -> Result<Self> {
        let parsed = Location::parse(location)?;
        if parsed.scheme() != Scheme::Tcp {
            return Err(ChannelError::UnsupportedOperation(format!(
                "gateways listen on tcp locations, not {}",
                parsed.scheme()
            )));
        }
        let endpoint = TcpEndpoint::bind(&parsed.socket_addr()?)?;
        Ok(Self {
            endpoint: Arc::new(endpoint),
            config: Arc::new(config),
            stop: Arc::new(AtomicBool::new(false)),
            accept_loop: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Location clients can connect to.
    pub fn local_location(&self) -> String {
        format!("tcp://{}", self.local_addr())
    }

    /// Run the accept loop on a background thread.
    pub fn start(&mut self) -> Result<()> {
        if self.accept_loop.is_some() {
            return Ok(());
        }
        let endpoint = Arc::clone(&self.endpoint);
        let config = Arc::clone(&self.config);
        let stop = Arc::clone(&self.stop);

        info!(name = %config.name, location = %self.local_location(), "gateway started");
        let handle = thread::Builder::new()
            .name(format!("{}-accept", config.name))
            .spawn(move || accept_loop(&endpoint, &config, &stop))?;
        self.accept_loop = Some(handle);
        Ok(())
    }

    /// Serve one session on an accepted stream, returning when the client
    /// goes away.
    pub fn serve_session(stream: WireStream, config: &GatewayConfig) -> Result<()> {
        serve(stream, config, &AtomicBool::new(false))
    }

    /// Stop accepting and end running sessions.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.accept_loop.take() {
            if handle.join().is_err() {
                warn!(name = %self.config.name, "gateway accept loop panicked");
            }
            debug!(name = %self.config.name, "gateway closed");
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("name", &self.config.name)
            .field("addr", &self.local_addr())
            .field("running", &self.accept_loop.is_some())
            .finish()
    }
}

fn accept_loop(endpoint: &TcpEndpoint, config: &Arc<GatewayConfig>, stop: &Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match endpoint.try_accept() {
            Ok(Some(stream)) => {
                let config = Arc::clone(config);
                let stop = Arc::clone(stop);
                let spawned = thread::Builder::new()
                    .name(format!("{}-session", config.name))
                    .spawn(move || {
                        if let Err(err) = serve(stream, &config, &stop) {
                            debug!(error = %err, "session ended with error");
                        }
                    });
                if let Err(err) = spawned {
                    warn!(error = %err, "could not start session thread");
                }
            }
            Ok(None) => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve(stream: WireStream, config: &GatewayConfig, stop: &AtomicBool) -> Result<()> {
    let frame_config = FrameConfig {
        max_payload_size: config.max_payload_size,
        read_timeout: Some(SESSION_POLL),
        write_timeout: Some(config.connection_timeout),
    };
    let mut reader = FrameReader::with_config_stream(stream.try_clone()?, frame_config.clone())?;
    let mut writer = FrameWriter::with_config_stream(stream.try_clone()?, frame_config)?;

    let result = session(&mut reader, &mut writer, config, stop);
    if let Err(err) = stream.shutdown() {
        debug!(error = %err, "session shutdown failed");
    }
    result
}

fn session(
    reader: &mut FrameReader<WireStream>,
    writer: &mut FrameWriter<WireStream>,
    config: &GatewayConfig,
    stop: &AtomicBool,
) -> Result<()> {
    let (header_in, wire) = read_header(reader, config.connection_timeout)?;
    let header_in = config.policy.apply_in(header_in);
    let reply = config.policy.apply_out(reply_to(&header_in, config));
    write_header(writer, &reply, wire)?;
    debug!(
        request = header_in.type_name(),
        reply = reply.type_name(),
        session = reply.session_name().unwrap_or_default(),
        "answered header"
    );

    let echo = matches!(&header_in, ChannelHeader::Handler(h) if h.kind == HandlerKind::Echo);
    if !echo || !matches!(reply, ChannelHeader::Ok(_)) {
        return Ok(());
    }
    echo_documents(reader, writer, stop)
}

fn reply_to(header_in: &ChannelHeader, config: &GatewayConfig) -> ChannelHeader {
    match header_in {
        ChannelHeader::Handler(handler) if handler.kind == HandlerKind::Echo => {
            let session_name = handler
                .fields
                .session_name
                .clone()
                .unwrap_or_else(|| format!("{}-{}", config.name, Uuid::new_v4().simple()));
            let mut ok = OkHeader::default().session_name(session_name);
            if config.system_context {
                ok = ok.system_context(SystemContext::current());
            }
            ok.into()
        }
        ChannelHeader::Handler(_) => ErrorReplyHeader::new("Custom handlers not supported").into(),
        other => ErrorReplyHeader::new(format!(
            "expected a handler header, got {}",
            other.type_name()
        ))
        .into(),
    }
}

fn echo_documents(
    reader: &mut FrameReader<WireStream>,
    writer: &mut FrameWriter<WireStream>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut echoed = 0u64;
    while !stop.load(Ordering::Acquire) {
        match reader.read_frame() {
            Ok(frame) => {
                writer.write_frame(&frame)?;
                echoed += 1;
            }
            Err(err) if err.is_timeout() => continue,
            Err(FrameError::ConnectionClosed) => {
                debug!(echoed, "client closed the session");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
    debug!(echoed, "session stopped by gateway");
    Ok(())
}
