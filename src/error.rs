//! Probe outcome and failure taxonomy
//!
//! Every run ends either in a [`Completion`] or in a [`ProbeError`]; both map
//! onto the process exit status.

use crate::http;
use crate::http::h2;
use crate::http::tls::TlsError;
use std::io;
use std::time::Duration;

/// Terminal failure of a run
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to resolve {addr}: {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    /// ALPN did not select h2
    #[error("server did not negotiate h2 (alpn={})", .negotiated.as_deref().unwrap_or("<none>"))]
    ProtocolNegotiation { negotiated: Option<String> },

    #[error(transparent)]
    Tls(#[from] TlsError),

    /// OpenSSL failure after the handshake
    #[error("TLS error: {0}")]
    TlsSession(String),

    #[error("HTTP/2 protocol error: {0}")]
    ProtocolEngine(#[from] h2::Error),

    #[error("stream {stream_id} reset by peer ({})", h2::describe_code(*.error_code))]
    PeerReset { stream_id: h2::StreamId, error_code: u32 },

    #[error("connection closed by peer with GOAWAY ({})", h2::describe_code(*.error_code))]
    PeerGoaway { error_code: u32, last_stream_id: h2::StreamId },

    /// Handshake or write stalled past the socket timeout
    #[error("socket made no progress for {:.1}s", .timeout.as_secs_f64())]
    IdleTimeout { timeout: Duration },

    #[error("connection reset: {0}")]
    TransportReset(io::Error),

    #[error("{0}")]
    Unclassified(String),
}

impl ProbeError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            ProbeError::Resolve { .. } => 5,
            ProbeError::Connect { source, .. } if is_timeout(source) => 2,
            ProbeError::Connect { .. } => 5,
            ProbeError::ProtocolNegotiation { .. } => 4,
            ProbeError::Tls(_) | ProbeError::TlsSession(_) => 4,
            ProbeError::ProtocolEngine(_) => 5,
            ProbeError::PeerReset { .. } | ProbeError::PeerGoaway { .. } => 1,
            ProbeError::IdleTimeout { .. } => 2,
            ProbeError::TransportReset(_) => 3,
            ProbeError::Unclassified(_) => 5,
        }
    }

    /// Event name of the `ERR` line
    pub fn category(&self) -> &'static str {
        match self {
            ProbeError::Resolve { .. } => "resolve_failed",
            ProbeError::Connect { .. } => "connect_failed",
            ProbeError::ProtocolNegotiation { .. } => "alpn_mismatch",
            ProbeError::Tls(_) | ProbeError::TlsSession(_) => "ssl_error",
            ProbeError::ProtocolEngine(_) => "protocol_error",
            ProbeError::PeerReset { .. } => "reset_stream",
            ProbeError::PeerGoaway { .. } => "goaway",
            ProbeError::IdleTimeout { .. } => "socket_timeout",
            ProbeError::TransportReset(_) => "connection_reset",
            ProbeError::Unclassified(_) => "unexpected",
        }
    }

    /// Whether the peer ended the run through HTTP/2 itself
    ///
    /// Those outcomes are already reported by their `H2` line and get no
    /// `ERR` line.
    pub fn is_peer_termination(&self) -> bool {
        matches!(self, ProbeError::PeerReset { .. } | ProbeError::PeerGoaway { .. })
    }

    /// Classify a session I/O failure
    ///
    /// `timeout` is the configured socket timeout, reported when a connect,
    /// handshake or write stalled underneath us.
    pub fn from_session(err: http::Error, timeout: Duration) -> Self {
        match err {
            http::Error::Io(e) if is_reset(&e) => ProbeError::TransportReset(e),
            http::Error::Io(e) if is_timeout(&e) => ProbeError::IdleTimeout { timeout },
            http::Error::Io(e) => ProbeError::Unclassified(e.to_string()),
            http::Error::Tls(msg) => ProbeError::TlsSession(msg),
            http::Error::Timeout => ProbeError::IdleTimeout { timeout },
            http::Error::ConnectionClosed => ProbeError::Unclassified("connection closed".to_string()),
        }
    }

    /// Classify a handshake failure
    pub fn from_handshake(err: TlsError, timeout: Duration) -> Self {
        match err {
            TlsError::HandshakeTimeout => ProbeError::IdleTimeout { timeout },
            TlsError::Io(e) if is_reset(&e) => ProbeError::TransportReset(e),
            other => ProbeError::Tls(other),
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

fn is_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

/// Successful end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The peer ended the stream
    StreamEnded,
    /// The peer closed the connection without an error
    CleanEof,
    /// The runtime cap was reached
    MaxRuntime,
    /// SIGINT or SIGTERM
    Interrupted,
}

impl Completion {
    pub fn exit_code(&self) -> i32 {
        0
    }
}

/// Result of a session
#[derive(Debug)]
pub struct Outcome {
    pub terminal: Result<Completion, ProbeError>,
    /// Body bytes received before the session ended
    pub total_received: u64,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match &self.terminal {
            Ok(completion) => completion.exit_code(),
            Err(e) => e.exit_code(),
        }
    }
}
