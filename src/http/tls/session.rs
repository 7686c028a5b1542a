//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::config::{TlsConfig, TlsError};
use super::vars::TlsVars;
use crate::http::session::{poll_fd, poll_read_or_wake, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{self, ErrorCode, HandshakeError, Ssl, SslStream};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream and provides poll/read/write/close operations.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    vars: TlsVars,
    failed: bool,
}

impl TlsSessionOps {
    /// Create a client TLS connection (perform handshake)
    ///
    /// The handshake is bounded by the socket's read timeout.
    pub fn connect(tcp_stream: TcpStream, config: &TlsConfig) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        if let Some(ref servername) = config.servername {
            ssl.set_hostname(servername)?;
            if config.verify_peer {
                ssl.param_mut().set_host(servername)?;
            }
        }

        let ssl_stream = ssl.connect(tcp_stream).map_err(handshake_error)?;
        let vars = TlsVars::from_ssl(ssl_stream.ssl());

        Ok(TlsSessionOps {
            stream: ssl_stream,
            vars,
            failed: false,
        })
    }

    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(tcp_stream: TcpStream, config: &TlsConfig) -> Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        let ssl_stream = ssl.accept(tcp_stream).map_err(handshake_error)?;
        let vars = TlsVars::from_ssl(ssl_stream.ssl());

        Ok(TlsSessionOps {
            stream: ssl_stream,
            vars,
            failed: false,
        })
    }

    /// Negotiated parameters
    pub fn vars(&self) -> &TlsVars {
        &self.vars
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    fn io_failed(&mut self, err: ssl::Error) -> Error {
        self.failed = true;
        match err.into_io_error() {
            Ok(io_err) => Error::Io(io_err),
            Err(err) => Error::Tls(err.to_string()),
        }
    }
}

fn handshake_error(err: HandshakeError<TcpStream>) -> TlsError {
    match err {
        HandshakeError::SetupFailure(stack) => TlsError::OpenSsl(stack),
        // A blocking socket only reports WouldBlock when SO_RCVTIMEO expired
        HandshakeError::WouldBlock(_) => TlsError::HandshakeTimeout,
        HandshakeError::Failure(mid) => {
            let timed_out = mid
                .error()
                .io_error()
                .map(|e| matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut))
                .unwrap_or(false);
            if timed_out {
                TlsError::HandshakeTimeout
            } else {
                TlsError::HandshakeFailed(mid.error().to_string())
            }
        }
    }
}

/// Peer closed the TCP connection without close_notify
///
/// OpenSSL 3 reports this as a protocol error; older releases as a
/// SYSCALL error without an underlying errno.
fn is_unexpected_eof(err: &ssl::Error) -> bool {
    if err.code() == ErrorCode::SYSCALL && err.io_error().is_none() {
        return true;
    }
    err.ssl_error()
        .map(|stack| {
            stack
                .errors()
                .iter()
                .any(|e| e.reason() == Some("unexpected eof while reading"))
        })
        .unwrap_or(false)
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Check if SSL has pending data
        if matches!(events, PollEvents::Read | PollEvents::Both) && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn poll_read_or_wake(&self, wake: BorrowedFd<'_>, timeout: Option<Duration>) -> HttpResult<bool> {
        if self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        poll_read_or_wake(self.stream.get_ref().as_raw_fd(), wake, timeout)
    }

    /// Never blocks: a partial record or a post-handshake message such as
    /// NewSessionTicket makes the socket readable without yielding data
    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        self.stream.get_ref().set_nonblocking(true)?;
        let result = self.stream.ssl_read(buf);
        self.stream.get_ref().set_nonblocking(false)?;

        match result {
            Ok(n) => Ok(n),
            // close_notify
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => Ok(0),
            Err(e) if e.code() == ErrorCode::WANT_READ || e.code() == ErrorCode::WANT_WRITE => {
                Err(Error::Io(io::ErrorKind::WouldBlock.into()))
            }
            Err(e) if is_unexpected_eof(&e) => {
                self.failed = true;
                Ok(0)
            }
            Err(e) => Err(self.io_failed(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.ssl_write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => Ok(0),
            Err(e) => Err(self.io_failed(e)),
        }
    }

    fn close(&mut self) -> HttpResult<()> {
        // Perform SSL shutdown if not failed; the peer may be gone already
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Error::from),
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().local_addr()
    }
}
