//! Transport connector
//!
//! TCP to the dial address, then TLS with the identity host as SNI and `h2`
//! as the only acceptable ALPN result. The dial address and the identity host
//! may differ (`--ip`), which is how a specific edge node is targeted while
//! still presenting the right virtual host.

use crate::config::RunConfig;
use crate::error::ProbeError;
use crate::http::session::{HttpSession, SessionOps};
use crate::http::tls::{TlsConfig, TlsSessionOps};
use crate::log::{EventLog, Tag};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::fmt;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// The only application protocol the probe speaks
pub const ALPN_H2: &str = "h2";

/// An established transport, ready for the connection preface
pub struct Connection<S: SessionOps> {
    pub session: HttpSession<S>,
    /// Negotiated application protocol
    pub alpn: Option<String>,
    pub peer: SocketAddr,
    pub local: SocketAddr,
}

impl<S: SessionOps> Connection<S> {
    /// Wrap an established session; endpoints are read from it
    pub fn new(session: S, alpn: Option<String>) -> io::Result<Self> {
        let peer = session.peer_addr()?;
        let local = session.local_addr()?;
        Ok(Connection {
            session: HttpSession::new(session),
            alpn,
            peer,
            local,
        })
    }
}

impl<S: SessionOps> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("alpn", &self.alpn)
            .field("peer", &self.peer)
            .field("local", &self.local)
            .finish()
    }
}

/// Establish TCP and TLS to the configured target
pub fn connect<W: Write>(config: &RunConfig, log: &mut EventLog<W>) -> Result<Connection<TlsSessionOps>, ProbeError> {
    let tcp = dial(config, log)?;
    negotiate(tcp, config, log)
}

/// Resolve and TCP-connect, trying each resolved address in turn
///
/// The returned stream already carries the read timeout so the TLS
/// handshake is bounded by it.
pub fn dial<W: Write>(config: &RunConfig, log: &mut EventLog<W>) -> Result<TcpStream, ProbeError> {
    let target = format!("{}:{}", config.connect_addr(), config.port);

    let addrs: Vec<SocketAddr> = (config.connect_addr(), config.port)
        .to_socket_addrs()
        .map_err(|source| ProbeError::Resolve {
            addr: target.clone(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ProbeError::Resolve {
            addr: target,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }

    let mut last_err = None;
    for addr in addrs {
        tracing::debug!(%addr, timeout = ?config.connect_timeout, "connecting");
        match connect_addr(&addr, config.connect_timeout, config.read_timeout) {
            Ok(stream) => {
                let peer = stream.peer_addr().unwrap_or(addr);
                let local = stream
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                log.emit(
                    Tag::Conn,
                    "tcp_connected",
                    &[("connect_addr", &target), ("peer", &peer), ("local", &local)],
                );
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(ProbeError::Connect {
        addr: target,
        source: last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)),
    })
}

fn connect_addr(addr: &SocketAddr, connect_timeout: Duration, read_timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&SockAddr::from(*addr), connect_timeout)?;
    socket.set_nodelay(true)?;
    socket.set_read_timeout(Some(read_timeout))?;
    socket.set_write_timeout(Some(read_timeout))?;
    Ok(socket.into())
}

/// TLS handshake over an established TCP stream; requires ALPN `h2`
pub fn negotiate<W: Write>(
    tcp: TcpStream,
    config: &RunConfig,
    log: &mut EventLog<W>,
) -> Result<Connection<TlsSessionOps>, ProbeError> {
    let tls_config = TlsConfig::client()
        .servername(config.host.as_str())
        .alpn(&[ALPN_H2])
        .verify_peer(config.verify_peer)
        .build()?;

    let tls = tls_config
        .connect(tcp)
        .map_err(|e| ProbeError::from_handshake(e, config.read_timeout))?;
    let vars = tls.vars().clone();

    let mut conn = Connection::new(tls, vars.alpn.clone()).map_err(|e| ProbeError::from_session(e.into(), config.read_timeout))?;
    conn.session.set_timeout(Some(config.read_timeout));

    log.emit(
        Tag::Conn,
        "tls_ready",
        &[
            ("sni", &config.host),
            ("alpn", &vars.alpn_or_none()),
            ("version", &vars.version),
            ("cipher", &vars.cipher),
            ("peer", &conn.peer),
            ("local", &conn.local),
        ],
    );

    if conn.alpn.as_deref() != Some(ALPN_H2) {
        return Err(ProbeError::ProtocolNegotiation { negotiated: conn.alpn });
    }

    log.emit(
        Tag::Conn,
        "peer_confirmed",
        &[
            ("peer", &conn.peer),
            ("host", &config.host),
            ("ip_arg", &config.ip.as_deref().unwrap_or("")),
        ],
    );

    Ok(conn)
}
