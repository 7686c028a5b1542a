//! TLS support
//!
//! # Architecture
//!
//! The TLS implementation uses the session operations abstraction pattern:
//!
//! 1. `TlsConfig` defines TLS settings (versions, ALPN, SNI, verification)
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. The session loop remains unchanged - it transparently uses TLS operations
//!
//! Certificate verification is off unless explicitly requested: the probe
//! exercises protocol behaviour, not PKI.
//!
//! # Examples
//!
//! ```no_run
//! use h2delay::http::tls::TlsConfig;
//! use std::net::TcpStream;
//!
//! let tls_config = TlsConfig::client()
//!     .servername("example.com")
//!     .alpn(&["h2"])
//!     .verify_peer(false)
//!     .build()
//!     .unwrap();
//!
//! let tcp_stream = TcpStream::connect("93.184.216.34:443").unwrap();
//! let tls_session = tls_config.connect(tcp_stream).unwrap();
//! assert_eq!(tls_session.vars().alpn.as_deref(), Some("h2"));
//! ```

pub mod builtin_cert;
pub mod config;
pub mod session;
pub mod vars;

pub use config::{ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use session::TlsSessionOps;
pub use vars::TlsVars;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
