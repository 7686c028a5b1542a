//! Transport sessions and HTTP/2 for h2delay
//!
//! # Architecture
//!
//! The session layer uses a session operations abstraction pattern that
//! allows seamless switching between plain TCP and TLS connections:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `HttpSession` adds bounded waits and exactly-once close on top of it
//! - The HTTP/2 engine in [`h2`] is sans-I/O and never sees the transport
//!
//! Production traffic always runs over [`tls::TlsSessionOps`]; plain
//! [`session::FdSessionOps`] exists for loopback peers in tests.
//!
//! # Examples
//!
//! ```no_run
//! use h2delay::http::session::{from_tcp_stream, ReadOutcome};
//! use std::net::TcpStream;
//! use std::time::Duration;
//!
//! let stream = TcpStream::connect("127.0.0.1:8080").unwrap();
//! let mut session = from_tcp_stream(stream);
//!
//! session.write_all(b"ping").unwrap();
//! let mut buf = [0u8; 64];
//! match session.read_timeout(&mut buf, Duration::from_millis(250)).unwrap() {
//!     ReadOutcome::Data(n) => println!("{} bytes", n),
//!     ReadOutcome::Eof => println!("closed"),
//!     ReadOutcome::TimedOut => println!("nothing yet"),
//! }
//! ```

pub mod h2;
pub mod session;
pub mod tls;

pub use session::{FdSessionOps, HttpSession, PollEvents, ReadOutcome, SessionOps};

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Session I/O errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// OpenSSL failure that is not a plain socket error
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}
