//! HTTP/2 protocol implementation
//!
//! A sans-I/O HTTP/2 client: frames are decoded from whatever bytes the
//! caller feeds in and every outbound frame is queued for the caller to
//! write. Nothing in this module owns a socket.
//!
//! # Architecture
//!
//! - [`codec`]: frame header and payload encoding/decoding (RFC 7540 Section 4, 6)
//! - [`settings`]: SETTINGS parameters and validation
//! - [`flow_control`]: receive windows (RFC 7540 Section 5.2)
//! - [`stream`]: client stream lifecycle and header block reassembly
//! - [`engine`]: the [`ProtocolEngine`] trait and [`H2Connection`], which ties
//!   the above together and turns frames into [`ProtocolEvent`]s
//!
//! HPACK is delegated to the `hpack` crate.
//!
//! # Example
//!
//! ```
//! use h2delay::http::h2::{H2Connection, ProtocolEngine};
//!
//! let mut conn = H2Connection::new().unwrap();
//! let stream_id = conn
//!     .open_stream(&[
//!         (":method", "GET"),
//!         (":authority", "example.com"),
//!         (":scheme", "https"),
//!         (":path", "/"),
//!     ])
//!     .unwrap();
//! assert_eq!(stream_id, 1);
//!
//! // Preface, SETTINGS and HEADERS, ready for the socket
//! let wire = conn.drain();
//! assert!(wire.starts_with(h2delay::http::h2::CONNECTION_PREFACE));
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod settings;
pub mod stream;

pub use codec::FrameCodec;
pub use engine::{H2Connection, H2ConnectionBuilder, ProtocolEngine, ProtocolEvent};
pub use error::{describe_code, Error, ErrorCode, Result};
pub use frames::{Frame, FrameFlags, FrameType};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
