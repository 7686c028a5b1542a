//! Sans-I/O HTTP/2 client connection
//!
//! [`H2Connection`] never touches a socket. Inbound bytes go in through
//! [`ProtocolEngine::feed`] and come back out as [`ProtocolEvent`]s; intents
//! (open a stream, acknowledge data, ping, close) queue frames that the
//! caller collects with [`ProtocolEngine::drain`] and writes itself.
//!
//! Flow control is deliberately manual: received DATA is never credited back
//! until [`ProtocolEngine::acknowledge`] is called.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::{increments, FlowControlWindow};
use super::frames::*;
use super::settings::{Settings, SettingsBuilder};
use super::stream::{HeaderBlock, StreamId, StreamManager};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID};
use bytes::{Bytes, BytesMut};
use hpack::Encoder as HpackEncoder;

/// Something the peer did, as seen by the session driving the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// The peer acknowledged our SETTINGS
    SettingsAcknowledged,
    /// The peer sent SETTINGS (already acknowledged)
    SettingsReceived { settings: Settings },
    /// Final response header block for a stream
    ResponseReceived {
        stream_id: StreamId,
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// Response body bytes
    ///
    /// `flow_controlled_length` includes padding and is what must be
    /// acknowledged to restore the peer's credit.
    DataReceived {
        stream_id: StreamId,
        len: usize,
        flow_controlled_length: usize,
    },
    /// The peer finished the stream (END_STREAM)
    StreamEnded { stream_id: StreamId },
    /// RST_STREAM from the peer
    StreamReset { stream_id: StreamId, error_code: u32 },
    /// GOAWAY from the peer
    ConnectionTerminated {
        error_code: u32,
        last_stream_id: StreamId,
        debug_data: Bytes,
    },
    /// PING from the peer, not yet acknowledged
    PingReceived { data: [u8; 8] },
    /// Answer to one of our PINGs
    PingAckReceived { data: [u8; 8] },
}

/// The boundary between the session loop and HTTP/2 framing
pub trait ProtocolEngine {
    /// Process received bytes, appending the events they complete
    ///
    /// On error, `events` still holds everything decoded before the
    /// offending frame.
    fn feed_into(&mut self, bytes: &[u8], events: &mut Vec<ProtocolEvent>) -> Result<()>;

    /// Process received bytes, returning the events they complete
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ProtocolEvent>> {
        let mut events = Vec::new();
        self.feed_into(bytes, &mut events)?;
        Ok(events)
    }

    /// Take every byte queued for the peer
    fn drain(&mut self) -> Bytes;

    /// Open a request stream with the given header list; END_STREAM is set
    fn open_stream(&mut self, headers: &[(&str, &str)]) -> Result<StreamId>;

    /// Credit `amount` flow-controlled bytes back to the peer
    fn acknowledge(&mut self, stream_id: StreamId, amount: u64) -> Result<()>;

    /// Queue a PING
    fn send_ping(&mut self, data: [u8; 8]);

    /// Queue the ACK for a received PING
    fn acknowledge_ping(&mut self, data: [u8; 8]);

    /// Queue GOAWAY; later intents fail with [`Error::ConnectionClosed`]
    fn close(&mut self, code: ErrorCode);

    /// Receive window currently granted to the peer on `stream_id`
    fn stream_window(&self, stream_id: StreamId) -> Option<i64>;
}

/// HTTP/2 client connection state
pub struct H2Connection {
    codec: FrameCodec,
    /// Frames waiting to be drained
    outbound: BytesMut,
    streams: StreamManager,
    /// Credit we have granted the peer for the whole connection
    recv_window: FlowControlWindow,
    /// Credit the peer granted us; only validated, we never send DATA
    send_window: FlowControlWindow,
    hpack_encoder: HpackEncoder<'static>,
    hpack_decoder: hpack::Decoder<'static>,
    local_settings: Settings,
    remote_settings: Settings,
    closed: bool,
}

impl H2Connection {
    /// Create a connection with default client settings
    pub fn new() -> Result<Self> {
        H2ConnectionBuilder::new().build()
    }

    /// Settings we advertised
    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    /// Settings the peer advertised (RFC defaults until it does)
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Connection-level receive window currently granted to the peer
    pub fn connection_window(&self) -> i64 {
        self.recv_window.size()
    }

    /// Whether GOAWAY has been queued
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn queue(&mut self, frame: Bytes) {
        self.outbound.extend_from_slice(&frame);
    }

    fn handle_frame(&mut self, frame: Frame, events: &mut Vec<ProtocolEvent>) -> Result<()> {
        // RFC 7540 Section 6.10: nothing may interleave with an open header block
        if let Some(open) = self.streams.continuation_stream() {
            match &frame {
                Frame::Continuation(c) if c.stream_id == open => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "{} frame while header block on stream {} is open",
                        other.name(),
                        open
                    )))
                }
            }
        }

        match frame {
            Frame::Data(data) => {
                self.recv_window.receive(data.frame_size())?;
                let stream = self.streams.get_stream_mut(data.stream_id)?;
                if !stream.response_received() {
                    return Err(Error::Protocol(format!(
                        "DATA on stream {} before response headers",
                        data.stream_id
                    )));
                }
                stream.receive_data(&data)?;

                events.push(ProtocolEvent::DataReceived {
                    stream_id: data.stream_id,
                    len: data.data.len(),
                    flow_controlled_length: data.frame_size(),
                });
                if data.end_stream {
                    events.push(ProtocolEvent::StreamEnded {
                        stream_id: data.stream_id,
                    });
                }
            }
            Frame::Headers(headers) => {
                let stream_id = headers.stream_id;
                let block = self.streams.get_stream_mut(stream_id)?.receive_headers(headers)?;
                if let Some(block) = block {
                    self.handle_header_block(stream_id, block, events)?;
                }
            }
            Frame::Continuation(continuation) => {
                let stream_id = continuation.stream_id;
                let block = self
                    .streams
                    .get_stream_mut(stream_id)?
                    .receive_continuation(continuation)?;
                if let Some(block) = block {
                    self.handle_header_block(stream_id, block, events)?;
                }
            }
            Frame::RstStream(rst) => {
                self.streams.get_stream_mut(rst.stream_id)?.reset();
                events.push(ProtocolEvent::StreamReset {
                    stream_id: rst.stream_id,
                    error_code: rst.error_code,
                });
            }
            Frame::Settings(settings) => {
                if settings.ack {
                    events.push(ProtocolEvent::SettingsAcknowledged);
                    return Ok(());
                }

                self.remote_settings.merge(&settings.settings);
                if settings.settings.max_concurrent_streams.is_some() {
                    self.streams
                        .set_max_concurrent_streams(settings.settings.max_concurrent_streams);
                }
                if let Some(size) = settings.settings.initial_window_size {
                    self.send_window.update_initial_size(size)?;
                }

                self.queue(FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
                events.push(ProtocolEvent::SettingsReceived {
                    settings: settings.settings,
                });
            }
            Frame::PushPromise { stream_id, promised_stream_id } => {
                return Err(Error::Protocol(format!(
                    "PUSH_PROMISE for stream {} on stream {} with push disabled",
                    promised_stream_id, stream_id
                )));
            }
            Frame::Ping(ping) => {
                events.push(if ping.ack {
                    ProtocolEvent::PingAckReceived { data: ping.data }
                } else {
                    ProtocolEvent::PingReceived { data: ping.data }
                });
            }
            Frame::Goaway(goaway) => {
                events.push(ProtocolEvent::ConnectionTerminated {
                    error_code: goaway.error_code,
                    last_stream_id: goaway.last_stream_id,
                    debug_data: goaway.debug_data,
                });
            }
            Frame::WindowUpdate(update) => {
                if update.stream_id == CONNECTION_STREAM_ID {
                    self.send_window.increase(update.size_increment)?;
                } else {
                    self.streams.get_stream_mut(update.stream_id)?;
                    if update.size_increment == 0 {
                        return Err(Error::Protocol(format!(
                            "Zero WINDOW_UPDATE increment on stream {}",
                            update.stream_id
                        )));
                    }
                }
            }
            Frame::Priority { .. } | Frame::Unknown { .. } => {}
        }

        Ok(())
    }

    fn handle_header_block(
        &mut self,
        stream_id: StreamId,
        block: HeaderBlock,
        events: &mut Vec<ProtocolEvent>,
    ) -> Result<()> {
        // Decode even trailers: the HPACK table must stay in sync
        let decoded = self
            .hpack_decoder
            .decode(&block.block)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;

        let stream = self.streams.get_stream_mut(stream_id)?;
        if !stream.response_received() {
            let mut status = None;
            let mut headers = Vec::with_capacity(decoded.len());
            for (name, value) in decoded {
                let name = String::from_utf8_lossy(&name).into_owned();
                let value = String::from_utf8_lossy(&value).into_owned();
                if name == ":status" {
                    status = value.parse::<u16>().ok();
                } else {
                    headers.push((name, value));
                }
            }

            let status = status.ok_or_else(|| {
                Error::Protocol(format!("Response on stream {} without valid :status", stream_id))
            })?;

            if (100..200).contains(&status) {
                if block.end_stream {
                    return Err(Error::Protocol(format!(
                        "Informational response {} ended stream {}",
                        status, stream_id
                    )));
                }
                tracing::debug!(stream_id, status, "skipping informational response");
                return Ok(());
            }

            stream.set_response_received();
            events.push(ProtocolEvent::ResponseReceived {
                stream_id,
                status,
                headers,
            });
        } else if !block.end_stream {
            return Err(Error::Protocol(format!(
                "Trailers on stream {} without END_STREAM",
                stream_id
            )));
        }

        if block.end_stream {
            events.push(ProtocolEvent::StreamEnded { stream_id });
        }
        Ok(())
    }
}

impl H2Connection {
    fn process_buffered(&mut self, events: &mut Vec<ProtocolEvent>) -> Result<()> {
        while let Some(frame) = self.codec.next_frame()? {
            tracing::debug!(
                frame = frame.name(),
                stream_id = frame.stream_id(),
                "frame received"
            );
            self.handle_frame(frame, events)?;
        }
        Ok(())
    }
}

impl ProtocolEngine for H2Connection {
    fn feed_into(&mut self, bytes: &[u8], events: &mut Vec<ProtocolEvent>) -> Result<()> {
        self.codec.extend(bytes);

        if let Err(err) = self.process_buffered(events) {
            // The session tears down on any engine error; tell the peer why
            self.close(err.code());
            return Err(err);
        }
        Ok(())
    }

    fn drain(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    fn open_stream(&mut self, headers: &[(&str, &str)]) -> Result<StreamId> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let stream_id = self.streams.create_stream()?;
        if let Ok(stream) = self.streams.get_stream_mut(stream_id) {
            stream.send_headers(true)?;
        }

        let mut block = Vec::new();
        let header_tuples: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();
        self.hpack_encoder
            .encode_into(header_tuples, &mut block)
            .map_err(|e| Error::Internal(format!("HPACK encode error: {}", e)))?;

        // Split into HEADERS + CONTINUATION if the peer's frame size demands it
        let max = self.remote_settings.get_max_frame_size() as usize;
        let block = Bytes::from(block);
        let first = block.slice(..block.len().min(max));
        let mut rest = block.slice(first.len()..);

        self.queue(FrameCodec::encode_headers_frame(&HeadersFrame::new(
            stream_id,
            first,
            true,
            rest.is_empty(),
        )));
        while !rest.is_empty() {
            let chunk = rest.split_to(rest.len().min(max));
            self.queue(FrameCodec::encode_continuation_frame(&ContinuationFrame {
                stream_id,
                header_block: chunk,
                end_headers: rest.is_empty(),
            }));
        }

        tracing::debug!(stream_id, "request headers queued");
        Ok(stream_id)
    }

    fn acknowledge(&mut self, stream_id: StreamId, amount: u64) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        for increment in increments(amount) {
            self.recv_window.increase(increment)?;
            self.queue(FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
                CONNECTION_STREAM_ID,
                increment,
            )));

            if let Ok(stream) = self.streams.get_stream_mut(stream_id) {
                if stream.state().can_receive() {
                    stream.recv_window_mut().increase(increment)?;
                    self.queue(FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
                        stream_id, increment,
                    )));
                }
            }
        }

        tracing::debug!(stream_id, amount, "window update queued");
        Ok(())
    }

    fn send_ping(&mut self, data: [u8; 8]) {
        self.queue(FrameCodec::encode_ping_frame(&PingFrame::new(data)));
    }

    fn acknowledge_ping(&mut self, data: [u8; 8]) {
        self.queue(FrameCodec::encode_ping_frame(&PingFrame::ack(data)));
    }

    fn close(&mut self, code: ErrorCode) {
        if self.closed {
            return;
        }
        self.closed = true;
        // We never accept peer-initiated streams
        self.queue(FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            0,
            code.as_u32(),
            Bytes::new(),
        )));
    }

    fn stream_window(&self, stream_id: StreamId) -> Option<i64> {
        self.streams
            .get_stream(stream_id)
            .map(|stream| stream.recv_window().size())
    }
}

/// HTTP/2 connection builder
pub struct H2ConnectionBuilder {
    settings: SettingsBuilder,
}

impl H2ConnectionBuilder {
    /// Create a builder with the default client settings
    pub fn new() -> Self {
        H2ConnectionBuilder {
            settings: SettingsBuilder::new()
                .header_table_size(super::DEFAULT_HEADER_TABLE_SIZE)
                .enable_push(false)
                .max_concurrent_streams(100)
                .initial_window_size(super::DEFAULT_INITIAL_WINDOW_SIZE)
                .max_frame_size(super::DEFAULT_MAX_FRAME_SIZE),
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings = self.settings.header_table_size(size);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings = self.settings.max_concurrent_streams(max);
        self
    }

    /// Build the connection with the preface and SETTINGS already queued
    pub fn build(self) -> Result<H2Connection> {
        let local_settings = self.settings.build()?;

        let mut codec = FrameCodec::new();
        codec.set_max_frame_size(local_settings.get_max_frame_size());

        let mut connection = H2Connection {
            codec,
            outbound: BytesMut::with_capacity(128),
            streams: StreamManager::new(local_settings.get_initial_window_size()),
            // The connection window is not changed by SETTINGS (RFC 7540 Section 6.9.2)
            recv_window: FlowControlWindow::new(),
            send_window: FlowControlWindow::new(),
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder: hpack::Decoder::new(),
            local_settings: local_settings.clone(),
            remote_settings: Settings::default_settings(),
            closed: false,
        };

        connection.outbound.extend_from_slice(CONNECTION_PREFACE);
        connection.queue(FrameCodec::encode_settings_frame(&SettingsFrame::new(local_settings)));

        Ok(connection)
    }
}

impl Default for H2ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[(&str, &str)] = &[
        (":method", "GET"),
        (":authority", "example.com"),
        (":scheme", "https"),
        (":path", "/"),
    ];

    fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        FrameCodec::new().decode(bytes).unwrap()
    }

    fn response_headers(encoder: &mut HpackEncoder<'static>, status: &str, end_stream: bool) -> Bytes {
        let block = encoder.encode(vec![
            (&b":status"[..], status.as_bytes()),
            (&b"content-type"[..], &b"text/plain"[..]),
        ]);
        FrameCodec::encode_headers_frame(&HeadersFrame::new(1, Bytes::from(block), end_stream, true))
    }

    fn data(len: usize, end_stream: bool) -> Bytes {
        FrameCodec::encode_data_frame(&DataFrame::new(1, Bytes::from(vec![b'x'; len]), end_stream))
    }

    /// Connection with stream 1 open and a 200 response already received
    fn streaming() -> (H2Connection, HpackEncoder<'static>) {
        let mut conn = H2Connection::new().unwrap();
        conn.open_stream(REQUEST).unwrap();
        conn.drain();
        let mut encoder = HpackEncoder::new();
        let events = conn.feed(&response_headers(&mut encoder, "200", false)).unwrap();
        assert_eq!(events.len(), 1);
        (conn, encoder)
    }

    #[test]
    fn test_preface_and_settings_queued() {
        let mut conn = H2Connection::new().unwrap();
        let out = conn.drain();

        assert!(out.starts_with(CONNECTION_PREFACE));
        let frames = decode_all(&out[CONNECTION_PREFACE.len()..]);
        match &frames[..] {
            [Frame::Settings(s)] => {
                assert!(!s.ack);
                assert_eq!(s.settings.enable_push, Some(false));
                assert_eq!(s.settings.max_concurrent_streams, Some(100));
                assert_eq!(s.settings.initial_window_size, Some(65535));
                assert_eq!(s.settings.max_frame_size, Some(16384));
                assert_eq!(s.settings.header_table_size, Some(4096));
            }
            other => panic!("unexpected frames {:?}", other),
        }

        assert!(conn.drain().is_empty());
    }

    #[test]
    fn test_peer_settings_are_acknowledged() {
        let mut conn = H2Connection::new().unwrap();
        conn.drain();

        let settings = SettingsBuilder::new().max_concurrent_streams(7).build().unwrap();
        let events = conn
            .feed(&FrameCodec::encode_settings_frame(&SettingsFrame::new(settings.clone())))
            .unwrap();
        assert_eq!(events, vec![ProtocolEvent::SettingsReceived { settings }]);
        assert_eq!(conn.remote_settings().get_max_concurrent_streams(), Some(7));

        let frames = decode_all(&conn.drain());
        assert!(matches!(&frames[..], [Frame::Settings(s)] if s.ack));

        let events = conn
            .feed(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()))
            .unwrap();
        assert_eq!(events, vec![ProtocolEvent::SettingsAcknowledged]);
    }

    #[test]
    fn test_open_stream_encodes_request() {
        let mut conn = H2Connection::new().unwrap();
        conn.drain();

        assert_eq!(conn.open_stream(REQUEST).unwrap(), 1);
        let frames = decode_all(&conn.drain());
        match &frames[..] {
            [Frame::Headers(h)] => {
                assert_eq!(h.stream_id, 1);
                assert!(h.end_stream);
                assert!(h.end_headers);
                let decoded = hpack::Decoder::new().decode(&h.header_block).unwrap();
                assert_eq!(decoded[0], (b":method".to_vec(), b"GET".to_vec()));
                assert_eq!(decoded[1], (b":authority".to_vec(), b"example.com".to_vec()));
            }
            other => panic!("unexpected frames {:?}", other),
        }
        assert_eq!(conn.stream_window(1), Some(65535));
    }

    #[test]
    fn test_response_and_data_events() {
        let (mut conn, _) = streaming();

        let events = conn.feed(&data(100, false)).unwrap();
        assert_eq!(
            events,
            vec![ProtocolEvent::DataReceived {
                stream_id: 1,
                len: 100,
                flow_controlled_length: 100,
            }]
        );
        assert_eq!(conn.stream_window(1), Some(65435));
        assert_eq!(conn.connection_window(), 65435);

        let events = conn.feed(&data(10, true)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], ProtocolEvent::StreamEnded { stream_id: 1 });
    }

    #[test]
    fn test_response_headers_event() {
        let mut conn = H2Connection::new().unwrap();
        conn.open_stream(REQUEST).unwrap();
        let mut encoder = HpackEncoder::new();

        let events = conn.feed(&response_headers(&mut encoder, "206", false)).unwrap();
        match &events[..] {
            [ProtocolEvent::ResponseReceived { stream_id, status, headers }] => {
                assert_eq!(*stream_id, 1);
                assert_eq!(*status, 206);
                assert_eq!(headers, &vec![("content-type".to_string(), "text/plain".to_string())]);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_informational_response_is_skipped() {
        let mut conn = H2Connection::new().unwrap();
        conn.open_stream(REQUEST).unwrap();
        let mut encoder = HpackEncoder::new();

        assert!(conn.feed(&response_headers(&mut encoder, "103", false)).unwrap().is_empty());
        let events = conn.feed(&response_headers(&mut encoder, "200", true)).unwrap();
        assert!(matches!(events[0], ProtocolEvent::ResponseReceived { status: 200, .. }));
        assert_eq!(events[1], ProtocolEvent::StreamEnded { stream_id: 1 });
    }

    #[test]
    fn test_header_block_split_over_continuation() {
        let mut conn = H2Connection::new().unwrap();
        conn.open_stream(REQUEST).unwrap();

        let block = Bytes::from(HpackEncoder::new().encode(vec![(&b":status"[..], &b"200"[..])]));
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
            1,
            block.slice(..1),
            false,
            false,
        )));
        wire.extend_from_slice(&FrameCodec::encode_continuation_frame(&ContinuationFrame {
            stream_id: 1,
            header_block: block.slice(1..),
            end_headers: true,
        }));

        let events = conn.feed(&wire).unwrap();
        assert!(matches!(events[..], [ProtocolEvent::ResponseReceived { status: 200, .. }]));
    }

    #[test]
    fn test_trailers_end_stream() {
        let (mut conn, mut encoder) = streaming();
        conn.feed(&data(5, false)).unwrap();

        let trailers = encoder.encode(vec![(&b"grpc-status"[..], &b"0"[..])]);
        let frame = FrameCodec::encode_headers_frame(&HeadersFrame::new(1, Bytes::from(trailers), true, true));
        assert_eq!(
            conn.feed(&frame).unwrap(),
            vec![ProtocolEvent::StreamEnded { stream_id: 1 }]
        );
    }

    #[test]
    fn test_acknowledge_queues_connection_and_stream_updates() {
        let (mut conn, _) = streaming();
        conn.feed(&data(1500, false)).unwrap();
        conn.drain();

        conn.acknowledge(1, 1500).unwrap();
        let frames = decode_all(&conn.drain());
        match &frames[..] {
            [Frame::WindowUpdate(c), Frame::WindowUpdate(s)] => {
                assert_eq!((c.stream_id, c.size_increment), (0, 1500));
                assert_eq!((s.stream_id, s.size_increment), (1, 1500));
            }
            other => panic!("unexpected frames {:?}", other),
        }
        assert_eq!(conn.stream_window(1), Some(65535));
        assert_eq!(conn.connection_window(), 65535);

        conn.acknowledge(1, 0).unwrap();
        assert!(conn.drain().is_empty());
    }

    #[test]
    fn test_acknowledge_after_stream_end_only_credits_connection() {
        let (mut conn, _) = streaming();
        conn.feed(&data(10, true)).unwrap();
        conn.drain();

        conn.acknowledge(1, 10).unwrap();
        let frames = decode_all(&conn.drain());
        assert!(matches!(&frames[..], [Frame::WindowUpdate(c)] if c.stream_id == 0));
    }

    #[test]
    fn test_padded_data_counts_padding() {
        let (mut conn, _) = streaming();
        let frame = DataFrame::new(1, Bytes::from("abc"), false).with_padding(6);
        let events = conn.feed(&FrameCodec::encode_data_frame(&frame)).unwrap();
        assert_eq!(
            events,
            vec![ProtocolEvent::DataReceived {
                stream_id: 1,
                len: 3,
                flow_controlled_length: 10,
            }]
        );
    }

    #[test]
    fn test_window_overrun_is_flow_control_error() {
        let (mut conn, _) = streaming();
        for _ in 0..3 {
            conn.feed(&data(16384, false)).unwrap();
        }
        conn.feed(&data(16383, false)).unwrap();
        assert_eq!(conn.stream_window(1), Some(0));
        conn.drain();

        let err = conn.feed(&data(1, false)).unwrap_err();
        assert!(matches!(err, Error::FlowControl(_)));

        let frames = decode_all(&conn.drain());
        assert!(matches!(&frames[..], [Frame::Goaway(g)] if g.error_code == 0x3));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_events_before_malformed_frame_are_kept() {
        let (mut conn, _) = streaming();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&data(100, false));
        wire.extend_from_slice(&FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(0, 0)));
        wire.extend_from_slice(&data(50, false));

        let mut events = Vec::new();
        let err = conn.feed_into(&wire, &mut events).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(
            events,
            vec![ProtocolEvent::DataReceived {
                stream_id: 1,
                len: 100,
                flow_controlled_length: 100,
            }]
        );
        assert!(conn.is_closed());
    }

    #[test]
    fn test_reset_goaway_and_ping_events() {
        let (mut conn, _) = streaming();

        let mut wire = BytesMut::new();
        wire.extend_from_slice(&FrameCodec::encode_ping_frame(&PingFrame::new([1; 8])));
        wire.extend_from_slice(&FrameCodec::encode_ping_frame(&PingFrame::ack([2; 8])));
        wire.extend_from_slice(&FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
            stream_id: 1,
            error_code: 0x8,
        }));
        wire.extend_from_slice(&FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            1,
            0x0,
            Bytes::from("bye"),
        )));

        let events = conn.feed(&wire).unwrap();
        assert_eq!(
            events,
            vec![
                ProtocolEvent::PingReceived { data: [1; 8] },
                ProtocolEvent::PingAckReceived { data: [2; 8] },
                ProtocolEvent::StreamReset { stream_id: 1, error_code: 0x8 },
                ProtocolEvent::ConnectionTerminated {
                    error_code: 0,
                    last_stream_id: 1,
                    debug_data: Bytes::from("bye"),
                },
            ]
        );
        // PINGs are answered explicitly, never automatically
        assert!(conn.drain().is_empty());

        conn.acknowledge_ping([1; 8]);
        let frames = decode_all(&conn.drain());
        assert!(matches!(&frames[..], [Frame::Ping(p)] if p.ack && p.data == [1; 8]));
    }

    #[test]
    fn test_push_promise_is_protocol_error() {
        let (mut conn, _) = streaming();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&FrameCodec::encode_header(
            FrameType::PushPromise,
            FrameFlags::from_u8(FrameFlags::END_HEADERS),
            1,
            4,
        ));
        wire.extend_from_slice(&2u32.to_be_bytes());

        assert!(matches!(conn.feed(&wire), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_data_before_headers_is_protocol_error() {
        let mut conn = H2Connection::new().unwrap();
        conn.open_stream(REQUEST).unwrap();
        assert!(matches!(conn.feed(&data(1, false)), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_zero_window_update_is_protocol_error() {
        let (mut conn, _) = streaming();
        let frame = FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(0, 0));
        assert!(matches!(conn.feed(&frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_intents_after_close_fail() {
        let mut conn = H2Connection::new().unwrap();
        conn.drain();
        conn.close(ErrorCode::NoError);
        conn.close(ErrorCode::NoError);

        let frames = decode_all(&conn.drain());
        assert_eq!(frames.len(), 1);
        assert!(matches!(conn.open_stream(REQUEST), Err(Error::ConnectionClosed)));
        assert!(matches!(conn.acknowledge(1, 1), Err(Error::ConnectionClosed)));
    }
}
