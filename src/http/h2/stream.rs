//! HTTP/2 stream management
//!
//! This module implements the client side of the stream lifecycle defined in
//! RFC 7540 Section 5.1. Only locally-initiated (odd) streams exist; server
//! push is refused.

use super::error::{Error, Result};
use super::flow_control::FlowControlWindow;
use super::frames::{ContinuationFrame, DataFrame, HeadersFrame};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// A header block reassembled from HEADERS and CONTINUATION frames
#[derive(Debug, Clone)]
pub struct HeaderBlock {
    pub block: Bytes,
    pub end_stream: bool,
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    recv_window: FlowControlWindow,
    /// Header block fragments waiting for END_HEADERS
    pending_headers: Option<(BytesMut, bool)>,
    /// Whether a final (non-1xx) response has been seen
    response_received: bool,
}

impl H2Stream {
    /// Create a new stream with the given receive window
    pub fn new(id: StreamId, recv_window: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            recv_window: FlowControlWindow::with_initial_size(recv_window),
            pending_headers: None,
            response_received: false,
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Receive window granted to the peer for this stream
    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv_window
    }

    pub fn recv_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.recv_window
    }

    /// Whether a final response HEADERS block has arrived
    pub fn response_received(&self) -> bool {
        self.response_received
    }

    pub fn set_response_received(&mut self) {
        self.response_received = true;
    }

    /// Whether a header block is waiting for CONTINUATION frames
    pub fn expecting_continuation(&self) -> bool {
        self.pending_headers.is_some()
    }

    /// Record that we sent HEADERS on this stream
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                };
                Ok(())
            }
            _ => Err(Error::Protocol(format!(
                "Cannot send HEADERS in state {:?}",
                self.state
            ))),
        }
    }

    /// Process an incoming HEADERS frame
    ///
    /// Returns the complete header block once END_HEADERS has been seen.
    pub fn receive_headers(&mut self, frame: HeadersFrame) -> Result<Option<HeaderBlock>> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }
        if self.pending_headers.is_some() {
            return Err(Error::Protocol(format!(
                "HEADERS on stream {} while a header block is open",
                self.id
            )));
        }

        if frame.end_headers {
            return Ok(Some(self.finish_headers(frame.header_block, frame.end_stream)));
        }

        let mut block = BytesMut::with_capacity(frame.header_block.len());
        block.extend_from_slice(&frame.header_block);
        self.pending_headers = Some((block, frame.end_stream));
        Ok(None)
    }

    /// Process an incoming CONTINUATION frame
    pub fn receive_continuation(&mut self, frame: ContinuationFrame) -> Result<Option<HeaderBlock>> {
        let (mut block, end_stream) = match self.pending_headers.take() {
            Some(pending) => pending,
            None => {
                return Err(Error::Protocol(format!(
                    "CONTINUATION on stream {} without HEADERS",
                    self.id
                )))
            }
        };
        block.extend_from_slice(&frame.header_block);

        if frame.end_headers {
            Ok(Some(self.finish_headers(block.freeze(), end_stream)))
        } else {
            self.pending_headers = Some((block, end_stream));
            Ok(None)
        }
    }

    fn finish_headers(&mut self, block: Bytes, end_stream: bool) -> HeaderBlock {
        if end_stream {
            self.close_remote();
        }
        HeaderBlock { block, end_stream }
    }

    /// Process an incoming DATA frame against the stream's receive window
    pub fn receive_data(&mut self, frame: &DataFrame) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }

        self.recv_window.receive(frame.frame_size())?;

        if frame.end_stream {
            self.close_remote();
        }

        Ok(())
    }

    fn close_remote(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            _ => StreamState::Closed,
        };
    }

    /// Close the stream (RST_STREAM sent or received)
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.pending_headers = None;
    }
}

/// Stream manager
///
/// Manages all client-initiated streams for a connection
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    /// Next stream ID (client: odd)
    next_stream_id: StreamId,
    /// Receive window each new stream starts with (our SETTINGS)
    initial_recv_window: u32,
    /// Peer's SETTINGS_MAX_CONCURRENT_STREAMS
    max_concurrent_streams: Option<u32>,
}

impl StreamManager {
    /// Create a new stream manager
    pub fn new(initial_recv_window: u32) -> Self {
        StreamManager {
            streams: HashMap::new(),
            next_stream_id: 1,
            initial_recv_window,
            max_concurrent_streams: None,
        }
    }

    /// Set maximum concurrent streams
    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    /// Get next stream ID (without incrementing)
    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    /// Allocate next stream ID and create stream
    pub fn create_stream(&mut self) -> Result<StreamId> {
        if let Some(max) = self.max_concurrent_streams {
            if self.active_stream_count() >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }
        if self.next_stream_id > super::MAX_STREAM_ID {
            return Err(Error::Internal("Stream IDs exhausted".to_string()));
        }

        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        self.streams
            .insert(stream_id, H2Stream::new(stream_id, self.initial_recv_window));

        Ok(stream_id)
    }

    /// Get a stream by ID
    pub fn get_stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    /// Get a stream for an incoming frame
    ///
    /// Frames for streams we never opened are a connection error.
    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Result<&mut H2Stream> {
        if stream_id % 2 == 0 || stream_id >= self.next_stream_id {
            return Err(Error::Protocol(format!(
                "Frame on stream {} which was never opened",
                stream_id
            )));
        }
        self.streams
            .get_mut(&stream_id)
            .ok_or(Error::StreamNotFound(stream_id))
    }

    /// Get number of active streams
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Stream whose header block is still waiting for CONTINUATION
    pub fn continuation_stream(&self) -> Option<StreamId> {
        self.streams
            .values()
            .find(|s| s.expecting_continuation())
            .map(|s| s.id())
    }
}
