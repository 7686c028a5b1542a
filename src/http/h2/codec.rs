//! HTTP/2 frame encoding and decoding
//!
//! Encoding is stateless; decoding is incremental: bytes arrive in whatever
//! chunks the transport produced and complete frames are returned once their
//! payload has been buffered.

use super::error::{Error, Result};
use super::frames::*;
use super::settings::SettingsParameter;
use super::DEFAULT_MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest payload the 24-bit length field can express (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FFFFFF;

/// Frame codec for encoding/decoding HTTP/2 frames
#[derive(Debug)]
pub struct FrameCodec {
    /// Bytes received but not yet forming a complete frame
    read_buffer: BytesMut,
    /// Largest payload we accept (our SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        FrameCodec {
            read_buffer: BytesMut::with_capacity(4096),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
        }
    }

    /// Set the largest payload accepted by [`FrameCodec::decode`]
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = (size as usize).min(MAX_FRAME_SIZE);
    }

    /// Number of buffered bytes that do not yet form a complete frame
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    /// Encode a frame header
    pub fn encode_header(frame_type: FrameType, flags: FrameFlags, stream_id: u32, length: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, big-endian, reserved bit is 0)
        let stream_id = stream_id & 0x7FFFFFFF;
        header[5..9].copy_from_slice(&stream_id.to_be_bytes());

        header
    }

    /// Decode a frame header into (raw type, flags, stream id, payload length)
    ///
    /// The type is left raw so that unknown extension frames can be skipped.
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, u32, usize) {
        let length = ((bytes[0] as usize) << 16)
            | ((bytes[1] as usize) << 8)
            | (bytes[2] as usize);

        let flags = FrameFlags::from_u8(bytes[4]);

        // Stream ID (31 bits, ignore reserved bit)
        let stream_id = u32::from_be_bytes([bytes[5] & 0x7F, bytes[6], bytes[7], bytes[8]]);

        (bytes[3], flags, stream_id, length)
    }

    /// Feed received bytes and return every frame that is now complete
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.extend(bytes);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Buffer received bytes without decoding them
    pub fn extend(&mut self, bytes: &[u8]) {
        self.read_buffer.extend_from_slice(bytes);
    }

    /// Next complete frame from the buffered bytes, if any
    ///
    /// Frames before a malformed one are returned by earlier calls.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.read_buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.read_buffer[..FRAME_HEADER_SIZE]);
        let (frame_type, flags, stream_id, payload_len) = Self::decode_header(&header);

        if payload_len > self.max_frame_size {
            return Err(Error::FrameSize(format!(
                "Frame payload too large: {} > {}",
                payload_len, self.max_frame_size
            )));
        }

        if self.read_buffer.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        self.read_buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.read_buffer.split_to(payload_len).freeze();
        Self::parse_frame(frame_type, flags, stream_id, payload).map(Some)
    }

    /// Interpret one frame payload according to its type
    pub fn parse_frame(frame_type: u8, flags: FrameFlags, stream_id: u32, mut payload: Bytes) -> Result<Frame> {
        let frame_type = match FrameType::from_u8(frame_type) {
            Some(t) => t,
            None => return Ok(Frame::Unknown { frame_type, stream_id }),
        };

        match frame_type {
            FrameType::Data => {
                require_stream(frame_type, stream_id)?;
                let padding = strip_padding(frame_type, flags, &mut payload)?;
                Ok(Frame::Data(DataFrame {
                    stream_id,
                    data: payload,
                    end_stream: flags.is_end_stream(),
                    padding,
                }))
            }
            FrameType::Headers => {
                require_stream(frame_type, stream_id)?;
                let padding = strip_padding(frame_type, flags, &mut payload)?;
                if flags.is_priority() {
                    if payload.len() < 5 {
                        return Err(Error::FrameSize("HEADERS priority block truncated".to_string()));
                    }
                    payload.advance(5);
                }
                Ok(Frame::Headers(HeadersFrame {
                    stream_id,
                    header_block: payload,
                    end_stream: flags.is_end_stream(),
                    end_headers: flags.is_end_headers(),
                    padding,
                }))
            }
            FrameType::Priority => {
                require_stream(frame_type, stream_id)?;
                require_len(frame_type, &payload, 5)?;
                Ok(Frame::Priority { stream_id })
            }
            FrameType::RstStream => {
                require_stream(frame_type, stream_id)?;
                require_len(frame_type, &payload, 4)?;
                Ok(Frame::RstStream(RstStreamFrame {
                    stream_id,
                    error_code: payload.get_u32(),
                }))
            }
            FrameType::Settings => {
                require_connection(frame_type, stream_id)?;
                if flags.is_ack() {
                    if !payload.is_empty() {
                        return Err(Error::FrameSize("SETTINGS ACK must be empty".to_string()));
                    }
                    return Ok(Frame::Settings(SettingsFrame::ack()));
                }
                let settings = super::settings::Settings::parse(&payload)?;
                Ok(Frame::Settings(SettingsFrame::new(settings)))
            }
            FrameType::PushPromise => {
                require_stream(frame_type, stream_id)?;
                strip_padding(frame_type, flags, &mut payload)?;
                if payload.len() < 4 {
                    return Err(Error::FrameSize("PUSH_PROMISE truncated".to_string()));
                }
                Ok(Frame::PushPromise {
                    stream_id,
                    promised_stream_id: payload.get_u32() & 0x7FFFFFFF,
                })
            }
            FrameType::Ping => {
                require_connection(frame_type, stream_id)?;
                require_len(frame_type, &payload, 8)?;
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Ok(Frame::Ping(PingFrame {
                    ack: flags.is_ack(),
                    data,
                }))
            }
            FrameType::Goaway => {
                require_connection(frame_type, stream_id)?;
                if payload.len() < 8 {
                    return Err(Error::FrameSize("GOAWAY payload shorter than 8 bytes".to_string()));
                }
                let last_stream_id = payload.get_u32() & 0x7FFFFFFF;
                let error_code = payload.get_u32();
                Ok(Frame::Goaway(GoawayFrame::new(last_stream_id, error_code, payload)))
            }
            FrameType::WindowUpdate => {
                require_len(frame_type, &payload, 4)?;
                Ok(Frame::WindowUpdate(WindowUpdateFrame::new(
                    stream_id,
                    payload.get_u32() & 0x7FFFFFFF,
                )))
            }
            FrameType::Continuation => {
                require_stream(frame_type, stream_id)?;
                Ok(Frame::Continuation(ContinuationFrame {
                    stream_id,
                    header_block: payload,
                    end_headers: flags.is_end_headers(),
                }))
            }
        }
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let mut payload_len = frame.data.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }

        let padding_len = if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
            pad_len
        } else {
            0
        };

        buf.put_slice(&Self::encode_header(FrameType::Data, flags, frame.stream_id, payload_len));

        if frame.padding.is_some() {
            buf.put_u8(padding_len);
        }
        buf.put_slice(&frame.data);
        if padding_len > 0 {
            buf.put_bytes(0, padding_len as usize);
        }

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let mut payload_len = frame.header_block.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let padding_len = if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
            pad_len
        } else {
            0
        };

        buf.put_slice(&Self::encode_header(FrameType::Headers, flags, frame.stream_id, payload_len));

        if frame.padding.is_some() {
            buf.put_u8(padding_len);
        }
        buf.put_slice(&frame.header_block);
        if padding_len > 0 {
            buf.put_bytes(0, padding_len as usize);
        }

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut buf = BytesMut::new();
        let mut flags = FrameFlags::empty();
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        buf.put_slice(&Self::encode_header(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        ));
        buf.put_slice(&frame.header_block);
        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        // Each setting is 6 bytes (2 byte ID + 4 byte value)
        let mut settings_data = BytesMut::new();

        if !frame.ack {
            let settings = &frame.settings;
            let entries = [
                (SettingsParameter::HeaderTableSize, settings.header_table_size),
                (SettingsParameter::EnablePush, settings.enable_push.map(u32::from)),
                (SettingsParameter::MaxConcurrentStreams, settings.max_concurrent_streams),
                (SettingsParameter::InitialWindowSize, settings.initial_window_size),
                (SettingsParameter::MaxFrameSize, settings.max_frame_size),
                (SettingsParameter::MaxHeaderListSize, settings.max_header_list_size),
            ];
            for (param, value) in entries {
                if let Some(value) = value {
                    settings_data.put_u16(param.as_u16());
                    settings_data.put_u32(value);
                }
            }
        }

        // Stream ID must be 0 for SETTINGS
        buf.put_slice(&Self::encode_header(FrameType::Settings, flags, 0, settings_data.len()));
        buf.put_slice(&settings_data);

        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        buf.put_slice(&Self::encode_header(FrameType::Ping, flags, 0, 8));
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let mut buf = BytesMut::new();

        // 4 bytes stream ID + 4 bytes error code + debug data
        let payload_len = 8 + frame.debug_data.len();

        buf.put_slice(&Self::encode_header(FrameType::Goaway, FrameFlags::empty(), 0, payload_len));
        buf.put_u32(frame.last_stream_id & 0x7FFFFFFF);
        buf.put_u32(frame.error_code);
        buf.put_slice(&frame.debug_data);

        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_slice(&Self::encode_header(FrameType::WindowUpdate, FrameFlags::empty(), frame.stream_id, 4));
        // Reserved bit must be 0
        buf.put_u32(frame.size_increment & 0x7FFFFFFF);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_slice(&Self::encode_header(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4));
        buf.put_u32(frame.error_code);

        buf.freeze()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn require_stream(frame_type: FrameType, stream_id: u32) -> Result<()> {
    if stream_id == 0 {
        return Err(Error::Protocol(format!("{} frame on stream 0", frame_type.name())));
    }
    Ok(())
}

fn require_connection(frame_type: FrameType, stream_id: u32) -> Result<()> {
    if stream_id != 0 {
        return Err(Error::Protocol(format!(
            "{} frame must use stream 0, got {}",
            frame_type.name(),
            stream_id
        )));
    }
    Ok(())
}

fn require_len(frame_type: FrameType, payload: &Bytes, len: usize) -> Result<()> {
    if payload.len() != len {
        return Err(Error::FrameSize(format!(
            "{} payload must be {} bytes, got {}",
            frame_type.name(),
            len,
            payload.len()
        )));
    }
    Ok(())
}

/// Remove the pad length byte and trailing padding from `payload`
fn strip_padding(frame_type: FrameType, flags: FrameFlags, payload: &mut Bytes) -> Result<Option<u8>> {
    if !flags.is_padded() {
        return Ok(None);
    }
    if payload.is_empty() {
        return Err(Error::FrameSize(format!("{} PADDED without pad length", frame_type.name())));
    }
    let pad_len = payload[0];
    if pad_len as usize >= payload.len() {
        return Err(Error::Protocol(format!(
            "{} padding {} exceeds payload {}",
            frame_type.name(),
            pad_len,
            payload.len()
        )));
    }
    let end = payload.len() - pad_len as usize;
    *payload = payload.slice(1..end);
    Ok(Some(pad_len))
}
