//! Scripted HTTP/2 server peer for probe integration tests
//!
//! The peer speaks just enough HTTP/2 to drive a probe: it reads the client
//! preface, exchanges SETTINGS, decodes the request and then does exactly
//! what the test script tells it to.

#![allow(dead_code)]

use bytes::Bytes;
use h2delay::config::RunConfig;
use h2delay::http::h2::frames::*;
use h2delay::http::h2::{FrameCodec, Settings, CONNECTION_PREFACE};
use h2delay::http::session::{FdSessionOps, HttpSession, ReadOutcome, SessionOps};
use h2delay::http::tls::{TlsConfig, TlsSessionOps};
use h2delay::log::EventLog;
use h2delay::shutdown::Shutdown;
use std::collections::VecDeque;
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound for any single wait of the peer
pub const PEER_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MockPeer<S: SessionOps> {
    session: HttpSession<S>,
    codec: FrameCodec,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    inbound: Vec<u8>,
    preface_seen: bool,
    frames: VecDeque<Frame>,
    eof: bool,
}

impl<S: SessionOps> MockPeer<S> {
    pub fn new(session: S) -> Self {
        MockPeer {
            session: HttpSession::new(session),
            codec: FrameCodec::new(),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            inbound: Vec::new(),
            preface_seen: false,
            frames: VecDeque::new(),
            eof: false,
        }
    }

    /// Read once, waiting at most `wait`; false once the client is gone
    fn pump(&mut self, wait: Duration) -> bool {
        let mut buf = [0u8; 16384];
        match self.session.read_timeout(&mut buf, wait) {
            Ok(ReadOutcome::Data(n)) => self.inbound.extend_from_slice(&buf[..n]),
            Ok(ReadOutcome::TimedOut) => return true,
            Ok(ReadOutcome::Eof) | Err(_) => {
                self.eof = true;
                return false;
            }
        }

        if !self.preface_seen {
            if self.inbound.len() < CONNECTION_PREFACE.len() {
                return true;
            }
            assert_eq!(&self.inbound[..CONNECTION_PREFACE.len()], CONNECTION_PREFACE);
            self.inbound.drain(..CONNECTION_PREFACE.len());
            self.preface_seen = true;
        }

        let frames = self.codec.decode(&self.inbound).expect("client sent a malformed frame");
        self.inbound.clear();
        self.frames.extend(frames);
        true
    }

    /// Next client frame, or `None` on timeout or EOF
    pub fn next_frame(&mut self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.frames.pop_front() {
                return Some(frame);
            }
            let now = Instant::now();
            if self.eof || now >= deadline {
                return None;
            }
            if !self.pump(deadline - now) {
                return None;
            }
        }
    }

    /// All frames received during `duration`
    pub fn collect_for(&mut self, duration: Duration) -> Vec<Frame> {
        let deadline = Instant::now() + duration;
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame(deadline.saturating_duration_since(Instant::now())) {
            frames.push(frame);
        }
        frames
    }

    /// Skip frames until one matches
    pub fn expect<F>(&mut self, timeout: Duration, mut pred: F) -> Option<Frame>
    where
        F: FnMut(&Frame) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while let Some(frame) = self.next_frame(deadline.saturating_duration_since(Instant::now())) {
            if pred(&frame) {
                return Some(frame);
            }
        }
        None
    }

    /// Next WINDOW_UPDATE increment for `stream_id`
    pub fn expect_window_update(&mut self, stream_id: u32, timeout: Duration) -> Option<u32> {
        match self.expect(timeout, |f| matches!(f, Frame::WindowUpdate(wu) if wu.stream_id == stream_id)) {
            Some(Frame::WindowUpdate(wu)) => Some(wu.size_increment),
            _ => None,
        }
    }

    /// SETTINGS exchange; returns the decoded request headers
    pub fn handshake(&mut self) -> Vec<(String, String)> {
        self.send(FrameCodec::encode_settings_frame(&SettingsFrame::new(Settings::default())));

        let mut settings_seen = false;
        loop {
            match self.next_frame(PEER_TIMEOUT).expect("client went away during handshake") {
                Frame::Settings(s) if !s.ack => {
                    settings_seen = true;
                    self.send(FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
                }
                Frame::Headers(h) => {
                    assert!(settings_seen, "request before SETTINGS");
                    assert!(h.end_headers && h.end_stream);
                    return self
                        .decoder
                        .decode(&h.header_block)
                        .expect("bad request header block")
                        .into_iter()
                        .map(|(k, v)| {
                            (
                                String::from_utf8(k).unwrap(),
                                String::from_utf8(v).unwrap(),
                            )
                        })
                        .collect();
                }
                _ => {}
            }
        }
    }

    pub fn send_response(&mut self, stream_id: u32, status: u16, end_stream: bool) {
        let status = status.to_string();
        let headers: Vec<(&[u8], &[u8])> = vec![
            (&b":status"[..], status.as_bytes()),
            (&b"content-type"[..], &b"application/octet-stream"[..]),
        ];
        let block = Bytes::from(self.encoder.encode(headers));
        self.send(FrameCodec::encode_headers_frame(&HeadersFrame::new(
            stream_id, block, end_stream, true,
        )));
    }

    pub fn send_data(&mut self, stream_id: u32, len: usize, end_stream: bool) {
        let frame = DataFrame::new(stream_id, Bytes::from(vec![b'x'; len]), end_stream);
        self.send(FrameCodec::encode_data_frame(&frame));
    }

    pub fn send_padded_data(&mut self, stream_id: u32, len: usize, padding: u8) {
        let frame = DataFrame::new(stream_id, Bytes::from(vec![b'x'; len]), false).with_padding(padding);
        self.send(FrameCodec::encode_data_frame(&frame));
    }

    pub fn send_rst(&mut self, stream_id: u32, error_code: u32) {
        self.send(FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
            stream_id,
            error_code,
        }));
    }

    pub fn send_goaway(&mut self, last_stream_id: u32, error_code: u32) {
        self.send(FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            last_stream_id,
            error_code,
            Bytes::from_static(b"bye"),
        )));
    }

    pub fn send_ping(&mut self, data: [u8; 8]) {
        self.send(FrameCodec::encode_ping_frame(&PingFrame::new(data)));
    }

    pub fn send_ping_ack(&mut self, data: [u8; 8]) {
        self.send(FrameCodec::encode_ping_frame(&PingFrame::ack(data)));
    }

    pub fn send(&mut self, bytes: Bytes) {
        self.session.write_all(&bytes).expect("peer write failed");
    }

    /// Close the transport (close_notify over TLS)
    pub fn close(mut self) {
        let _ = self.session.close();
    }
}

/// TLS peer with the built-in certificate offering `alpn`
pub fn spawn_tls_peer<F, T>(alpn: &'static [&'static str], script: F) -> (u16, JoinHandle<T>)
where
    F: FnOnce(MockPeer<TlsSessionOps>) -> T + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        let config = TlsConfig::server().alpn(alpn).build().unwrap();
        let tls = config.accept(tcp).unwrap();
        script(MockPeer::new(tls))
    });

    (port, handle)
}

/// Plain TCP peer; returns the client side stream
pub fn spawn_plain_peer<F, T>(script: F) -> (TcpStream, JoinHandle<T>)
where
    F: FnOnce(MockPeer<FdSessionOps>) -> T + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        script(MockPeer::new(FdSessionOps::new(tcp)))
    });

    (TcpStream::connect(addr).unwrap(), handle)
}

/// Probe configuration aimed at a local peer
pub fn local_config(port: u16) -> RunConfig {
    let mut config = RunConfig::new("localhost");
    config.ip = Some("127.0.0.1".to_string());
    config.port = port;
    config.path = "/big.bin".to_string();
    config.connect_timeout = Duration::from_secs(2);
    config.read_timeout = Duration::from_secs(5);
    config
}

/// One parsed event log line
#[derive(Debug, Clone)]
pub struct LogLine {
    pub tag: String,
    pub event: String,
    pub fields: Vec<(String, String)>,
}

impl LogLine {
    pub fn parse(line: &str) -> LogLine {
        let mut parts = line.split('\t');
        let timestamp = parts.next().unwrap();
        assert!(timestamp.starts_with('[') && timestamp.ends_with(']'), "{}", line);

        let tag = parts.next().unwrap().to_string();
        let event = parts.next().unwrap().to_string();
        let fields = parts
            .map(|kv| {
                let (k, v) = kv.split_once('=').unwrap();
                (k.to_string(), v.to_string())
            })
            .collect();

        LogLine { tag, event, fields }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, tag: &str, event: &str) -> bool {
        self.tag == tag && self.event == event
    }
}

/// Event log of a finished run
pub struct RunLog {
    pub lines: Vec<LogLine>,
}

impl RunLog {
    pub fn from_bytes(bytes: Vec<u8>) -> RunLog {
        let text = String::from_utf8(bytes).unwrap();
        RunLog {
            lines: text.lines().map(LogLine::parse).collect(),
        }
    }

    pub fn all(&self, tag: &str, event: &str) -> Vec<&LogLine> {
        self.lines.iter().filter(|l| l.is(tag, event)).collect()
    }

    pub fn find(&self, tag: &str, event: &str) -> &LogLine {
        self.lines
            .iter()
            .find(|l| l.is(tag, event))
            .unwrap_or_else(|| panic!("no {} {} line in {:#?}", tag, event, self.lines))
    }

    pub fn has(&self, tag: &str, event: &str) -> bool {
        self.lines.iter().any(|l| l.is(tag, event))
    }

    /// Index of the first matching line
    pub fn position(&self, tag: &str, event: &str) -> usize {
        self.lines
            .iter()
            .position(|l| l.is(tag, event))
            .unwrap_or_else(|| panic!("no {} {} line", tag, event))
    }

    pub fn last(&self) -> &LogLine {
        self.lines.last().unwrap()
    }
}

/// Run the probe end to end and capture its event log
pub fn run_probe(config: &RunConfig) -> (i32, RunLog) {
    let mut log = EventLog::new(Vec::new());
    let code = h2delay::execute(config, &mut log, &Shutdown::new());
    (code, RunLog::from_bytes(log.into_inner()))
}
