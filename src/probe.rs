//! Session loop
//!
//! One request, one stream. The loop multiplexes a single bounded read
//! against every timer the run has (keepalive ping, delay expiry, runtime
//! cap, with the read timeout as the upper bound) by waiting for the
//! earliest of them, then feeds whatever arrived to the protocol engine and
//! reacts to the resulting events. A wait that ends with nothing to read is
//! never an error; a silent peer is cut off by the runtime cap or a
//! termination request.
//!
//! Iteration order:
//!
//! 1. runtime cap reached → done
//! 2. termination requested → done
//! 3. keepalive ping due → send it
//! 4. delay expired → release the withheld credit
//! 5. read for at most [`Deadlines::wait`], or until a termination request
//! 6. dispatch events, then write whatever the engine queued

use crate::config::{RunConfig, MAX_DURATION};
use crate::delay::{DataDecision, DelayPolicy};
use crate::error::{Completion, Outcome, ProbeError};
use crate::http::h2::{describe_code, ErrorCode, ProtocolEngine, ProtocolEvent, StreamId};
use crate::http::session::{HttpSession, ReadOutcome, SessionOps};
use crate::log::{EventLog, Tag};
use crate::shutdown::Shutdown;
use crate::transport::Connection;
use std::io::Write;
use std::time::{Duration, Instant};

/// Extra wait past the delay expiry so the flush runs after, not before, it
pub const DELAY_WAKE_MARGIN: Duration = Duration::from_millis(10);

/// `user-agent` request header
pub const USER_AGENT: &str = concat!("h2delay/", env!("CARGO_PKG_VERSION"));

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Upcoming timer deadlines of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Now plus the read timeout; no wait lasts longer
    pub read: Instant,
    pub ping: Option<Instant>,
    pub delay_expiry: Option<Instant>,
    pub runtime: Option<Instant>,
}

impl Deadlines {
    /// How long the next read may block
    ///
    /// The earliest deadline wins; the delay expiry gets
    /// [`DELAY_WAKE_MARGIN`] added. Deadlines already passed give zero.
    pub fn wait(&self, now: Instant) -> Duration {
        let delay = self.delay_expiry.map(|expiry| expiry + DELAY_WAKE_MARGIN);
        [Some(self.read), self.ping, delay, self.runtime]
            .into_iter()
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::ZERO)
    }
}

/// Driver of one probe session
///
/// Owns the transport and the engine for the whole run; the transport is
/// closed when [`ProbeSession::run`] returns, whatever the outcome.
pub struct ProbeSession<'a, S: SessionOps, E: ProtocolEngine, W: Write> {
    session: HttpSession<S>,
    engine: E,
    config: &'a RunConfig,
    log: &'a mut EventLog<W>,
    shutdown: &'a Shutdown,
    policy: DelayPolicy,
    started: Instant,
    last_ping: Option<Instant>,
}

impl<'a, S: SessionOps, E: ProtocolEngine, W: Write> ProbeSession<'a, S, E, W> {
    pub fn new(
        conn: Connection<S>,
        engine: E,
        config: &'a RunConfig,
        log: &'a mut EventLog<W>,
        shutdown: &'a Shutdown,
    ) -> Self {
        ProbeSession {
            session: conn.session,
            engine,
            config,
            log,
            shutdown,
            policy: DelayPolicy::new(config.delay, config.start_after_bytes),
            started: Instant::now(),
            last_ping: None,
        }
    }

    /// Measure the runtime cap from `started` instead of now
    ///
    /// Used to count connection setup against the cap.
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    /// Run to completion
    pub fn run(mut self) -> Outcome {
        let terminal = self.drive();

        if terminal.is_ok() {
            self.engine.close(ErrorCode::NoError);
        }
        // Teardown writes are best-effort; a GOAWAY queued by an engine
        // error goes out here too
        let goaway = self.engine.drain();
        if !goaway.is_empty() {
            if let Err(e) = self.session.write_all(&goaway) {
                tracing::debug!(error = %e, "GOAWAY not sent");
            }
        }
        if let Err(e) = self.session.close() {
            tracing::debug!(error = %e, "close failed");
        }

        Outcome {
            terminal,
            total_received: self.policy.total_received(),
        }
    }

    fn drive(&mut self) -> Result<Completion, ProbeError> {
        let stream_id = self.request()?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut events = Vec::new();

        loop {
            let now = Instant::now();

            if let Some(max_runtime) = self.config.max_runtime {
                let elapsed = now.saturating_duration_since(self.started);
                if elapsed >= max_runtime {
                    self.log.emit(
                        Tag::State,
                        "max_runtime_reached",
                        &[
                            ("max_runtime", &format_args!("{:.1}", max_runtime.as_secs_f64())),
                            ("elapsed", &format_args!("{:.1}", elapsed.as_secs_f64())),
                        ],
                    );
                    return Ok(Completion::MaxRuntime);
                }
            }

            if self.shutdown.is_requested() {
                self.log.emit(Tag::State, "interrupted", &[]);
                return Ok(Completion::Interrupted);
            }

            if self.ping_due(now) {
                self.send_ping(now)?;
            }

            if let Some(amount) = self.policy.poll_flush(now) {
                self.flush(stream_id, amount)?;
            }

            let now = Instant::now();
            let wait = self.deadlines(now).wait(now);
            let outcome = self
                .session
                .read_or_wake(&mut buf, wait, self.shutdown.wake_fd())
                .map_err(|e| ProbeError::from_session(e, self.config.read_timeout))?;

            let n = match outcome {
                ReadOutcome::TimedOut => continue,
                ReadOutcome::Eof => {
                    self.log.emit(Tag::H2, "eof", &[("server_closed_cleanly", &1)]);
                    return Ok(Completion::CleanEof);
                }
                ReadOutcome::Data(n) => n,
            };

            // Events that precede a malformed frame still count
            let fed = self.engine.feed_into(&buf[..n], &mut events);
            for event in events.drain(..) {
                if let Some(done) = self.dispatch(stream_id, event)? {
                    self.write_pending()?;
                    return Ok(done);
                }
            }
            fed?;
            self.write_pending()?;
        }
    }

    /// Connection preface, SETTINGS and the GET request
    fn request(&mut self) -> Result<StreamId, ProbeError> {
        let config = self.config;
        let headers = [
            (":method", "GET"),
            (":authority", config.host.as_str()),
            (":scheme", "https"),
            (":path", config.path.as_str()),
            ("range", config.range.as_str()),
            ("user-agent", USER_AGENT),
            ("accept", "*/*"),
        ];

        let stream_id = self.engine.open_stream(&headers)?;
        self.write_pending()?;

        self.log.emit(
            Tag::H2,
            "request_sent",
            &[("url", &config.url()), ("stream_id", &stream_id)],
        );
        self.log.emit(
            Tag::State,
            "params",
            &[
                ("delay", &format_args!("{:.3}", config.delay.as_secs_f64())),
                ("start_after_bytes", &config.start_after_bytes),
                ("ping_interval", &format_args!("{:.3}", secs(config.ping_interval))),
                ("read_timeout", &format_args!("{:.1}", config.read_timeout.as_secs_f64())),
                ("max_runtime", &format_args!("{:.1}", secs(config.max_runtime))),
            ],
        );

        Ok(stream_id)
    }

    fn deadlines(&self, now: Instant) -> Deadlines {
        Deadlines {
            read: after(now, self.config.read_timeout),
            ping: self.next_ping(),
            delay_expiry: self.policy.expiry(),
            runtime: self.config.max_runtime.map(|max| after(self.started, max)),
        }
    }

    /// The first ping goes out right away
    fn next_ping(&self) -> Option<Instant> {
        let interval = self.config.ping_interval?;
        Some(match self.last_ping {
            Some(sent) => after(sent, interval),
            None => self.started,
        })
    }

    fn ping_due(&self, now: Instant) -> bool {
        self.next_ping().map_or(false, |due| now >= due)
    }

    fn send_ping(&mut self, now: Instant) -> Result<(), ProbeError> {
        self.engine.send_ping(rand::random::<[u8; 8]>());
        self.write_pending()?;
        self.last_ping = Some(now);
        self.log.emit(Tag::Ping, "ping_sent", &[("keepalive", &1)]);
        Ok(())
    }

    /// Release everything withheld while armed, in one acknowledgment
    fn flush(&mut self, stream_id: StreamId, amount: u64) -> Result<(), ProbeError> {
        if amount > 0 {
            self.engine.acknowledge(stream_id, amount)?;
            self.write_pending()?;
        }
        self.log.emit(
            Tag::State,
            "delay_complete",
            &[("window_update_sent_bytes", &amount)],
        );
        Ok(())
    }

    /// React to one event; `Some` ends the session
    fn dispatch(&mut self, stream_id: StreamId, event: ProtocolEvent) -> Result<Option<Completion>, ProbeError> {
        match event {
            ProtocolEvent::SettingsReceived { .. } => {
                self.log.emit(Tag::H2, "settings_received", &[]);
            }
            ProtocolEvent::SettingsAcknowledged => {
                self.log.emit(Tag::H2, "settings_ack", &[]);
            }
            ProtocolEvent::ResponseReceived { status, .. } => {
                self.log.emit(Tag::H2, "response_headers", &[("status", &status)]);
            }
            ProtocolEvent::DataReceived {
                stream_id: data_stream,
                len,
                flow_controlled_length,
            } => {
                self.on_data(data_stream, len as u64, flow_controlled_length as u64)?;
            }
            ProtocolEvent::PingAckReceived { .. } => {
                self.log.emit(Tag::Ping, "ping_ack_received", &[]);
            }
            ProtocolEvent::PingReceived { data } => {
                self.engine.acknowledge_ping(data);
                self.write_pending()?;
                self.log.emit(Tag::Ping, "ping_received", &[("ack_sent", &1)]);
            }
            ProtocolEvent::StreamEnded { stream_id: ended } if ended == stream_id => {
                self.log.emit(
                    Tag::H2,
                    "stream_ended",
                    &[("total_received", &self.policy.total_received())],
                );
                return Ok(Some(Completion::StreamEnded));
            }
            ProtocolEvent::StreamReset { stream_id: reset, error_code } if reset == stream_id => {
                self.log.emit(
                    Tag::H2,
                    "reset_stream",
                    &[
                        ("error_code", &describe_code(error_code)),
                        ("total_received", &self.policy.total_received()),
                    ],
                );
                return Err(ProbeError::PeerReset {
                    stream_id: reset,
                    error_code,
                });
            }
            ProtocolEvent::ConnectionTerminated {
                error_code,
                last_stream_id,
                ..
            } => {
                self.log.emit(
                    Tag::H2,
                    "goaway",
                    &[
                        ("error_code", &describe_code(error_code)),
                        ("last_stream_id", &last_stream_id),
                        ("total_received", &self.policy.total_received()),
                    ],
                );
                return Err(ProbeError::PeerGoaway {
                    error_code,
                    last_stream_id,
                });
            }
            other => {
                tracing::debug!(event = ?other, "event for another stream ignored");
            }
        }
        Ok(None)
    }

    fn on_data(&mut self, stream_id: StreamId, len: u64, flow_controlled_length: u64) -> Result<(), ProbeError> {
        match self.policy.on_data(Instant::now(), len, flow_controlled_length) {
            DataDecision::Acknowledge(amount) => {
                // Empty DATA (END_STREAM only) consumed no credit
                if amount > 0 {
                    self.engine.acknowledge(stream_id, amount)?;
                }
            }
            DataDecision::Armed { .. } => {
                self.log.emit(
                    Tag::State,
                    "delay_started",
                    &[
                        ("total_received", &self.policy.total_received()),
                        ("withhold_seconds", &format_args!("{:.3}", self.policy.delay().as_secs_f64())),
                    ],
                );
            }
            DataDecision::Withhold => {}
        }

        let stream_window = self
            .engine
            .stream_window(stream_id)
            .map_or_else(|| "-".to_string(), |w| w.to_string());
        self.log.emit(
            Tag::Data,
            "data",
            &[
                ("sz", &len),
                ("total", &self.policy.total_received()),
                ("pending_ack", &self.policy.pending_ack()),
                ("stream_window", &stream_window),
                ("delaying", &u8::from(self.policy.is_armed())),
            ],
        );
        Ok(())
    }

    /// Write whatever the engine queued
    fn write_pending(&mut self) -> Result<(), ProbeError> {
        let out = self.engine.drain();
        if out.is_empty() {
            return Ok(());
        }
        tracing::debug!(bytes = out.len(), "writing");
        self.session
            .write_all(&out)
            .map_err(|e| ProbeError::from_session(e, self.config.read_timeout))
    }
}

/// `start + duration`, clamped to a representable deadline
fn after(start: Instant, duration: Duration) -> Instant {
    start + duration.min(MAX_DURATION)
}

fn secs(duration: Option<Duration>) -> f64 {
    duration.map_or(0.0, |d| d.as_secs_f64())
}
