//! Event log
//!
//! The event log is the product output of a run: one tab-delimited line per
//! transition, flushed as soon as it is written so a supervising process can
//! relay it live.
//!
//! ```text
//! [2024-05-01 12:00:00]	DATA	data	sz=16384	total=16384	pending_ack=0	stream_window=49151	delaying=0
//! ```
//!
//! Diagnostics that are not part of this vocabulary go to `tracing` instead.

use std::fmt;
use std::io::{self, Write};

/// Timestamp layout of every line (local time)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Line category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// TCP/TLS connection details
    Conn,
    /// HTTP/2 protocol events
    H2,
    /// Data and flow-control state
    Data,
    /// PING traffic
    Ping,
    /// Internal state transitions
    State,
    /// Failures
    Err,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Conn => "CONN",
            Tag::H2 => "H2",
            Tag::Data => "DATA",
            Tag::Ping => "PING",
            Tag::State => "STATE",
            Tag::Err => "ERR",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writer of event lines
pub struct EventLog<W: Write> {
    out: W,
}

impl EventLog<io::Stdout> {
    /// Event log on standard output
    pub fn stdout() -> Self {
        EventLog::new(io::stdout())
    }
}

impl<W: Write> EventLog<W> {
    pub fn new(out: W) -> Self {
        EventLog { out }
    }

    /// Write one line and flush it
    ///
    /// A failing sink must not end the run, so write errors are only traced.
    pub fn emit(&mut self, tag: Tag, event: &str, fields: &[(&str, &dyn fmt::Display)]) {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let line = format_line(&timestamp, tag, event, fields);

        let result = self
            .out
            .write_all(line.as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            tracing::warn!(error = %e, tag = %tag, event, "failed to write event log line");
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Render a line, newline included
///
/// Values are rendered with `Display`; tabs and line breaks inside them are
/// replaced so every event stays on one parseable line.
pub fn format_line(timestamp: &str, tag: Tag, event: &str, fields: &[(&str, &dyn fmt::Display)]) -> String {
    let mut line = format!("[{}]\t{}\t{}", timestamp, tag, event);
    for (key, value) in fields {
        line.push('\t');
        line.push_str(key);
        line.push('=');
        line.extend(
            value
                .to_string()
                .chars()
                .map(|c| if c.is_control() { ' ' } else { c }),
        );
    }
    line.push('\n');
    line
}
