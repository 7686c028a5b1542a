//! h2delay - HTTP/2 WINDOW_UPDATE delay probe
//!
//! Issues one HTTP/2 GET over TLS and withholds flow-control credit for a
//! configured time once enough of the response body has arrived, recording
//! every protocol transition as a tab-delimited event log on stdout.
//!
//! # Architecture
//!
//! - [`config`]: command line and validated [`config::RunConfig`]
//! - [`transport`]: TCP + TLS with mandatory ALPN `h2`
//! - [`http`]: transport sessions, TLS and the sans-I/O HTTP/2 engine
//! - [`delay`]: the arm-once, flush-once acknowledgment policy
//! - [`probe`]: the session loop
//! - [`log`]: the event log
//! - [`shutdown`]: termination requests that wake the session loop
//! - [`error`]: outcome taxonomy and exit codes

pub mod config;
pub mod delay;
pub mod error;
pub mod http;
pub mod log;
pub mod probe;
pub mod shutdown;
pub mod transport;

use config::RunConfig;
use error::{Outcome, ProbeError};
use http::h2::H2Connection;
use log::{EventLog, Tag};
use probe::ProbeSession;
use std::io::Write;
use shutdown::Shutdown;
use std::time::Instant;

/// Run one probe against the configured target and return the exit status
///
/// Always ends the log with `STATE exit code=N`.
pub fn execute<W: Write>(config: &RunConfig, log: &mut EventLog<W>, shutdown: &Shutdown) -> i32 {
    let started = Instant::now();

    log.emit(
        Tag::Conn,
        "cert_verification",
        &[("enabled", &u8::from(config.verify_peer))],
    );
    if !config.verify_peer {
        tracing::warn!(host = %config.host, "certificate verification disabled");
    }

    let outcome = match transport::connect(config, log) {
        Ok(conn) => match H2Connection::new() {
            Ok(engine) => ProbeSession::new(conn, engine, config, log, shutdown)
                .started_at(started)
                .run(),
            Err(e) => Outcome {
                terminal: Err(e.into()),
                total_received: 0,
            },
        },
        Err(e) => Outcome {
            terminal: Err(e),
            total_received: 0,
        },
    };

    finish(&outcome, log)
}

/// Log the failure, if any, and the exit line
pub fn finish<W: Write>(outcome: &Outcome, log: &mut EventLog<W>) -> i32 {
    if let Err(e) = &outcome.terminal {
        report(e, outcome.total_received, log);
    }

    let code = outcome.exit_code();
    log.emit(Tag::State, "exit", &[("code", &code)]);
    code
}

/// `ERR` line for a failure the `H2` lines have not already reported
pub fn report<W: Write>(err: &ProbeError, total_received: u64, log: &mut EventLog<W>) {
    if err.is_peer_termination() {
        return;
    }
    tracing::debug!(error = ?err, "run failed");
    log.emit(
        Tag::Err,
        err.category(),
        &[("msg", &err), ("total_received", &total_received)],
    );
}
