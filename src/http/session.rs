//! Session operations abstraction
//!
//! This module provides the session operations pattern that allows
//! transparent switching between plain TCP and TLS connections.
//!
//! [`HttpSession`] is the only thing the session loop holds: every wait it
//! performs is bounded, and the underlying transport is closed exactly once
//! whichever way the session ends.

use super::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation.
    /// An interrupted wait reports `false`, like a timeout.
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Poll for readability, returning early once `wake` is readable
    ///
    /// True only if the session itself has something to read.
    fn poll_read_or_wake(&self, wake: BorrowedFd<'_>, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session; `Ok(0)` is a clean end of stream
    ///
    /// An `io::ErrorKind::WouldBlock` error means the readiness reported by
    /// `poll` carried no application data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session
    fn close(&mut self) -> Result<()>;

    /// Remote endpoint
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Local endpoint
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Result of a bounded read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read
    Data(usize),
    /// The peer closed the stream cleanly
    Eof,
    /// Nothing arrived within the wait
    TimedOut,
}

/// Wait for `events` on a raw descriptor with `poll(2)`
///
/// Millisecond timeouts are rounded up so a short non-zero wait never
/// degenerates into a busy loop.
pub fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    let mut fds = [pollfd(fd, events)];
    poll_all(&mut fds, timeout)?;
    Ok(fds[0].revents != 0)
}

/// Wait until `fd` is readable or `wake` is readable
///
/// Returns true only when `fd` itself is ready; a wakeup alone reports
/// `false`, like a timeout.
pub fn poll_read_or_wake(fd: RawFd, wake: BorrowedFd<'_>, timeout: Option<Duration>) -> Result<bool> {
    let mut fds = [pollfd(fd, PollEvents::Read), pollfd(wake.as_raw_fd(), PollEvents::Read)];
    poll_all(&mut fds, timeout)?;
    Ok(fds[0].revents != 0)
}

fn pollfd(fd: RawFd, events: PollEvents) -> libc::pollfd {
    use libc::{POLLIN, POLLOUT};

    libc::pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    }
}

/// `poll(2)` over `fds`; EINTR leaves every `revents` empty
fn poll_all(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> Result<()> {
    let timeout_ms = timeout
        .map(|d| d.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32)
        .unwrap_or(-1); // -1 = infinite

    let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

    if result < 0 {
        let err = io::Error::last_os_error();
        for fd in fds.iter_mut() {
            fd.revents = 0;
        }
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(());
        }
        return Err(Error::Io(err));
    }

    Ok(())
}

/// Transport session with bounded waits and exactly-once close
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
    closed: bool,
}

impl<S: SessionOps> HttpSession<S> {
    /// Create a new session; `timeout` bounds writes
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: Some(Duration::from_secs(10)),
            closed: false,
        }
    }

    /// Set the timeout for writes
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read whatever is available, waiting at most `wait`
    pub fn read_timeout(&mut self, buf: &mut [u8], wait: Duration) -> Result<ReadOutcome> {
        self.read_or_wake(buf, wait, None)
    }

    /// Like [`HttpSession::read_timeout`], but readability of `wake` cuts
    /// the wait short with [`ReadOutcome::TimedOut`]
    pub fn read_or_wake(&mut self, buf: &mut [u8], wait: Duration, wake: Option<BorrowedFd<'_>>) -> Result<ReadOutcome> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let ready = match wake {
            Some(wake) => self.session.poll_read_or_wake(wake, Some(wait))?,
            None => self.session.poll(PollEvents::Read, Some(wait))?,
        };
        if !ready {
            return Ok(ReadOutcome::TimedOut);
        }

        match self.session.read(buf) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::TimedOut),
            Err(e) => Err(e),
        }
    }

    /// Write all of `buf`, each chunk bounded by the session timeout
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        while !buf.is_empty() {
            if !self.session.poll(PollEvents::Write, self.timeout)? {
                return Err(Error::Timeout);
            }
            match self.session.write(buf)? {
                0 => return Err(Error::ConnectionClosed),
                n => buf = &buf[n..],
            }
        }

        Ok(())
    }

    /// Close the session; later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.session.close()
    }

    /// Whether [`HttpSession::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Get a reference to the underlying session
    pub fn get_ref(&self) -> &S {
        &self.session
    }

    /// Get a mutable reference to the underlying session
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: SessionOps> Drop for HttpSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!(error = %e, "close on drop failed");
        }
    }
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn poll_read_or_wake(&self, wake: BorrowedFd<'_>, timeout: Option<Duration>) -> Result<bool> {
        poll_read_or_wake(self.stream.as_raw_fd(), wake, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // The peer may already have torn the socket down
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Error::from),
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }
}

/// Helper to create a session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}
