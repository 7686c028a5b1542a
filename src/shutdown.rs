//! Termination requests from outside the session loop
//!
//! A signal handler calls [`Shutdown::request`] from its own thread. The
//! flag is set first, then a byte goes down a socket pair whose read end
//! the session loop polls next to the connection, so a blocked wait ends
//! right away instead of at its next deadline.

use std::io::Write;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared termination flag with a pollable wakeup descriptor
pub struct Shutdown {
    requested: AtomicBool,
    /// (write end, read end)
    wake: Option<(UnixStream, UnixStream)>,
}

impl Shutdown {
    /// Without a wakeup pair the flag is still honoured, at the next deadline
    pub fn new() -> Self {
        let wake = UnixStream::pair().and_then(|(tx, rx)| {
            tx.set_nonblocking(true)?;
            rx.set_nonblocking(true)?;
            Ok((tx, rx))
        });
        let wake = match wake {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!(error = %e, "no shutdown wakeup; termination waits for the next timer");
                None
            }
        };

        Shutdown {
            requested: AtomicBool::new(false),
            wake,
        }
    }

    /// Ask the session to stop
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Some((tx, _)) = &self.wake {
            // A full buffer already holds a pending wakeup
            let _ = (&*tx).write(&[1]);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Readable once [`Shutdown::request`] has run
    pub fn wake_fd(&self) -> Option<BorrowedFd<'_>> {
        self.wake.as_ref().map(|(_, rx)| rx.as_fd())
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Shutdown::new()
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("requested", &self.is_requested())
            .field("wakeup", &self.wake.is_some())
            .finish()
    }
}
