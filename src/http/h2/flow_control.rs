//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 7540 Section 5.2.
//!
//! The probe only ever receives data, so the interesting side is the receive
//! window: the peer may send no more than the credit we have granted, and
//! credit only comes back when we explicitly acknowledge consumed bytes.

use super::error::{Error, Result};
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Largest window RFC 7540 allows (2^31 - 1)
pub const MAX_WINDOW_SIZE: i64 = 0x7FFFFFFF;

/// Flow control window
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Initial window size
    initial_size: u32,
    /// Current window size (can be negative after a SETTINGS shrink)
    current_size: i64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Account for `amount` flow-controlled bytes received from the peer
    ///
    /// Fails if the peer sent more than the credit it was given.
    pub fn receive(&mut self, amount: usize) -> Result<()> {
        let amount = amount as i64;
        if amount > self.current_size {
            return Err(Error::FlowControl(format!(
                "Peer sent {} bytes with only {} bytes of window",
                amount, self.current_size
            )));
        }
        self.current_size -= amount;
        Ok(())
    }

    /// Increase window size (WINDOW_UPDATE sent or received)
    ///
    /// Returns the new window size
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "Window update increment must be non-zero".to_string(),
            ));
        }

        let new_size = self.current_size + increment as i64;

        // Check for overflow (RFC 7540 Section 6.9.1)
        if new_size > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Update initial window size from SETTINGS
    ///
    /// This shifts the current window by the difference (RFC 7540 Section 6.9.2)
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;

        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an acknowledgment into WINDOW_UPDATE-sized increments
///
/// A single WINDOW_UPDATE can carry at most 2^31-1; larger releases need
/// several frames.
pub fn increments(mut amount: u64) -> impl Iterator<Item = u32> {
    std::iter::from_fn(move || {
        if amount == 0 {
            return None;
        }
        let step = amount.min(MAX_WINDOW_SIZE as u64);
        amount -= step;
        Some(step as u32)
    })
}
