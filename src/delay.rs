//! WINDOW_UPDATE delay policy
//!
//! Decides, per received DATA chunk, whether its flow-control credit is
//! returned right away or withheld. The policy arms at most once per session:
//! the first time the cumulative body byte count reaches the threshold. While
//! armed every chunk's credit accumulates; when the delay expires the whole
//! accumulated amount is released in one acknowledgment and the policy never
//! arms again.
//!
//! The policy is pure state: the caller supplies the clock and performs the
//! acknowledgment.

use crate::config::MAX_DURATION;
use std::time::{Duration, Instant};

/// Delay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayState {
    /// Acknowledging immediately; not armed yet
    Idle,
    /// Withholding credit until `until`
    Armed { until: Instant },
    /// Acknowledging immediately; the one delay has been served
    Flushed,
}

/// What to do with one DATA chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDecision {
    /// Return this much credit now
    Acknowledge(u64),
    /// This chunk armed the delay
    Armed { until: Instant },
    /// Credit withheld until the delay expires
    Withhold,
}

#[derive(Debug, Clone)]
pub struct DelayPolicy {
    delay: Duration,
    start_after_bytes: u64,
    state: DelayState,
    total_received: u64,
    pending_ack: u64,
}

impl DelayPolicy {
    /// A zero `delay` never arms
    pub fn new(delay: Duration, start_after_bytes: u64) -> Self {
        DelayPolicy {
            delay,
            start_after_bytes,
            state: DelayState::Idle,
            total_received: 0,
            pending_ack: 0,
        }
    }

    /// Account for a DATA chunk of `len` body bytes
    ///
    /// `flow_controlled_length` (body plus padding) is the credit the chunk
    /// consumed.
    pub fn on_data(&mut self, now: Instant, len: u64, flow_controlled_length: u64) -> DataDecision {
        self.total_received += len;

        match self.state {
            DelayState::Armed { .. } => {
                self.pending_ack += flow_controlled_length;
                DataDecision::Withhold
            }
            DelayState::Idle if !self.delay.is_zero() && self.total_received >= self.start_after_bytes => {
                // Clamped so the expiry stays representable
                let until = now + self.delay.min(MAX_DURATION);
                self.state = DelayState::Armed { until };
                self.pending_ack = flow_controlled_length;
                DataDecision::Armed { until }
            }
            DelayState::Idle | DelayState::Flushed => DataDecision::Acknowledge(flow_controlled_length),
        }
    }

    /// Release the withheld credit once the delay has expired
    ///
    /// Returns the amount to acknowledge exactly once, at the first call with
    /// `now` at or past the expiry. The amount may be zero.
    pub fn poll_flush(&mut self, now: Instant) -> Option<u64> {
        match self.state {
            DelayState::Armed { until } if now >= until => {
                self.state = DelayState::Flushed;
                Some(std::mem::take(&mut self.pending_ack))
            }
            _ => None,
        }
    }

    /// Expiry of the armed delay
    pub fn expiry(&self) -> Option<Instant> {
        match self.state {
            DelayState::Armed { until } => Some(until),
            _ => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, DelayState::Armed { .. })
    }

    pub fn state(&self) -> DelayState {
        self.state
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Body bytes received so far
    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    /// Credit currently withheld
    pub fn pending_ack(&self) -> u64 {
        self.pending_ack
    }
}
