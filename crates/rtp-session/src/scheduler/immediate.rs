use std::time::{Duration, Instant};

use super::{SendDecision, SendingScheduler};

/// No congestion control at all: every packet is sent the instant it is
/// enqueued. Useful for loopback testing and for media where the
/// application itself already rate-limits production.
#[derive(Default)]
pub struct Immediate;

impl SendingScheduler for Immediate {
    fn poll_send(&mut self, _size: usize, _now: Instant) -> SendDecision {
        SendDecision::Send
    }

    fn on_ack(&mut self, _acked_bytes: usize, _rtt: Option<Duration>, _now: Instant) {}

    fn on_loss(&mut self, _now: Instant) {}

    fn current_rate_bps(&self) -> Option<f64> {
        None
    }
}
