use std::time::{Duration, Instant};

use super::{SendDecision, SendingScheduler};

/// Spaces packets out to a fixed target bitrate, independent of
/// acknowledgments: useful for constant-bitrate media where the encoder,
/// not the network, should decide the rate.
pub struct Paced {
    target_bps: f64,
    next_send_at: Option<Instant>,
}

impl Paced {
    pub fn new(target_bps: f64) -> Self {
        Self {
            target_bps,
            next_send_at: None,
        }
    }
}

impl SendingScheduler for Paced {
    /// # Test
    ///
    /// ```
    /// use rtp_session::scheduler::{Paced, SendingScheduler, SendDecision};
    /// use std::time::Instant;
    ///
    /// let mut sched = Paced::new(8_000.0); // 1000 bytes/sec
    /// let now = Instant::now();
    ///
    /// assert_eq!(sched.poll_send(1000, now), SendDecision::Send);
    /// match sched.poll_send(1000, now) {
    ///     SendDecision::WaitUntil(_) => {},
    ///     SendDecision::Send => panic!("second packet should be paced"),
    /// }
    /// ```
    fn poll_send(&mut self, size: usize, now: Instant) -> SendDecision {
        match self.next_send_at {
            Some(ready_at) if ready_at > now => SendDecision::WaitUntil(ready_at),
            _ => {
                let spacing = Duration::from_secs_f64(size as f64 * 8.0 / self.target_bps);
                self.next_send_at = Some(now + spacing);
                SendDecision::Send
            }
        }
    }

    fn on_ack(&mut self, _acked_bytes: usize, _rtt: Option<Duration>, _now: Instant) {}

    fn on_loss(&mut self, _now: Instant) {}

    fn current_rate_bps(&self) -> Option<f64> {
        Some(self.target_bps)
    }
}
