use std::time::{Duration, Instant};

use super::{SendDecision, SendingScheduler};

/// Default maximum segment size, since MSS isn't otherwise observable from
/// inside the engine (see the design notes on the default).
const DEFAULT_MSS: usize = 1200;

/// Multiplicative-decrease factor applied to `cwnd` on loss. 0.8 rather
/// than TCP's 0.5, since RTP media traffic backs off less aggressively
/// than bulk TCP transfers.
const BETA: f64 = 0.8;

/// Smoothing factor for the `s_rtt` EWMA, matching RFC 6298's `SRTT`
/// update weight.
const RTT_ALPHA: f64 = 1.0 / 8.0;

/// TCP-style additive-increase/multiplicative-decrease congestion window,
/// counted in bytes: a packet may be sent as long as the number of
/// in-flight bytes is below `cwnd`. Grows by one MSS per RTT in congestion
/// avoidance (slow start grows by one MSS per ACK until `ssthresh`), and
/// backs off by `BETA` on loss.
pub struct AckWindow {
    mss: usize,
    cwnd: f64,
    ssthresh: f64,
    in_flight: usize,
    /// Smoothed RTT in seconds, used to turn `cwnd` into a pacing rate.
    s_rtt: Option<f64>,
}

impl AckWindow {
    pub fn new() -> Self {
        Self::with_mss(DEFAULT_MSS)
    }

    pub fn with_mss(mss: usize) -> Self {
        Self {
            mss,
            cwnd: mss as f64 * 4.0,
            ssthresh: f64::MAX,
            in_flight: 0,
            s_rtt: None,
        }
    }

    pub fn cwnd_bytes(&self) -> usize {
        self.cwnd as usize
    }
}

impl Default for AckWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SendingScheduler for AckWindow {
    /// # Test
    ///
    /// ```
    /// use rtp_session::scheduler::{AckWindow, SendingScheduler, SendDecision};
    /// use std::time::{Duration, Instant};
    ///
    /// let mut sched = AckWindow::with_mss(1000);
    /// let now = Instant::now();
    ///
    /// assert_eq!(sched.poll_send(1000, now), SendDecision::Send);
    /// assert_eq!(sched.poll_send(1000, now), SendDecision::Send);
    /// assert_eq!(sched.poll_send(1000, now), SendDecision::Send);
    /// assert_eq!(sched.poll_send(1000, now), SendDecision::Send);
    ///
    /// // cwnd starts at 4 MSS; a 5th packet has to wait for an ACK.
    /// match sched.poll_send(1000, now) {
    ///     SendDecision::WaitUntil(_) => {},
    ///     SendDecision::Send => panic!("cwnd should be exhausted"),
    /// }
    /// ```
    fn poll_send(&mut self, size: usize, now: Instant) -> SendDecision {
        if self.in_flight + size <= self.cwnd_bytes() {
            self.in_flight += size;
            SendDecision::Send
        } else {
            SendDecision::WaitUntil(now + Duration::from_millis(10))
        }
    }

    fn on_ack(&mut self, acked_bytes: usize, rtt: Option<Duration>, _now: Instant) {
        self.in_flight = self.in_flight.saturating_sub(acked_bytes);

        if let Some(rtt) = rtt {
            let sample = rtt.as_secs_f64();
            self.s_rtt = Some(match self.s_rtt {
                Some(s_rtt) => s_rtt + RTT_ALPHA * (sample - s_rtt),
                None => sample,
            });
        }

        if self.cwnd < self.ssthresh {
            // slow start: one MSS per acknowledged segment.
            self.cwnd += self.mss as f64;
        } else {
            // congestion avoidance: roughly one MSS per RTT.
            self.cwnd += (self.mss as f64 * self.mss as f64) / self.cwnd;
        }
    }

    fn on_loss(&mut self, _now: Instant) {
        self.ssthresh = (self.cwnd * BETA).max(self.mss as f64 * 2.0);
        self.cwnd = self.ssthresh;
    }

    fn current_rate_bps(&self) -> Option<f64> {
        self.s_rtt
            .filter(|s_rtt| *s_rtt > 0.0)
            .map(|s_rtt| (self.cwnd * 8.0) / s_rtt)
    }
}
