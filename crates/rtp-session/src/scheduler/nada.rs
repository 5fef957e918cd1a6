use std::time::{Duration, Instant};

use super::{SendDecision, SendingScheduler};

/// Minimum and maximum application rate bounds, ported from `RMIN_kbps`
/// and `RMAX_kbps` in the reference system's `experimental/Nada.h`.
const R_MIN_BPS: f64 = 150_000.0;
const R_MAX_BPS: f64 = 1_500_000.0;

/// An accelerated ramp-up gain, applied while the observed congestion
/// signal stays near zero so the rate can grow quickly from a cold start
/// before switching to the gentler gradual-update regime.
const ACCELERATED_GAIN: f64 = 1.25;
/// Gain used once congestion has been observed at least once, applied to
/// the gap between the current rate and the reference rate implied by the
/// aggregate congestion signal.
const GRADUAL_GAIN: f64 = 0.5;
/// Weight of delay-based congestion signal relative to the loss-based
/// component of the aggregate congestion signal `x_n`.
const DELAY_WEIGHT_MS: f64 = 1.0;
const LOSS_WEIGHT: f64 = 500.0;
const REFERENCE_DELAY_MS: f64 = 30.0;

/// A simplified NADA-style (Network-Assisted Dynamic Adaptation) rate
/// controller: the aggregate congestion signal `x_n` combines observed
/// one-way delay (via RTT/2 as a proxy, since a one-way delay measurement
/// isn't available without NTP-synchronized clocks between peers) and
/// recent loss, and the sending rate is adjusted toward a reference rate
/// derived from `x_n`.
pub struct NadaLike {
    rate_bps: f64,
    min_rate_bps: f64,
    max_rate_bps: f64,
    x_n: f64,
    has_seen_congestion: bool,
    last_update: Option<Instant>,
    bytes_since_last_send: f64,
}

impl NadaLike {
    pub fn new() -> Self {
        Self::with_bounds(R_MIN_BPS, R_MAX_BPS)
    }

    pub fn with_bounds(min_rate_bps: f64, max_rate_bps: f64) -> Self {
        Self {
            rate_bps: min_rate_bps,
            min_rate_bps,
            max_rate_bps,
            x_n: 0.0,
            has_seen_congestion: false,
            last_update: None,
            bytes_since_last_send: 0.0,
        }
    }

    fn update_rate(&mut self, rtt: Option<Duration>, loss_event: bool, now: Instant) {
        let delay_ms = rtt.map(|r| r.as_secs_f64() * 1000.0 / 2.0).unwrap_or(0.0);
        let loss_term = if loss_event { LOSS_WEIGHT } else { 0.0 };

        self.x_n = DELAY_WEIGHT_MS * (delay_ms - REFERENCE_DELAY_MS).max(0.0) + loss_term;
        self.has_seen_congestion |= self.x_n > 0.0;

        let reference_rate = if self.x_n <= 0.0 {
            self.max_rate_bps
        } else {
            (self.max_rate_bps / (1.0 + self.x_n / 100.0)).max(self.min_rate_bps)
        };

        let gain = if self.has_seen_congestion {
            GRADUAL_GAIN
        } else {
            ACCELERATED_GAIN
        };

        self.rate_bps += gain * (reference_rate - self.rate_bps) * 0.1;
        self.rate_bps = self.rate_bps.clamp(self.min_rate_bps, self.max_rate_bps);
        self.last_update = Some(now);
    }
}

impl Default for NadaLike {
    fn default() -> Self {
        Self::new()
    }
}

impl SendingScheduler for NadaLike {
    fn poll_send(&mut self, size: usize, now: Instant) -> SendDecision {
        self.bytes_since_last_send += size as f64;
        let spacing = Duration::from_secs_f64(self.bytes_since_last_send * 8.0 / self.rate_bps);

        match self.last_update {
            Some(last) if last + spacing > now => SendDecision::WaitUntil(last + spacing),
            _ => {
                self.bytes_since_last_send = 0.0;
                SendDecision::Send
            }
        }
    }

    fn on_ack(&mut self, _acked_bytes: usize, rtt: Option<Duration>, now: Instant) {
        self.update_rate(rtt, false, now);
    }

    fn on_loss(&mut self, now: Instant) {
        self.update_rate(None, true, now);
    }

    fn current_rate_bps(&self) -> Option<f64> {
        Some(self.rate_bps)
    }
}
