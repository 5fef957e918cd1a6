//! Single-path loss detector / RTO estimator: predicts the next packet's
//! arrival from the recent interarrival-gap history, and declares a
//! sequence number lost when a timer set at `arrival + μ + k·σ` fires
//! before it shows up.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use super::predictor::GapPredictor;

/// Default multiplier on the predictor's error standard deviation, giving
/// roughly a 1% false-positive tail under a near-Gaussian gap distribution.
const DEFAULT_K: f64 = 3.0;

/// A run of this many consecutive declared-lost ESNs resets the predictor,
/// so a stalled or dead source doesn't drive it into a degenerate state.
const MAX_CONSECUTIVE_LOSSES: u32 = 32;

/// Notification surfaced by the estimator for the session to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossEvent {
    /// The timer for this ESN fired before it arrived.
    Lost(u64),
    /// This ESN arrived after already being declared lost (or after an
    /// explicit retransmission was requested for it) — a prediction that
    /// turned out too aggressive, or a retransmission landing late.
    FalsePositive(u64),
}

/// Tracks one source's interarrival-gap predictor and the single
/// outstanding "declare it lost" timer per ESN still in flight.
pub struct BasicRtoEstimator {
    predictor: Box<dyn GapPredictor>,
    k: f64,
    last_arrival: Option<(u64, Instant)>,
    /// ESN we're waiting on → the instant at which it should be declared
    /// lost if it still hasn't arrived.
    pending: HashMap<u64, Instant>,
    /// ESNs already declared lost, so a subsequent arrival (or explicit
    /// retransmission) can be recognized as a false positive.
    declared_lost: HashSet<u64>,
    /// ESN → when a retransmission was requested for it, to support
    /// retransmission-latency accounting when it arrives.
    rtx_requested_at: HashMap<u64, Instant>,
    consecutive_losses: u32,
}

impl BasicRtoEstimator {
    pub fn new(predictor: Box<dyn GapPredictor>) -> Self {
        Self::with_k(predictor, DEFAULT_K)
    }

    pub fn with_k(predictor: Box<dyn GapPredictor>, k: f64) -> Self {
        Self {
            predictor,
            k,
            last_arrival: None,
            pending: HashMap::new(),
            declared_lost: HashSet::new(),
            rtx_requested_at: HashMap::new(),
            consecutive_losses: 0,
        }
    }

    /// Feeds one packet's arrival at extended sequence number `esn`:
    /// folds its interarrival gap into the predictor (normalized by the
    /// ESN gap, so a run of losses doesn't corrupt the spacing estimate),
    /// cancels any outstanding timer for it, and schedules the timer for
    /// `esn + 1` at `now + μ + k·σ`.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::loss::basic::BasicRtoEstimator;
    /// use rtp_session::loss::predictor::MovingAverage;
    /// use std::time::{Duration, Instant};
    ///
    /// let mut est = BasicRtoEstimator::new(Box::new(MovingAverage::new(0.5)));
    /// let t0 = Instant::now();
    /// est.on_packet_arrival(t0, 1);
    /// est.on_packet_arrival(t0 + Duration::from_millis(20), 2);
    ///
    /// // the predictor now has one gap sample; a timer for ESN 3 exists.
    /// assert!(est.check_timeouts(t0 + Duration::from_millis(21)).is_empty());
    /// ```
    pub fn on_packet_arrival(&mut self, now: Instant, esn: u64) -> Vec<LossEvent> {
        let mut events = Vec::new();

        self.pending.remove(&esn);
        self.rtx_requested_at.remove(&esn);
        if self.declared_lost.remove(&esn) {
            events.push(LossEvent::FalsePositive(esn));
        }

        if let Some((last_esn, last_arrival)) = self.last_arrival {
            if esn > last_esn {
                let sn_gap = (esn - last_esn) as f64;
                let elapsed_millis = now.saturating_duration_since(last_arrival).as_secs_f64() * 1000.0;
                self.predictor.insert(elapsed_millis / sn_gap.max(1.0));
                self.consecutive_losses = 0;
            }
        }

        if self.last_arrival.is_none_or(|(last_esn, _)| esn >= last_esn) {
            self.last_arrival = Some((esn, now));
        }

        self.schedule_next(esn, now);
        events
    }

    /// Records that a retransmission was requested for `esn`, so its
    /// eventual arrival can report the round-trip latency of the request.
    pub fn on_rtx_requested(&mut self, now: Instant, esn: u64) {
        self.rtx_requested_at.insert(esn, now);
    }

    /// Feeds the arrival of an explicit retransmission for `esn`. Returns
    /// the retransmission latency if one had been requested, and whether
    /// this arrival turned out to be a late original (i.e. `esn` had
    /// already been declared lost).
    pub fn on_rtx_arrival(&mut self, now: Instant, esn: u64) -> (Option<Duration>, bool) {
        self.pending.remove(&esn);
        let was_lost = self.declared_lost.remove(&esn);
        let latency = self
            .rtx_requested_at
            .remove(&esn)
            .map(|requested_at| now.saturating_duration_since(requested_at));
        (latency, was_lost)
    }

    fn schedule_next(&mut self, esn: u64, now: Instant) {
        let Some(mu) = self.predictor.predict() else {
            return;
        };
        let sigma = self.predictor.error_stddev().unwrap_or(0.0);
        let deadline_millis = (mu + self.k * sigma).max(0.0);
        self.pending.insert(esn + 1, now + Duration::from_secs_f64(deadline_millis / 1000.0));
    }

    /// Expires every timer due by `now`, declaring the corresponding ESNs
    /// lost and rescheduling the timer for the one after it so a run of
    /// losses keeps producing predictions instead of going silent.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<u64> {
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(esn, _)| *esn)
            .collect();

        for esn in &expired {
            self.pending.remove(esn);
            self.declared_lost.insert(*esn);
            self.consecutive_losses += 1;
            self.schedule_next(*esn, now);
        }

        if self.consecutive_losses >= MAX_CONSECUTIVE_LOSSES {
            self.reset();
        }

        expired
    }

    /// Clears all predictor and timer state, per the reset conditions in
    /// the loss-detector contract (BYE, a runaway loss streak, or a fresh
    /// source with no prior history).
    pub fn reset(&mut self) {
        self.predictor.reset();
        self.last_arrival = None;
        self.pending.clear();
        self.declared_lost.clear();
        self.rtx_requested_at.clear();
        self.consecutive_losses = 0;
    }
}
