//! Loss detection and RTO estimation (single-path and MPRTP cross-path).

pub mod basic;
pub mod crosspath;
pub mod predictor;

use ahash::HashMap;
use std::time::Instant;

pub use basic::{BasicRtoEstimator, LossEvent};
pub use crosspath::CrossPathRtoEstimator;
pub use predictor::{Ar2Predictor, GapPredictor, MovingAverage};

/// Fans a [`BasicRtoEstimator`] out per remote SSRC, so one source's burst
/// of losses doesn't skew another's interarrival statistics. Mirrors
/// [`CrossPathRtoEstimator`]'s per-`FlowId` fan-out, keyed by SSRC instead.
pub struct LossDetector {
    predictor_factory: fn() -> Box<dyn GapPredictor>,
    per_ssrc: HashMap<u32, BasicRtoEstimator>,
}

impl LossDetector {
    pub fn new(predictor_factory: fn() -> Box<dyn GapPredictor>) -> Self {
        Self {
            predictor_factory,
            per_ssrc: HashMap::default(),
        }
    }

    fn estimator_mut(&mut self, ssrc: u32) -> &mut BasicRtoEstimator {
        self.per_ssrc
            .entry(ssrc)
            .or_insert_with(|| BasicRtoEstimator::new((self.predictor_factory)()))
    }

    pub fn on_packet_arrival(&mut self, ssrc: u32, now: Instant, esn: u64) -> Vec<LossEvent> {
        self.estimator_mut(ssrc).on_packet_arrival(now, esn)
    }

    pub fn on_rtx_requested(&mut self, ssrc: u32, now: Instant, esn: u64) {
        self.estimator_mut(ssrc).on_rtx_requested(now, esn);
    }

    pub fn on_rtx_arrival(
        &mut self,
        ssrc: u32,
        now: Instant,
        esn: u64,
    ) -> (Option<std::time::Duration>, bool) {
        self.estimator_mut(ssrc).on_rtx_arrival(now, esn)
    }

    /// Polls every tracked source's timer, returning `(ssrc, esn)` pairs
    /// newly declared lost.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<(u32, u64)> {
        let mut expired = Vec::new();
        for (ssrc, estimator) in self.per_ssrc.iter_mut() {
            for esn in estimator.check_timeouts(now) {
                expired.push((*ssrc, esn));
            }
        }
        expired
    }

    /// Resets a source's predictor state, e.g. on BYE or member eviction.
    pub fn remove(&mut self, ssrc: u32) {
        self.per_ssrc.remove(&ssrc);
    }
}
