//! MPRTP cross-path RTO estimator: each subflow has its own RTT/jitter
//! characteristics, so a packet missing on one subflow is only "late"
//! relative to that subflow's own timing until we've learned enough to
//! reason about it relative to the fastest subflow instead.
//!
//! Three-state learning machine:
//!
//! - `LearnFlowOrder`: tally, per ESN, which registered subflow delivers
//!   its copy first; after enough samples, the flow winning most often is
//!   adopted as the fastest flow.
//! - `LearnPathDifference`: once the fastest flow is known, learn each
//!   other flow's typical arrival delta relative to it (`Δ_cross`) via one
//!   [`GapPredictor`] per flow.
//! - `Running`: schedule a flow's timeout off the fastest flow's arrival
//!   plus that flow's learned `Δ_cross + k·σ`, instead of the flow's own
//!   (noisier, single-path) interarrival statistics.
//!
//! Every state keeps a per-flow [`BasicRtoEstimator`] running as a
//! fallback, since the fastest flow never gets a `Δ_cross` predictor of
//! its own and a session with only one active subflow never leaves
//! `LearnFlowOrder`.

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use ahash::HashMap;

use super::basic::{BasicRtoEstimator, LossEvent};
use super::predictor::GapPredictor;
use crate::mprtp::subflow::FlowId;

/// ESNs observed before a fastest flow is picked.
const LEARN_FLOW_ORDER_SAMPLES: u32 = 50;
/// `Δ_cross` samples collected per non-fastest flow before trusting it.
const LEARN_PATH_DIFFERENCE_SAMPLES: u32 = 50;
const DEFAULT_K: f64 = 3.0;

enum State {
    LearnFlowOrder { samples: u32 },
    LearnPathDifference { samples: u32 },
    Running,
}

pub struct CrossPathRtoEstimator {
    predictor_factory: fn() -> Box<dyn GapPredictor>,
    state: State,
    /// Subflow this ESN's remote source is associated with, set on first
    /// arrival; this estimator assumes one remote media SSRC's subflows.
    remote_ssrc: Option<u32>,
    per_flow: HashMap<FlowId, BasicRtoEstimator>,
    /// Tally of which flow delivered each observed ESN first.
    flow_first_counts: HashMap<FlowId, u32>,
    fastest_flow: Option<FlowId>,
    /// Fastest flow's arrival instant per in-flight ESN, kept only long
    /// enough for the other flows' copies to show up and be diffed.
    fastest_arrivals: HashMap<u64, Instant>,
    delta_predictors: HashMap<FlowId, Box<dyn GapPredictor>>,
    /// `(flow, esn)` we're waiting on, running-state only.
    pending: HashMap<(FlowId, u64), Instant>,
    declared_lost: HashSet<(FlowId, u64)>,
    k: f64,
}

impl CrossPathRtoEstimator {
    pub fn new(predictor_factory: fn() -> Box<dyn GapPredictor>) -> Self {
        Self {
            predictor_factory,
            state: State::LearnFlowOrder { samples: 0 },
            remote_ssrc: None,
            per_flow: HashMap::default(),
            flow_first_counts: HashMap::default(),
            fastest_flow: None,
            fastest_arrivals: HashMap::default(),
            delta_predictors: HashMap::default(),
            pending: HashMap::default(),
            declared_lost: HashSet::new(),
            k: DEFAULT_K,
        }
    }

    fn estimator_mut(&mut self, flow: FlowId) -> &mut BasicRtoEstimator {
        self.per_flow
            .entry(flow)
            .or_insert_with(|| BasicRtoEstimator::new((self.predictor_factory)()))
    }

    /// Feeds one subflow's arrival of extended sequence number `esn` for
    /// `ssrc`. A packet arriving from a different SSRC than the one this
    /// estimator has locked onto is ignored — this estimator tracks a
    /// single remote source's multipath stream.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::loss::crosspath::CrossPathRtoEstimator;
    /// use rtp_session::loss::predictor::MovingAverage;
    /// use rtp_session::mprtp::subflow::FlowId;
    /// use std::time::{Duration, Instant};
    ///
    /// let mut est = CrossPathRtoEstimator::new(|| Box::new(MovingAverage::new(0.2)));
    /// let t0 = Instant::now();
    /// est.on_packet_arrival(FlowId(0), t0, 1, 0xaaaa);
    /// est.on_packet_arrival(FlowId(0), t0 + Duration::from_millis(20), 2, 0xaaaa);
    /// assert!(est.check_timeouts(t0 + Duration::from_millis(25)).is_empty());
    /// ```
    pub fn on_packet_arrival(
        &mut self,
        flow: FlowId,
        now: Instant,
        esn: u64,
        ssrc: u32,
    ) -> Vec<LossEvent> {
        if *self.remote_ssrc.get_or_insert(ssrc) != ssrc {
            return Vec::new();
        }

        // Once running and a flow has a trusted Δ_cross predictor, its
        // timer comes from the fastest flow's arrivals below rather than
        // its own single-path interarrival statistics, so its fallback
        // estimator is left untouched to avoid scheduling a second,
        // redundant timeout for the same ESN.
        let uses_cross_path_timing = matches!(self.state, State::Running)
            && Some(flow) != self.fastest_flow
            && self.delta_predictors.contains_key(&flow);

        let mut events = if uses_cross_path_timing {
            Vec::new()
        } else {
            self.estimator_mut(flow).on_packet_arrival(now, esn)
        };

        self.pending.remove(&(flow, esn));
        if self.declared_lost.remove(&(flow, esn)) {
            events.push(LossEvent::FalsePositive(esn));
        }

        match self.state {
            State::LearnFlowOrder { mut samples } => {
                if !self.flow_seen_for(esn) {
                    *self.flow_first_counts.entry(flow).or_insert(0) += 1;
                    self.fastest_arrivals.insert(esn, now);
                    samples += 1;
                }

                if samples >= LEARN_FLOW_ORDER_SAMPLES {
                    self.fastest_flow = self
                        .flow_first_counts
                        .iter()
                        .max_by_key(|(_, count)| **count)
                        .map(|(flow, _)| *flow);
                    self.fastest_arrivals.clear();
                    self.state = State::LearnPathDifference { samples: 0 };
                } else {
                    self.state = State::LearnFlowOrder { samples };
                }
            }
            State::LearnPathDifference { mut samples } => {
                if Some(flow) == self.fastest_flow {
                    self.fastest_arrivals.insert(esn, now);
                } else if let Some(&fastest_at) = self.fastest_arrivals.get(&esn) {
                    let delta_millis = now.saturating_duration_since(fastest_at).as_secs_f64() * 1000.0;
                    self.delta_predictors
                        .entry(flow)
                        .or_insert_with(|| (self.predictor_factory)())
                        .insert(delta_millis);
                    samples += 1;
                }

                if samples >= LEARN_PATH_DIFFERENCE_SAMPLES {
                    self.state = State::Running;
                } else {
                    self.state = State::LearnPathDifference { samples };
                }
            }
            State::Running => {
                if Some(flow) == self.fastest_flow {
                    self.fastest_arrivals.insert(esn, now);
                    self.fastest_arrivals.retain(|k, _| *k + 64 > esn || *k >= esn);
                } else if let Some(predictor) = self.delta_predictors.get(&flow) {
                    if let Some(mu) = predictor.predict() {
                        let sigma = predictor.error_stddev().unwrap_or(0.0);
                        let deadline = Duration::from_secs_f64(((mu + self.k * sigma).max(0.0)) / 1000.0);
                        self.pending.insert((flow, esn + 1), now + deadline);
                    }
                }
            }
        }

        events
    }

    fn flow_seen_for(&self, esn: u64) -> bool {
        self.fastest_arrivals.contains_key(&esn)
    }

    pub fn remote_ssrc(&self) -> Option<u32> {
        self.remote_ssrc
    }

    pub fn on_rtx_requested(&mut self, now: Instant, flow: FlowId, esn: u64) {
        self.estimator_mut(flow).on_rtx_requested(now, esn);
    }

    pub fn on_rtx_arrival(&mut self, now: Instant, flow: FlowId, esn: u64) -> (Option<Duration>, bool) {
        self.pending.remove(&(flow, esn));
        let cross_lost = self.declared_lost.remove(&(flow, esn));
        let (latency, single_path_lost) = self.estimator_mut(flow).on_rtx_arrival(now, esn);
        (latency, cross_lost || single_path_lost)
    }

    /// Expires every `Running`-state cross-path timer due by `now`, and
    /// polls each flow's own fallback estimator for single-path timeouts.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<(FlowId, u64)> {
        let expired: Vec<(FlowId, u64)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            self.pending.remove(key);
            self.declared_lost.insert(*key);
        }

        let running = matches!(self.state, State::Running);
        let flows: Vec<FlowId> = self.per_flow.keys().copied().collect();
        let mut single_path_expired = Vec::new();
        for flow in flows {
            let uses_cross_path_timing =
                running && Some(flow) != self.fastest_flow && self.delta_predictors.contains_key(&flow);
            if uses_cross_path_timing {
                continue;
            }
            for esn in self.per_flow.get_mut(&flow).unwrap().check_timeouts(now) {
                single_path_expired.push((flow, esn));
            }
        }

        expired.into_iter().chain(single_path_expired).collect()
    }

    pub fn reset(&mut self) {
        for estimator in self.per_flow.values_mut() {
            estimator.reset();
        }
        self.state = State::LearnFlowOrder { samples: 0 };
        self.remote_ssrc = None;
        self.flow_first_counts.clear();
        self.fastest_flow = None;
        self.fastest_arrivals.clear();
        self.delta_predictors.clear();
        self.pending.clear();
        self.declared_lost.clear();
    }
}
