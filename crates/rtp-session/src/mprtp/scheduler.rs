//! MPRTP path scheduling: which subflow should carry the next outgoing
//! packet.

use rand::Rng;

use super::subflow::{FlowId, Subflow};

/// A strategy for picking which active subflow carries the next packet.
/// All five variants named by the reference system's MPRTP translator are
/// implemented behind this one trait.
pub trait PathScheduler: Send {
    fn select<'a>(&mut self, subflows: &'a [Subflow]) -> Option<&'a Subflow>;
}

/// Cycles through active subflows in a fixed order, one packet each.
#[derive(Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl PathScheduler for RoundRobin {
    fn select<'a>(&mut self, subflows: &'a [Subflow]) -> Option<&'a Subflow> {
        let active: Vec<&Subflow> = subflows.iter().filter(|s| s.active).collect();
        if active.is_empty() {
            return None;
        }

        let picked = active[self.cursor % active.len()];
        self.cursor = self.cursor.wrapping_add(1);
        Some(picked)
    }
}

/// Repeats a fixed, caller-supplied pattern of flow ids (e.g. `[0, 0, 1]`
/// to send two of every three packets on flow 0).
pub struct FixedPattern {
    pattern: Vec<FlowId>,
    cursor: usize,
}

impl FixedPattern {
    pub fn new(pattern: Vec<FlowId>) -> Self {
        assert!(!pattern.is_empty());
        Self { pattern, cursor: 0 }
    }
}

impl PathScheduler for FixedPattern {
    fn select<'a>(&mut self, subflows: &'a [Subflow]) -> Option<&'a Subflow> {
        for _ in 0..self.pattern.len() {
            let want = self.pattern[self.cursor % self.pattern.len()];
            self.cursor = self.cursor.wrapping_add(1);

            if let Some(flow) = subflows.iter().find(|s| s.id == want && s.active) {
                return Some(flow);
            }
        }

        subflows.iter().find(|s| s.active)
    }
}

/// Picks a uniformly random active subflow for each packet.
#[derive(Default)]
pub struct Random;

impl PathScheduler for Random {
    fn select<'a>(&mut self, subflows: &'a [Subflow]) -> Option<&'a Subflow> {
        let active: Vec<&Subflow> = subflows.iter().filter(|s| s.active).collect();
        if active.is_empty() {
            return None;
        }

        let idx = rand::rng().random_range(0..active.len());
        Some(active[idx])
    }
}

/// Distributes packets across active subflows proportionally to a set of
/// fixed weights, using a deficit-round-robin-style accumulator so the
/// long-run ratio converges to the configured weights even with a small
/// packet count.
pub struct Distributed {
    weights: Vec<(FlowId, f64)>,
    deficits: Vec<f64>,
}

impl Distributed {
    pub fn new(weights: Vec<(FlowId, f64)>) -> Self {
        let deficits = vec![0.0; weights.len()];
        Self { weights, deficits }
    }
}

impl PathScheduler for Distributed {
    fn select<'a>(&mut self, subflows: &'a [Subflow]) -> Option<&'a Subflow> {
        for (deficit, (_, weight)) in self.deficits.iter_mut().zip(self.weights.iter()) {
            *deficit += weight;
        }

        let mut best_idx = None;
        let mut best_deficit = f64::MIN;
        for (i, ((flow_id, _), deficit)) in self.weights.iter().zip(self.deficits.iter()).enumerate() {
            if *deficit > best_deficit && subflows.iter().any(|s| s.id == *flow_id && s.active) {
                best_deficit = *deficit;
                best_idx = Some(i);
            }
        }

        let idx = best_idx?;
        self.deficits[idx] -= 1.0;
        let flow_id = self.weights[idx].0;
        subflows.iter().find(|s| s.id == flow_id && s.active)
    }
}

/// Always picks the active subflow with the lowest measured RTT, falling
/// back to any active subflow if none has an RTT sample yet.
#[derive(Default)]
pub struct SmallestRtt;

impl PathScheduler for SmallestRtt {
    fn select<'a>(&mut self, subflows: &'a [Subflow]) -> Option<&'a Subflow> {
        subflows
            .iter()
            .filter(|s| s.active)
            .min_by(|a, b| match (a.last_rtt, b.last_rtt) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    }
}
