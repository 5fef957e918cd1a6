//! Playout (jitter) buffer: reorders arriving RTP packets, groups them by
//! presentation instant, and releases each group to the application once
//! its playout deadline has passed.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

/// One buffered packet awaiting playout.
#[derive(Debug, Clone)]
pub struct PlayoutBufferNode {
    pub sequence_number: u64,
    pub rtp_timestamp: u32,
    pub arrival: Instant,
    pub payload: Vec<u8>,
}

/// Every buffered packet sharing one presentation instant (i.e. the same
/// RTP timestamp — a video frame split across several packets, or a single
/// audio frame), released to the application together.
#[derive(Debug, Clone)]
pub struct RtpPacketGroup {
    pub presentation_instant: Instant,
    pub packets: Vec<PlayoutBufferNode>,
}

/// Bounded ring of recently seen extended sequence numbers, so a duplicate
/// of an ESN already delivered (not just one still queued) is still caught
/// once it has left the queue.
const DUPLICATE_HISTORY_CAP: usize = 256;

struct DuplicateHistory {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

impl DuplicateHistory {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, esn: u64) -> bool {
        self.seen.contains(&esn)
    }

    fn record(&mut self, esn: u64) {
        if self.seen.insert(esn) {
            self.order.push_back(esn);
            if self.order.len() > DUPLICATE_HISTORY_CAP {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
    }
}

/// Strategy for deciding when a buffered packet is due for playout.
/// Two variants are shipped, matching the two jitter buffer designs carried
/// by the reference system: a simple delay-since-arrival buffer, and a
/// PTS-based buffer that tracks a running estimate of the source's media
/// clock against the local wallclock and compensates for clock drift.
pub trait PlayoutBuffer: Send {
    /// Inserts a newly arrived packet. Returns `(playout_deadline,
    /// late_ms, duplicate)`: the instant this packet is due for release,
    /// how many milliseconds past that deadline `now` already is (0 if not
    /// late), and whether this ESN had already been seen (still queued, or
    /// in the bounded recent-history ring) — a duplicate is not queued a
    /// second time.
    fn insert(&mut self, node: PlayoutBufferNode, now: Instant) -> (Instant, u64, bool);

    /// Removes and returns the next presentation-instant group whose
    /// deadline has passed as of `now`, if any.
    fn next_due(&mut self, now: Instant) -> Option<RtpPacketGroup>;

    /// Number of packets currently buffered.
    fn len(&self) -> usize;

    /// Removes and returns every packet whose playout deadline has passed
    /// as of `now`, in presentation order.
    fn drain_ready(&mut self, now: Instant) -> Vec<PlayoutBufferNode> {
        let mut out = Vec::new();
        while let Some(group) = self.next_due(now) {
            out.extend(group.packets);
        }
        out
    }
}

/// `V1_perkins`: releases a packet once it has sat in the buffer for a
/// fixed delay, independent of its RTP timestamp. Simple and robust but
/// does not compensate for inter-packet clock drift.
pub struct V1Perkins {
    target_delay: Duration,
    queue: BTreeMap<u64, PlayoutBufferNode>,
    history: DuplicateHistory,
}

impl V1Perkins {
    pub fn new(target_delay: Duration) -> Self {
        Self {
            target_delay,
            queue: BTreeMap::new(),
            history: DuplicateHistory::new(),
        }
    }

    fn deadline(&self, node: &PlayoutBufferNode) -> Instant {
        node.arrival + self.target_delay
    }
}

impl PlayoutBuffer for V1Perkins {
    fn insert(&mut self, node: PlayoutBufferNode, now: Instant) -> (Instant, u64, bool) {
        let esn = node.sequence_number;
        let deadline = self.deadline(&node);
        let late_ms = now.saturating_duration_since(deadline).as_millis() as u64;

        if self.queue.contains_key(&esn) || self.history.contains(esn) {
            return (deadline, late_ms, true);
        }

        self.history.record(esn);
        self.queue.insert(esn, node);
        (deadline, late_ms, false)
    }

    fn next_due(&mut self, now: Instant) -> Option<RtpPacketGroup> {
        let (&seq, first) = self.queue.iter().next()?;
        let deadline = self.deadline(first);
        if deadline > now {
            return None;
        }
        let rtp_timestamp = first.rtp_timestamp;

        let mut group_seqs = vec![seq];
        for (&other_seq, other_node) in self.queue.range((seq + 1)..) {
            if other_node.rtp_timestamp != rtp_timestamp {
                break;
            }
            group_seqs.push(other_seq);
        }

        let packets = group_seqs.iter().filter_map(|s| self.queue.remove(s)).collect();
        Some(RtpPacketGroup { presentation_instant: deadline, packets })
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// `V2_pts_based`: derives each packet's playout deadline from its RTP
/// timestamp mapped through a running estimate of the relationship between
/// the sender's media clock and the receiver's wallclock, established from
/// the first packet seen. This is the default (see design notes): it keeps
/// playout spacing faithful to the original encoder's pacing instead of
/// just "arrived + fixed delay".
pub struct V2PtsBased {
    clock_rate: u32,
    latency: Duration,
    queue: BTreeMap<u64, PlayoutBufferNode>,
    anchor: Option<(u32, Instant)>,
    history: DuplicateHistory,
}

impl V2PtsBased {
    pub fn new(clock_rate: u32, latency: Duration) -> Self {
        Self {
            clock_rate,
            latency,
            queue: BTreeMap::new(),
            anchor: None,
            history: DuplicateHistory::new(),
        }
    }

    fn deadline(&mut self, rtp_timestamp: u32, arrival: Instant) -> Instant {
        let (anchor_ts, anchor_time) = *self.anchor.get_or_insert((rtp_timestamp, arrival));
        let ticks_since_anchor = rtp_timestamp.wrapping_sub(anchor_ts);
        let media_elapsed = Duration::from_secs_f64(ticks_since_anchor as f64 / self.clock_rate as f64);
        anchor_time + media_elapsed + self.latency
    }
}

impl PlayoutBuffer for V2PtsBased {
    fn insert(&mut self, node: PlayoutBufferNode, now: Instant) -> (Instant, u64, bool) {
        let esn = node.sequence_number;
        let deadline = self.deadline(node.rtp_timestamp, node.arrival);
        let late_ms = now.saturating_duration_since(deadline).as_millis() as u64;

        if self.queue.contains_key(&esn) || self.history.contains(esn) {
            return (deadline, late_ms, true);
        }

        self.history.record(esn);
        self.queue.insert(esn, node);
        (deadline, late_ms, false)
    }

    fn next_due(&mut self, now: Instant) -> Option<RtpPacketGroup> {
        let seqs: Vec<u64> = self.queue.keys().copied().collect();
        let mut remaining = seqs.into_iter();
        let first_seq = remaining.next()?;
        let first = self.queue.get(&first_seq).expect("key from own keys()").clone();
        let deadline = self.deadline(first.rtp_timestamp, first.arrival);
        if deadline > now {
            return None;
        }

        let mut group_seqs = vec![first_seq];
        for seq in remaining {
            let node = self.queue.get(&seq).expect("key from own keys()");
            if node.rtp_timestamp != first.rtp_timestamp {
                break;
            }
            group_seqs.push(seq);
        }

        let packets = group_seqs.iter().filter_map(|s| self.queue.remove(s)).collect();
        Some(RtpPacketGroup { presentation_instant: deadline, packets })
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
