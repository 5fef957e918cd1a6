//! Extended sequence number tracking.
//!
//! The RTP header carries only a 16-bit sequence number; everything above
//! the session database needs the unwrapped 64-bit extended form to reason
//! about ordering, gaps, and loss across a wraparound boundary.

/// Unwraps a stream of 16-bit sequence numbers into a monotonically
/// increasing 64-bit extended sequence number (ESN), per the cycle-count
/// algorithm described in RFC 3550 Appendix A.1.
#[derive(Debug, Clone)]
pub struct ExtendedSeqTracker {
    max_seq: u16,
    cycles: u64,
    initialized: bool,
}

/// Half of the 16-bit sequence space; a forward jump larger than this is
/// treated as a wrap rather than a reorder.
const MAX_DROPOUT: u16 = 3000;
const MAX_MISORDER: u16 = 100;

impl Default for ExtendedSeqTracker {
    fn default() -> Self {
        Self {
            max_seq: 0,
            cycles: 0,
            initialized: false,
        }
    }
}

impl ExtendedSeqTracker {
    /// Feeds one observed 16-bit sequence number and returns its extended
    /// 64-bit form.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_wire::esn::ExtendedSeqTracker;
    ///
    /// let mut tracker = ExtendedSeqTracker::default();
    /// assert_eq!(tracker.update(65534), 65534);
    /// assert_eq!(tracker.update(65535), 65535);
    /// assert_eq!(tracker.update(0), 65536);
    /// assert_eq!(tracker.update(1), 65537);
    /// ```
    pub fn update(&mut self, seq: u16) -> u64 {
        if !self.initialized {
            self.initialized = true;
            self.max_seq = seq;
            return seq as u64;
        }

        let delta = seq.wrapping_sub(self.max_seq);

        if delta < MAX_DROPOUT {
            if seq < self.max_seq {
                // sequence number wrapped around 65535 -> 0.
                self.cycles += 1;
            }
            self.max_seq = seq;
        } else if delta > (0u16.wrapping_sub(MAX_MISORDER)) {
            // late packet from before a wrap, or a very old duplicate; do
            // not advance max_seq, just compute its extended value against
            // the current cycle count (or the previous one, if it looks
            // like it arrived just after we counted a wrap).
            let cycles = if seq > self.max_seq && self.cycles > 0 {
                self.cycles - 1
            } else {
                self.cycles
            };
            return (cycles << 16) | seq as u64;
        }

        (self.cycles << 16) | seq as u64
    }

    /// Highest extended sequence number observed so far.
    pub fn max_extended(&self) -> u64 {
        (self.cycles << 16) | self.max_seq as u64
    }
}

/// Compares two extended sequence numbers, returning true if `a` is
/// strictly newer than `b`. Extended sequence numbers never wrap in
/// practice (64 bits), so this is plain integer comparison, kept as a
/// named function so call sites read like an ordering decision rather
/// than an arithmetic one.
pub fn is_newer(a: u64, b: u64) -> bool {
    a > b
}
