//! Per-SSRC member state, the session database's unit of bookkeeping.
//!
//! The sequence-number validity state machine below follows RFC 3550
//! Appendix A.1 directly rather than going through [`rtp_wire::esn`]: the
//! algorithm needs `base_seq`/`bad_seq`/probation bookkeeping interleaved
//! with the cycle count in a way that doesn't factor cleanly through a
//! general-purpose unwrapper.

/// Lifecycle state of one SSRC inside a session, per RFC 3550 Appendix A.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Heard only via RTCP so far, or mid-probation; not yet validated by
    /// two consecutive well-formed RTP packets.
    Unvalidated,
    /// Validated: safe to treat its sequence-number stream and jitter
    /// estimate as authoritative.
    Validated,
    /// Received a BYE or timed out; kept around briefly so that late
    /// packets for the same SSRC are not mistaken for a collision.
    Leaving,
}

const MIN_SEQUENTIAL: u8 = 2;
const RTP_SEQ_MOD: u32 = 1 << 16;
const MAX_DROPOUT: u32 = 3000;
const MAX_MISORDER: u32 = 100;

/// All state the session database tracks for one remote SSRC.
#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub ssrc: u32,
    pub state: MemberState,
    probation: u8,
    max_seq: u16,
    cycles: u32,
    base_seq: u32,
    bad_seq: u32,
    pub received: u64,
    expected_prior: u64,
    received_prior: u64,
    /// Interarrival jitter estimate, RFC 3550 §6.4.1 (RTP timestamp units).
    pub jitter: f64,
    last_transit: Option<i64>,
    pub last_sr_ntp_middle_32: u32,
    pub last_sr_arrival: Option<std::time::Instant>,
    pub cname: Option<String>,
    pub last_activity: std::time::Instant,
}

impl MemberEntry {
    pub fn new(ssrc: u32, seq: u16, now: std::time::Instant) -> Self {
        Self {
            ssrc,
            state: MemberState::Unvalidated,
            probation: MIN_SEQUENTIAL,
            max_seq: seq,
            cycles: 0,
            base_seq: seq as u32,
            bad_seq: RTP_SEQ_MOD + 1,
            received: 0,
            expected_prior: 0,
            received_prior: 0,
            jitter: 0.0,
            last_transit: None,
            last_sr_ntp_middle_32: 0,
            last_sr_arrival: None,
            cname: None,
            last_activity: now,
        }
    }

    /// Feeds one received RTP sequence number through the RFC 3550 A.1
    /// validity/probation state machine. Returns `true` if the packet
    /// should be accepted into the member's ordered stream.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::member::MemberEntry;
    /// use std::time::Instant;
    ///
    /// let mut member = MemberEntry::new(1, 100, Instant::now());
    /// assert!(!member.update_sequence(101)); // still on probation
    /// assert!(member.update_sequence(102));  // validated now
    /// assert!(member.update_sequence(103));
    /// ```
    pub fn update_sequence(&mut self, seq: u16) -> bool {
        if self.probation > 0 {
            if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;

                if self.probation == 0 {
                    self.init_seq(seq);
                    self.state = MemberState::Validated;
                    self.received += 1;
                    return true;
                }
                return false;
            } else {
                self.probation = MIN_SEQUENTIAL - 1;
                self.max_seq = seq;
                return false;
            }
        }

        let delta = seq.wrapping_sub(self.max_seq) as u32;

        if delta < MAX_DROPOUT {
            if seq < self.max_seq {
                self.cycles += RTP_SEQ_MOD;
            }
            self.max_seq = seq;
            self.received += 1;
            true
        } else if delta <= RTP_SEQ_MOD - MAX_MISORDER {
            let extended_bad = (self.cycles.wrapping_sub(RTP_SEQ_MOD)) | seq as u32;
            if extended_bad == self.bad_seq {
                // two misordered packets in a row from the same place:
                // assume the source restarted with a new sequence space.
                self.init_seq(seq);
                self.state = MemberState::Unvalidated;
                self.probation = MIN_SEQUENTIAL - 1;
            } else {
                self.bad_seq = (seq as u32 + 1) & (RTP_SEQ_MOD - 1);
            }
            false
        } else {
            // duplicate or a very late packet from before a wrap.
            self.received += 1;
            true
        }
    }

    fn init_seq(&mut self, seq: u16) {
        self.max_seq = seq;
        self.cycles = 0;
        self.base_seq = seq as u32;
        self.bad_seq = RTP_SEQ_MOD + 1;
        self.received = 0;
        self.expected_prior = 0;
        self.received_prior = 0;
    }

    pub fn extended_max_seq(&self) -> u64 {
        (self.cycles as u64) + self.max_seq as u64
    }

    /// Updates the interarrival jitter estimate (RFC 3550 §6.4.1):
    /// `J += (|D| - J) / 16` where `D` is the difference between packet
    /// spacing as measured by the RTP timestamp and as measured by the
    /// receiver's wallclock (also expressed in RTP timestamp units).
    pub fn update_jitter(&mut self, rtp_timestamp: u32, arrival_ticks: u32) {
        let transit = arrival_ticks.wrapping_sub(rtp_timestamp) as i64;

        if let Some(prev_transit) = self.last_transit {
            let d = (transit - prev_transit).unsigned_abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }

        self.last_transit = Some(transit);
    }

    /// Fraction lost and cumulative lost, for a Receiver Report block
    /// (RFC 3550 §6.4.1), computed against the interval since the last
    /// report.
    pub fn loss_since_last_report(&mut self) -> (u8, u32) {
        let extended_max = self.extended_max_seq();
        let expected = extended_max - self.base_seq as u64 + 1;
        let lost = expected.saturating_sub(self.received);

        let expected_interval = expected - self.expected_prior;
        let received_interval = self.received - self.received_prior;
        let lost_interval = expected_interval.saturating_sub(received_interval);

        self.expected_prior = expected;
        self.received_prior = self.received;

        let fraction = if expected_interval == 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval) as u8
        };

        (fraction, lost.min(0x00ff_ffff) as u32)
    }

    pub fn mark_leaving(&mut self) {
        self.state = MemberState::Leaving;
    }

    pub fn touch(&mut self, now: std::time::Instant) {
        self.last_activity = now;
    }
}
