//! Feedback manager: accumulates NACK/ACK state to be flushed into the next
//! outgoing RTCP feedback message (RFC 4585), including the MPRTP extended
//! NACK variant that tags entries with the subflow they were lost on.

use ahash::HashMap;

use crate::mprtp::subflow::FlowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LossKey {
    pub ssrc: u32,
    pub flow: Option<FlowId>,
}

/// Packets pending a NACK, keyed by media SSRC (and, for MPRTP sessions,
/// by subflow too) so a single feedback manager instance serves both plain
/// and multipath sessions.
#[derive(Default)]
pub struct FeedbackManager {
    pending_nacks: HashMap<LossKey, Vec<u16>>,
    pending_acks: HashMap<u32, Vec<u16>>,
}

impl FeedbackManager {
    /// Registers a missing sequence number, to be reported in the next
    /// NACK feedback message for that SSRC (and subflow, if any).
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::feedback::{FeedbackManager, LossKey};
    ///
    /// let mut fb = FeedbackManager::default();
    /// fb.note_missing(LossKey { ssrc: 1, flow: None }, 42);
    /// fb.note_missing(LossKey { ssrc: 1, flow: None }, 43);
    ///
    /// let blocks = fb.drain_nack_blocks(LossKey { ssrc: 1, flow: None });
    /// assert_eq!(blocks.len(), 1);
    /// assert_eq!(blocks[0].pid, 42);
    /// ```
    pub fn note_missing(&mut self, key: LossKey, seq: u16) {
        let entry = self.pending_nacks.entry(key).or_default();
        if !entry.contains(&seq) {
            entry.push(seq);
        }
    }

    /// Drains pending missing-sequence entries for `key`, packed into the
    /// RFC 4585 §6.2.1 `(PID, BLP)` generic NACK form: one block per PID
    /// with a bitmask of up to 16 subsequent missing sequence numbers.
    pub fn drain_nack_blocks(&mut self, key: LossKey) -> Vec<rtp_wire::rtcp::GenericNack> {
        let mut seqs = self.pending_nacks.remove(&key).unwrap_or_default();
        seqs.sort_unstable();

        let mut blocks = Vec::new();
        let mut i = 0;
        while i < seqs.len() {
            let pid = seqs[i];
            let mut blp = 0u16;
            let mut j = i + 1;
            while j < seqs.len() && seqs[j].wrapping_sub(pid) <= 16 {
                blp |= 1 << (seqs[j].wrapping_sub(pid) - 1);
                j += 1;
            }
            blocks.push(rtp_wire::rtcp::GenericNack { pid, blp });
            i = j;
        }

        blocks
    }

    pub fn note_acked(&mut self, ssrc: u32, seq: u16) {
        self.pending_acks.entry(ssrc).or_default().push(seq);
    }

    pub fn drain_acks(&mut self, ssrc: u32) -> Vec<u16> {
        self.pending_acks.remove(&ssrc).unwrap_or_default()
    }

    pub fn has_pending(&self, key: LossKey) -> bool {
        self.pending_nacks
            .get(&key)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Called when the loss detector reports `seq` as a false positive
    /// (it arrived after all): removes it from the pending NACK list for
    /// `key` if a NACK for it hasn't gone out yet, and reports whether the
    /// cancellation landed in time.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::feedback::{FeedbackManager, LossKey};
    ///
    /// let key = LossKey { ssrc: 1, flow: None };
    /// let mut fb = FeedbackManager::default();
    /// fb.note_missing(key, 7);
    /// assert!(fb.try_cancel(key, 7));
    /// assert!(fb.drain_nack_blocks(key).is_empty());
    /// ```
    pub fn try_cancel(&mut self, key: LossKey, seq: u16) -> bool {
        match self.pending_nacks.get_mut(&key) {
            Some(entry) => {
                let before = entry.len();
                entry.retain(|pending| *pending != seq);
                before != entry.len()
            }
            None => false,
        }
    }
}
