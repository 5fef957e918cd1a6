//! The session database: the table of known SSRCs and their member state.
//!
//! Unlike the teacher's `SessionManager`, this table is owned by exactly one
//! session and is never touched from more than one thread at a time (§5 of
//! the design: a session runs cooperatively on whichever thread drives its
//! event loop), so it is a plain `ahash::HashMap` rather than a
//! `parking_lot::RwLock`-guarded table. `tick` is called by the session core
//! on every pass through its loop and plays the same role the teacher's
//! background GC thread plays for `SessionManager`, just invoked
//! cooperatively instead of off a dedicated thread.

use std::time::{Duration, Instant};

use ahash::HashMap;

use crate::member::{MemberEntry, MemberState};

/// How long a member may go without RTP/RTCP activity before it is
/// considered timed out, per RFC 3550 §6.3.5 (5x the calculated RTCP
/// reporting interval in the general case; a fixed bound here since the
/// RTCP interval is computed by [`crate::rtcp_scheduler`]).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a `Leaving` member is kept around after a BYE before it is
/// purged, so a stray late packet for the same SSRC isn't misread as a
/// collision with a brand new member.
const LEAVING_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEvent {
    Joined(u32),
    Left(u32),
    TimedOut(u32),
}

pub struct SessionDatabase {
    members: HashMap<u32, MemberEntry>,
    local_ssrc: u32,
    timeout: Duration,
}

impl SessionDatabase {
    pub fn new(local_ssrc: u32) -> Self {
        Self {
            members: HashMap::with_capacity_and_hasher(32, Default::default()),
            local_ssrc,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, ssrc: u32) -> Option<&MemberEntry> {
        self.members.get(&ssrc)
    }

    pub fn get_mut(&mut self, ssrc: u32) -> Option<&mut MemberEntry> {
        self.members.get_mut(&ssrc)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &MemberEntry)> {
        self.members.iter()
    }

    /// Looks up a member by SSRC, inserting a fresh probationary entry the
    /// first time this SSRC is observed. Returns whether the member is new
    /// and a mutable reference to it, so callers can detect an SSRC
    /// collision (a "new" member whose SSRC unexpectedly matches one the
    /// session already believed was this peer's single source).
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::database::SessionDatabase;
    /// use std::time::Instant;
    ///
    /// let mut db = SessionDatabase::new(0xface);
    /// let (is_new, member) = db.get_or_insert(42, 1000, Instant::now());
    /// assert!(is_new);
    /// assert_eq!(member.ssrc, 42);
    ///
    /// let (is_new, _) = db.get_or_insert(42, 1001, Instant::now());
    /// assert!(!is_new);
    /// ```
    pub fn get_or_insert(&mut self, ssrc: u32, seq: u16, now: Instant) -> (bool, &mut MemberEntry) {
        let is_new = !self.members.contains_key(&ssrc);
        let member = self
            .members
            .entry(ssrc)
            .or_insert_with(|| MemberEntry::new(ssrc, seq, now));
        (is_new, member)
    }

    /// Marks a member as leaving (RFC 3550 §6.3.4, on receipt of a BYE).
    /// The member is not removed immediately; [`tick`](Self::tick) reaps it
    /// after [`LEAVING_GRACE`].
    pub fn mark_leaving(&mut self, ssrc: u32) {
        if let Some(member) = self.members.get_mut(&ssrc) {
            member.mark_leaving();
        }
    }

    /// Advances the database's notion of time by one step, reaping timed
    /// out or departed members and returning the events produced so the
    /// session core can surface them to the application.
    pub fn tick(&mut self, now: Instant) -> Vec<MemberEvent> {
        let mut events = Vec::new();
        let mut expired = Vec::new();

        for (ssrc, member) in self.members.iter() {
            let since_activity = now.saturating_duration_since(member.last_activity);
            match member.state {
                MemberState::Leaving if since_activity >= LEAVING_GRACE => {
                    expired.push(*ssrc);
                    events.push(MemberEvent::Left(*ssrc));
                }
                _ if since_activity >= self.timeout => {
                    expired.push(*ssrc);
                    events.push(MemberEvent::TimedOut(*ssrc));
                }
                _ => {}
            }
        }

        for ssrc in expired {
            self.members.remove(&ssrc);
        }

        events
    }
}
