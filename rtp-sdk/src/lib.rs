//! # RTP SDK
//!
//! A thin embedding facade over [`rtp_wire`] and [`rtp_session`]: an
//! application that wants to run an RTP/RTCP/MPRTP session against its own
//! transport builds one with [`SessionBuilder`] and then drives the
//! resulting [`rtp_session::Session`] from its own event loop by calling
//! `on_rtp`/`on_rtcp`/`send_rtp`/`maybe_build_rtcp`/`tick` directly.
//!
//! ## Usage
//!
//! ```
//! use rtp_sdk::SessionBuilder;
//! use std::time::{Duration, Instant};
//!
//! let mut session = SessionBuilder::default()
//!     .clock_rate(48_000)
//!     .bandwidth_bps(128_000.0)
//!     .member_timeout(Duration::from_secs(15))
//!     .build(Instant::now())
//!     .unwrap();
//!
//! let ssrc = session.local_ssrc();
//! assert_ne!(ssrc, 0, "a random SSRC is drawn unless one is given");
//! ```

use std::time::{Duration, Instant};

use rtp_session::core::{PlayoutKind, SchedulerKind, SessionConfig};

pub use rtp_session::{core::SessionEvent, core::SessionStats, Error, Session};
pub use rtp_wire as wire;

/// Builds a [`Session`] with the same chained-`&mut self` style used
/// elsewhere in this codebase for construction-time options, returning the
/// fully assembled session from a final [`SessionBuilder::build`] call
/// rather than mutating one in place.
pub struct SessionBuilder {
    config: SessionConfig,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }
}

impl SessionBuilder {
    /// Pins the local SSRC instead of letting [`Session::new`] draw a
    /// random one.
    pub fn local_ssrc(&mut self, ssrc: u32) -> &mut Self {
        self.config.local_ssrc = Some(ssrc);
        self
    }

    /// Sets the media clock rate in Hz (e.g. 90000 for video, 48000 for
    /// wideband audio).
    pub fn clock_rate(&mut self, clock_rate: u32) -> &mut Self {
        self.config.clock_rate = clock_rate;
        self
    }

    /// Selects the simple fixed-delay playout buffer instead of the
    /// default PTS-based one.
    pub fn playout_fixed_delay(&mut self, target_delay: Duration) -> &mut Self {
        self.config.playout = PlayoutKind::V1Perkins { target_delay };
        self
    }

    /// Selects the PTS-based, drift-compensating playout buffer with the
    /// given target latency.
    pub fn playout_pts_based(&mut self, latency: Duration) -> &mut Self {
        self.config.playout = PlayoutKind::V2PtsBased { latency };
        self
    }

    /// Sets the session's total bandwidth budget, used to size the RTCP
    /// 5% share.
    pub fn bandwidth_bps(&mut self, bandwidth_bps: f64) -> &mut Self {
        self.config.session_bandwidth_bps = bandwidth_bps;
        self
    }

    /// Opts into the RFC 5506 reduced-size RTCP minimum interval
    /// (`360 / bw_kbps` seconds) instead of the RFC 3550 default of 5s.
    pub fn reduced_min_rtcp(&mut self, enabled: bool) -> &mut Self {
        self.config.use_reduced_min_rtcp = enabled;
        self
    }

    /// Sets the CNAME carried in this session's outgoing SDES chunks. If
    /// never called, [`Session::new`] derives one from the local SSRC.
    pub fn cname(&mut self, cname: impl Into<String>) -> &mut Self {
        self.config.cname = Some(cname.into());
        self
    }

    /// Sets the maximum segment size assumed by MSS-denominated schedulers.
    pub fn mss(&mut self, mss: usize) -> &mut Self {
        self.config.mss = mss;
        self
    }

    /// Sends every packet as soon as it is stamped, with no pacing or
    /// congestion control.
    pub fn scheduler_immediate(&mut self) -> &mut Self {
        self.config.scheduler = SchedulerKind::Immediate;
        self
    }

    /// Paces packets to a fixed target bitrate.
    pub fn scheduler_paced(&mut self, target_bps: f64) -> &mut Self {
        self.config.scheduler = SchedulerKind::Paced { target_bps };
        self
    }

    /// Gates sending on an ACK-clocked congestion window sized in MSS
    /// units.
    pub fn scheduler_ack_window(&mut self, mss: usize) -> &mut Self {
        self.config.scheduler = SchedulerKind::AckWindow { mss };
        self
    }

    /// Uses the delay/loss aggregate-signal rate controller.
    pub fn scheduler_nada_like(&mut self) -> &mut Self {
        self.config.scheduler = SchedulerKind::NadaLike;
        self
    }

    /// Enables the MPRTP multipath layer with the named path-scheduling
    /// strategy (see `rtp_session::mprtp::parse_scheduler_spec` for the
    /// recognized names).
    pub fn mprtp(&mut self, scheduler_spec: impl Into<String>) -> &mut Self {
        self.config.mprtp_scheduler_spec = Some(scheduler_spec.into());
        self
    }

    /// Sets how long a member may go without activity before it is
    /// reaped by [`Session::tick`].
    pub fn member_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.member_timeout = timeout;
        self
    }

    /// Builds the session, validating the accumulated options.
    pub fn build(&mut self, now: Instant) -> Result<Session, Error> {
        let config = std::mem::take(&mut self.config);
        Session::new(config, now)
    }
}
