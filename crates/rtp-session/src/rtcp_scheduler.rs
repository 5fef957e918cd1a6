//! RTCP transmission interval computation, per RFC 3550 §6.3 and the
//! reduced-minimum-interval relaxation of RFC 5506 §5.

use std::time::Duration;

use rand::Rng;

/// RFC 3550 §6.2's fixed minimum interval between RTCP transmissions for
/// a session that hasn't opted into reduced-size RTCP.
const RTCP_MIN_INTERVAL: Duration = Duration::from_secs(5);
/// Fallback for the RFC 5506 §5 reduced-size minimum (`360 / bw_kbps`
/// seconds) when the session has no usable bandwidth figure to divide by.
const REDUCED_MIN_INTERVAL_FALLBACK: Duration = Duration::from_millis(360);

/// Fraction of session bandwidth reserved for RTCP, and the sender/receiver
/// split of it, per RFC 3550 §6.2.
const RTCP_BANDWIDTH_FRACTION: f64 = 0.05;
const SENDER_SHARE: f64 = 0.25;

pub struct RtcpScheduler {
    use_reduced_min_rtcp: bool,
    session_bandwidth_bps: f64,
    avg_rtcp_size: f64,
    we_sent: bool,
}

impl RtcpScheduler {
    pub fn new(session_bandwidth_bps: f64, use_reduced_min_rtcp: bool) -> Self {
        Self {
            use_reduced_min_rtcp,
            session_bandwidth_bps,
            avg_rtcp_size: 200.0,
            we_sent: false,
        }
    }

    pub fn set_we_sent(&mut self, we_sent: bool) {
        self.we_sent = we_sent;
    }

    /// Folds the size of a just-transmitted or just-received compound RTCP
    /// packet into the running average used for interval computation
    /// (RFC 3550 §6.3.3).
    pub fn on_rtcp_packet_size(&mut self, size_bytes: usize) {
        self.avg_rtcp_size = (1.0 / 16.0) * size_bytes as f64 + (15.0 / 16.0) * self.avg_rtcp_size;
    }

    /// RFC 5506 §5's reduced-size minimum is bandwidth-dependent:
    /// `360 / bw_kbps` seconds, rather than a fixed value, so sessions
    /// with more bandwidth to spend on RTCP can report more frequently.
    fn minimum_interval(&self) -> Duration {
        if self.use_reduced_min_rtcp {
            let bw_kbps = self.session_bandwidth_bps / 1000.0;
            if bw_kbps > 0.0 {
                Duration::from_secs_f64(360.0 / bw_kbps)
            } else {
                REDUCED_MIN_INTERVAL_FALLBACK
            }
        } else {
            RTCP_MIN_INTERVAL
        }
    }

    /// Computes the next RTCP transmission interval, following the
    /// randomized-deterministic formula of RFC 3550 §6.3.1: a base interval
    /// derived from the reserved bandwidth share and average packet size,
    /// scaled down for senders (they are a small minority of a session's
    /// membership in the common case), with a compensating factor and
    /// randomization to avoid synchronized bursts across members.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::rtcp_scheduler::RtcpScheduler;
    ///
    /// let scheduler = RtcpScheduler::new(64_000.0, false);
    /// let interval = scheduler.next_interval(1, 1);
    ///
    /// assert!(interval.as_secs_f64() >= 2.5); // at least half the 5s minimum
    /// ```
    pub fn next_interval(&self, members: usize, senders: usize) -> Duration {
        let members = members.max(1) as f64;
        let senders = senders as f64;

        let rtcp_bw = self.session_bandwidth_bps * RTCP_BANDWIDTH_FRACTION;

        let (n, bw_share) = if senders > 0.0 && senders <= members * SENDER_SHARE {
            if self.we_sent {
                (senders, rtcp_bw * SENDER_SHARE)
            } else {
                (members - senders, rtcp_bw * (1.0 - SENDER_SHARE))
            }
        } else {
            (members, rtcp_bw)
        };

        let t_min = self.minimum_interval().as_secs_f64();
        let avg_interval = if bw_share > 0.0 {
            (n * self.avg_rtcp_size / bw_share).max(t_min)
        } else {
            t_min
        };

        // RFC 3550's compensating factor (e^(-3/2)/1.21828...) cancels the
        // bias introduced by the randomization below, applied after
        // computing the deterministic interval but before randomizing it.
        let compensated = avg_interval / 1.21828;
        let randomized = rand::rng().random_range(0.5..1.5) * compensated;

        Duration::from_secs_f64(randomized.max(t_min / 2.0))
    }
}
