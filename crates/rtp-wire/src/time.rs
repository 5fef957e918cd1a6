//! Time conversion between wallclock, NTP, and RTP timestamp domains.
//!
//! RTP carries two independent clocks: the 32-bit media-rate timestamp
//! carried on every packet, and the 64-bit NTP timestamp carried only in
//! Sender Reports. Both have to be related back to the local wallclock to
//! compute jitter, RTT, and playout deadlines.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
const NTP_UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

/// A 64-bit NTP short/long timestamp: 32 bits of seconds since the NTP
/// epoch, 32 bits of fractional seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Builds an NTP timestamp from the current wallclock.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_wire::time::NtpTimestamp;
    /// use std::time::{Duration, UNIX_EPOCH};
    ///
    /// let ts = NtpTimestamp::from_unix(UNIX_EPOCH + Duration::from_secs(10));
    /// assert_eq!(ts.seconds, 2_208_988_810);
    /// assert_eq!(ts.fraction, 0);
    /// ```
    pub fn from_unix(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let seconds = since_epoch.as_secs() + NTP_UNIX_EPOCH_OFFSET;
        let fraction = ((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000;

        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }

    pub fn now() -> Self {
        Self::from_unix(SystemTime::now())
    }

    /// Converts back to a wallclock instant.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_wire::time::NtpTimestamp;
    ///
    /// let ts = NtpTimestamp { seconds: 2_208_988_810, fraction: 0 };
    /// let unix = ts.to_unix();
    ///
    /// assert_eq!(unix.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs(), 10);
    /// ```
    pub fn to_unix(&self) -> SystemTime {
        let secs = self.seconds as u64 - NTP_UNIX_EPOCH_OFFSET;
        let nanos = ((self.fraction as u64) * 1_000_000_000) >> 32;
        UNIX_EPOCH + Duration::new(secs, nanos as u32)
    }

    /// The middle 32 bits of the 64-bit NTP timestamp, as carried in the
    /// LSR field of a Receiver Report block (RFC 3550 §6.4.1).
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_wire::time::NtpTimestamp;
    ///
    /// let ts = NtpTimestamp { seconds: 0xaabbccdd, fraction: 0x11223344 };
    /// assert_eq!(ts.middle_32(), 0xccdd_1122);
    /// ```
    pub fn middle_32(&self) -> u32 {
        ((self.seconds & 0x0000_ffff) << 16) | (self.fraction >> 16)
    }
}

/// Converts a `Duration` expressed in RTP timestamp units (a clock rate in
/// Hz) back and forth to wallclock time, and computes the RTP-timestamp
/// delta corresponding to an elapsed wallclock interval.
#[derive(Debug, Clone, Copy)]
pub struct MediaClock {
    clock_rate: u32,
}

impl MediaClock {
    pub fn new(clock_rate: u32) -> Self {
        assert!(clock_rate > 0);
        Self { clock_rate }
    }

    /// Converts a wallclock duration to an RTP timestamp tick count.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_wire::time::MediaClock;
    /// use std::time::Duration;
    ///
    /// let clock = MediaClock::new(90_000);
    /// assert_eq!(clock.ticks(Duration::from_millis(20)), 1800);
    /// ```
    pub fn ticks(&self, elapsed: Duration) -> u32 {
        ((elapsed.as_secs_f64()) * self.clock_rate as f64).round() as u32
    }

    /// Converts an RTP timestamp tick delta back to a wallclock duration.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_wire::time::MediaClock;
    ///
    /// let clock = MediaClock::new(90_000);
    /// assert_eq!(clock.duration(1800), std::time::Duration::from_millis(20));
    /// ```
    pub fn duration(&self, ticks: u32) -> Duration {
        Duration::from_secs_f64(ticks as f64 / self.clock_rate as f64)
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }
}

/// Computes DLSR-based round trip time per RFC 3550 §6.4.1:
/// `RTT = now_ntp_middle32 - LSR - DLSR` expressed in 1/65536 second units.
///
/// Returns `None` when either timestamp is zero (the report block carried
/// no prior Sender Report reference).
///
/// # Test
///
/// ```
/// use rtp_wire::time::rtt_from_dlsr;
/// use std::time::Duration;
///
/// // exactly 1 second round trip, no processing delay at the peer.
/// let rtt = rtt_from_dlsr(1 << 16, 0, 0).unwrap();
/// assert_eq!(rtt, Duration::from_secs(1));
/// ```
pub fn rtt_from_dlsr(now_middle_32: u32, lsr: u32, dlsr: u32) -> Option<Duration> {
    if lsr == 0 {
        return None;
    }

    let rtt_units = now_middle_32.wrapping_sub(lsr).wrapping_sub(dlsr);
    Some(Duration::from_secs_f64(rtt_units as f64 / 65536.0))
}
