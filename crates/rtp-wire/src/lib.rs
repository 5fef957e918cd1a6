//! ## RTP/RTCP wire primitives
//!
//! [RFC3550]: https://tools.ietf.org/html/rfc3550
//! [RFC4585]: https://tools.ietf.org/html/rfc4585
//! [RFC5506]: https://tools.ietf.org/html/rfc5506
//! [RFC8285]: https://tools.ietf.org/html/rfc8285
//!
//! This crate owns everything that is pure wire format and pure time
//! arithmetic for an RTP session: the RTP header codec, the RTCP packet
//! codec (Sender/Receiver Report, SDES, BYE, APP, generic NACK feedback,
//! Extended Report), extended sequence number unwrapping, NTP/wallclock
//! conversion, and the MPRTP per-packet subflow extension defined for
//! multipath RTP. It has no notion of a session, a member, or a socket —
//! those live in `rtp-session`.

pub mod esn;
pub mod mprtp;
pub mod rtcp;
pub mod rtp;
pub mod time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    MalformedHeader,
    UnknownPacketType,
    TruncatedPacket,
    UnsupportedVersion,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
