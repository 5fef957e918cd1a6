//! Single-threaded RTP/RTCP/MPRTP session engine.
//!
//! A [`core::Session`] composes the session database, playout buffer, loss
//! detector, RTCP scheduler, feedback manager, and sending scheduler into
//! the single-threaded event loop described in the module docs below; each
//! concern is implemented in its own module so the engine can be built up
//! (and tested) one piece at a time.

pub mod core;
pub mod database;
pub mod feedback;
pub mod loss;
pub mod member;
pub mod mprtp;
pub mod playout;
pub mod port_allocator;
pub mod rtcp_scheduler;
pub mod scheduler;
pub mod timers;

pub use crate::core::{Session, SessionConfig, SessionEvent, SessionStats};

/// Error kinds propagated by the engine as tagged results, never as
/// exceptions. Everything recoverable is counted and dropped; anything
/// that threatens an invariant (an SSRC collision, a shutdown) produces a
/// notification; anything at configuration time is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// RTP/RTCP parsing failed.
    MalformedHeader,
    /// An RTCP payload type this engine does not understand.
    UnknownPacketType,
    /// The same SSRC was observed from a different source transport address.
    SsrcCollision,
    /// RFC 3550 Appendix A.1 validation did not complete within the window.
    ValidationFailed,
    /// The transport failed a read or a write.
    TransportError,
    /// An application-supplied security hook rejected a packet.
    SecurityFailure,
    /// The session has received a BYE, or was stopped locally.
    Shutdown,
    /// A bad option was supplied at session-construction time.
    ConfigurationError,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<rtp_wire::Error> for Error {
    fn from(error: rtp_wire::Error) -> Self {
        match error {
            rtp_wire::Error::UnknownPacketType => Error::UnknownPacketType,
            _ => Error::MalformedHeader,
        }
    }
}
