//! Sending scheduler: decides when queued outgoing packets are allowed to
//! leave, implementing four congestion-control strategies behind one trait
//! so the session core never needs to know which is active.

pub mod ack_window;
pub mod immediate;
pub mod nada;
pub mod paced;

pub use ack_window::AckWindow;
pub use immediate::Immediate;
pub use nada::NadaLike;
pub use paced::Paced;

use std::time::{Duration, Instant};

/// Decision returned by a scheduler for one pending outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    /// Send immediately.
    Send,
    /// Hold until `Instant`, then ask again.
    WaitUntil(std::time::Instant),
}

pub trait SendingScheduler: Send {
    /// Called once per packet enqueued for transmission; `size` is the
    /// packet's wire size in bytes.
    fn poll_send(&mut self, size: usize, now: Instant) -> SendDecision;

    /// Called whenever an acknowledgment (RTCP RR, generic ACK feedback,
    /// or NACK implying delivery of everything before it) arrives, so
    /// window/rate-based schedulers can grow their budget.
    fn on_ack(&mut self, acked_bytes: usize, rtt: Option<Duration>, now: Instant);

    /// Called when a packet is declared lost (RTO fired or a NACK
    /// confirmed it), so congestion-aware schedulers can back off.
    fn on_loss(&mut self, now: Instant);

    fn current_rate_bps(&self) -> Option<f64>;
}
