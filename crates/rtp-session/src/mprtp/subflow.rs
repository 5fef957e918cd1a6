use std::{net::SocketAddr, time::Instant};

/// Identifies one MPRTP subflow within a session. Carried on the wire as
/// the `flow_id` byte of [`rtp_wire::mprtp::MprtpSubflowHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(pub u8);

/// State tracked per active network path in a multipath session.
#[derive(Debug, Clone)]
pub struct Subflow {
    pub id: FlowId,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub next_local_seq: u16,
    pub highest_remote_seq: Option<u16>,
    pub last_rtt: Option<std::time::Duration>,
    pub last_activity: Instant,
    pub active: bool,
}

impl Subflow {
    pub fn new(id: FlowId, local: SocketAddr, remote: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            local,
            remote,
            next_local_seq: 0,
            highest_remote_seq: None,
            last_rtt: None,
            last_activity: now,
            active: true,
        }
    }

    /// Allocates the next subflow-local sequence number for an outgoing
    /// packet on this path.
    pub fn next_seq(&mut self) -> u16 {
        let seq = self.next_local_seq;
        self.next_local_seq = self.next_local_seq.wrapping_add(1);
        seq
    }
}
