//! Multipath RTP: subflow tracking and outbound path scheduling.

pub mod scheduler;
pub mod subflow;

use std::net::SocketAddr;
use std::time::Instant;

pub use scheduler::{Distributed, FixedPattern, PathScheduler, Random, RoundRobin, SmallestRtt};
pub use subflow::{FlowId, Subflow};

/// Parses an `mprtp_scheduler_spec` configuration string (§6) into a
/// scheduler instance. Accepted forms:
///
/// - `round-robin`
/// - `random`
/// - `smallest-rtt`
/// - `fixed:0,0,1` (a comma-separated flow id pattern)
/// - `distributed:0=1.0,1=2.0` (comma-separated `flow_id=weight` pairs)
///
/// # Test
///
/// ```
/// use rtp_session::mprtp::parse_scheduler_spec;
///
/// assert!(parse_scheduler_spec("round-robin").is_ok());
/// assert!(parse_scheduler_spec("fixed:0,0,1").is_ok());
/// assert!(parse_scheduler_spec("bogus").is_err());
/// ```
pub fn parse_scheduler_spec(spec: &str) -> Result<Box<dyn PathScheduler>, crate::Error> {
    if spec == "round-robin" {
        return Ok(Box::new(RoundRobin::default()));
    }
    if spec == "random" {
        return Ok(Box::new(Random));
    }
    if spec == "smallest-rtt" {
        return Ok(Box::new(SmallestRtt));
    }
    if let Some(pattern) = spec.strip_prefix("fixed:") {
        let ids = pattern
            .split(',')
            .map(|s| s.parse::<u8>().map(FlowId).map_err(|_| crate::Error::ConfigurationError))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Box::new(FixedPattern::new(ids)));
    }
    if let Some(pairs) = spec.strip_prefix("distributed:") {
        let weights = pairs
            .split(',')
            .map(|pair| {
                let (id, weight) = pair.split_once('=').ok_or(crate::Error::ConfigurationError)?;
                let id = id.parse::<u8>().map_err(|_| crate::Error::ConfigurationError)?;
                let weight = weight.parse::<f64>().map_err(|_| crate::Error::ConfigurationError)?;
                Ok((FlowId(id), weight))
            })
            .collect::<Result<Vec<_>, crate::Error>>()?;
        return Ok(Box::new(Distributed::new(weights)));
    }

    Err(crate::Error::ConfigurationError)
}

/// The set of subflows making up one MPRTP session, plus the scheduler
/// deciding which one to use for the next outgoing packet.
pub struct MprtpLayer {
    subflows: Vec<Subflow>,
    scheduler: Box<dyn PathScheduler>,
}

impl MprtpLayer {
    pub fn new(scheduler: Box<dyn PathScheduler>) -> Self {
        Self {
            subflows: Vec::new(),
            scheduler,
        }
    }

    pub fn add_subflow(&mut self, id: FlowId, local: SocketAddr, remote: SocketAddr, now: Instant) {
        if self.subflows.iter().any(|s| s.id == id) {
            return;
        }
        self.subflows.push(Subflow::new(id, local, remote, now));
    }

    pub fn remove_subflow(&mut self, id: FlowId) {
        self.subflows.retain(|s| s.id != id);
    }

    pub fn subflow_mut(&mut self, id: FlowId) -> Option<&mut Subflow> {
        self.subflows.iter_mut().find(|s| s.id == id)
    }

    pub fn subflows(&self) -> &[Subflow] {
        &self.subflows
    }

    /// Picks the subflow that should carry the next outgoing packet.
    pub fn select_subflow(&mut self) -> Option<FlowId> {
        self.scheduler.select(&self.subflows).map(|s| s.id)
    }
}
