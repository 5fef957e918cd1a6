//! Session core: the single thread of control that composes the database,
//! playout buffer, loss detector, RTCP scheduler, feedback manager, and
//! sending scheduler into one RTP/RTCP/MPRTP session.
//!
//! Everything here runs on whichever thread drives the session's event
//! loop (§5 of the design: suspension points are transport reads, timer
//! expiry, and the application pulling an access unit — between any two of
//! those, a `Session`'s invariants hold and nothing else may touch it).

use std::{
    collections::VecDeque,
    fmt,
    net::SocketAddr,
    time::{Duration, Instant},
};

use bytes::BytesMut;
use rand::Rng;

use rtp_wire::{
    rtcp::{GenericNack, RtcpPacket},
    rtp::RtpPacket,
    time::{rtt_from_dlsr, MediaClock, NtpTimestamp},
};

use crate::{
    database::{MemberEvent, SessionDatabase},
    feedback::{FeedbackManager, LossKey},
    loss::{Ar2Predictor, CrossPathRtoEstimator, GapPredictor, LossDetector, LossEvent},
    mprtp::{subflow::FlowId, MprtpLayer},
    playout::{PlayoutBuffer, PlayoutBufferNode, V1Perkins, V2PtsBased},
    rtcp_scheduler::RtcpScheduler,
    scheduler::{AckWindow, Immediate, NadaLike, Paced, SendDecision, SendingScheduler},
    timers::{TimerId, TimerWheel},
    Error,
};

/// Per RFC 3550 §6.4.1/6.4.2, an SR or RR carries at most 31 report blocks
/// (the reception-report count is a 5-bit field); a session tracking more
/// members than that overflows into additional RR packets.
const MAX_REPORT_BLOCKS: usize = 31;

fn default_gap_predictor() -> Box<dyn GapPredictor> {
    Box::new(Ar2Predictor::default())
}

/// Selects which playout-buffer strategy a session runs (§4.C).
pub enum PlayoutKind {
    /// Releases a packet once it has sat in the buffer for a fixed delay.
    V1Perkins { target_delay: Duration },
    /// Derives deadlines from the source's RTP timestamp, compensating for
    /// clock drift between sender and receiver.
    V2PtsBased { latency: Duration },
}

impl Default for PlayoutKind {
    fn default() -> Self {
        // 100ms default buffer latency, per the jitter-buffer contract.
        PlayoutKind::V2PtsBased {
            latency: Duration::from_millis(100),
        }
    }
}

/// Selects which sending scheduler (congestion control strategy) a session
/// runs (§4.G).
pub enum SchedulerKind {
    Immediate,
    Paced { target_bps: f64 },
    AckWindow { mss: usize },
    NadaLike,
}

impl Default for SchedulerKind {
    fn default() -> Self {
        SchedulerKind::Immediate
    }
}

/// Construction-time options for a [`Session`]. Invalid values are caught
/// by [`Session::new`] and reported as [`Error::ConfigurationError`] rather
/// than panicking, since configuration errors are fatal-but-not-a-bug per
/// the error design.
pub struct SessionConfig {
    /// Local SSRC; a fresh one is drawn at random if not given.
    pub local_ssrc: Option<u32>,
    /// RTCP SDES CNAME, mandatory in every compound report (§6.5.1). A
    /// value derived from the local SSRC is used if not given.
    pub cname: Option<String>,
    /// Media clock rate in Hz (e.g. 90000 for video, 8000 for narrowband audio).
    pub clock_rate: u32,
    pub playout: PlayoutKind,
    /// Total session bandwidth budget, used to size the 5% RTCP share.
    pub session_bandwidth_bps: f64,
    /// RFC 5506 reduced-size RTCP minimum interval (`360 / bw_kbps` seconds
    /// instead of a fixed 5s).
    pub use_reduced_min_rtcp: bool,
    /// Maximum segment size assumed by MSS-denominated schedulers.
    pub mss: usize,
    pub scheduler: SchedulerKind,
    /// If set, enables the MPRTP layer with the named path-scheduling
    /// strategy (see `mprtp::parse_scheduler_spec`).
    pub mprtp_scheduler_spec: Option<String>,
    /// How long a member may go without activity before it times out.
    pub member_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_ssrc: None,
            cname: None,
            clock_rate: 90_000,
            playout: PlayoutKind::default(),
            session_bandwidth_bps: 64_000.0,
            use_reduced_min_rtcp: false,
            mss: 1200,
            scheduler: SchedulerKind::default(),
            mprtp_scheduler_spec: None,
            member_timeout: Duration::from_secs(30),
        }
    }
}

/// Observable counters and gauges updated as a side effect of every B/D/E/F/G
/// operation, exposed so an embedder can drive metrics without reaching
/// into the engine's internals.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub nacks_sent: u64,
    pub packets_lost: u64,
    pub rtt: Option<Duration>,
    pub jitter: f64,
    pub cwnd_bytes: Option<usize>,
    pub sending_rate_bps: Option<f64>,
}

/// Notifications a session surfaces to the application, pulled from a
/// bounded queue rather than pushed via callback, since the engine must
/// never call back into application code while holding its own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    MemberJoined(u32),
    MemberLeft(u32),
    ReceiverReportReceived(u32),
    SessionComplete,
}

/// Outcome of feeding one inbound RTP packet through the session database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Accepted,
    Duplicate,
    Unvalidated,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    ShuttingDown,
    Complete,
}

/// Cap on the number of queued [`SessionEvent`]s; an application that never
/// calls [`Session::events`] should not make the engine grow without bound.
const EVENT_QUEUE_CAP: usize = 256;

/// A single RTP/RTCP/MPRTP session: one SSRC's worth of state, running on
/// whichever thread drives its event loop.
pub struct Session {
    local_ssrc: u32,
    local_cname: String,
    clock: MediaClock,
    rtp_ts_base: u32,
    started: Instant,
    next_local_seq: u16,
    database: SessionDatabase,
    playout: Box<dyn PlayoutBuffer>,
    loss: LossDetector,
    mprtp_loss: Option<CrossPathRtoEstimator>,
    rtcp_scheduler: RtcpScheduler,
    feedback: FeedbackManager,
    scheduler: Box<dyn SendingScheduler>,
    mprtp: Option<MprtpLayer>,
    timers: TimerWheel,
    rtcp_timer: TimerId,
    /// Set by `send_rtp`, cleared when the next report is built: decides
    /// whether that report is a Sender Report or a Receiver Report.
    we_sent_since_last_report: bool,
    state: SessionState,
    stats: SessionStats,
    events: VecDeque<SessionEvent>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("local_ssrc", &self.local_ssrc)
            .field("local_cname", &self.local_cname)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn build_playout(kind: PlayoutKind, clock_rate: u32) -> Box<dyn PlayoutBuffer> {
    match kind {
        PlayoutKind::V1Perkins { target_delay } => Box::new(V1Perkins::new(target_delay)),
        PlayoutKind::V2PtsBased { latency } => Box::new(V2PtsBased::new(clock_rate, latency)),
    }
}

fn build_scheduler(kind: SchedulerKind) -> Box<dyn SendingScheduler> {
    match kind {
        SchedulerKind::Immediate => Box::new(Immediate),
        SchedulerKind::Paced { target_bps } => Box::new(Paced::new(target_bps)),
        SchedulerKind::AckWindow { mss } => Box::new(AckWindow::with_mss(mss)),
        SchedulerKind::NadaLike => Box::new(NadaLike::new()),
    }
}

impl Session {
    /// Creates a new session: allocates a local SSRC if none was given,
    /// builds the configured playout buffer and sending scheduler, and
    /// schedules the first RTCP report at half the computed interval, per
    /// the startup contract in §4.H.
    pub fn new(config: SessionConfig, now: Instant) -> Result<Self, Error> {
        if config.clock_rate == 0 {
            return Err(Error::ConfigurationError);
        }
        if config.session_bandwidth_bps <= 0.0 {
            return Err(Error::ConfigurationError);
        }

        let mprtp = match config.mprtp_scheduler_spec.as_deref() {
            Some(spec) => Some(MprtpLayer::new(crate::mprtp::parse_scheduler_spec(spec)?)),
            None => None,
        };

        let mut rng = rand::rng();
        let local_ssrc = config.local_ssrc.unwrap_or_else(|| rng.random());
        let rtp_ts_base: u32 = rng.random();
        let local_cname = config.cname.unwrap_or_else(|| format!("rtp-session-{local_ssrc:08x}"));

        let rtcp_scheduler = RtcpScheduler::new(config.session_bandwidth_bps, config.use_reduced_min_rtcp);
        let mut timers = TimerWheel::default();
        let first_interval = rtcp_scheduler.next_interval(1, 0) / 2;
        let rtcp_timer = timers.schedule(now + first_interval);
        let mprtp_loss = mprtp.as_ref().map(|_| CrossPathRtoEstimator::new(default_gap_predictor));

        Ok(Self {
            local_ssrc,
            local_cname,
            clock: MediaClock::new(config.clock_rate),
            rtp_ts_base,
            started: now,
            next_local_seq: 0,
            database: SessionDatabase::new(local_ssrc).with_timeout(config.member_timeout),
            playout: build_playout(config.playout, config.clock_rate),
            loss: LossDetector::new(default_gap_predictor),
            mprtp_loss,
            rtcp_scheduler,
            feedback: FeedbackManager::default(),
            scheduler: build_scheduler(config.scheduler),
            mprtp,
            timers,
            rtcp_timer,
            we_sent_since_last_report: false,
            state: SessionState::Active,
            stats: SessionStats::default(),
            events: VecDeque::new(),
        })
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    /// Registers one network path as an MPRTP subflow, so the configured
    /// path scheduler may start choosing it for outbound packets. Fails
    /// with [`Error::ConfigurationError`] if the session was not built with
    /// an `mprtp_scheduler_spec`.
    pub fn add_mprtp_subflow(
        &mut self,
        flow_id: u8,
        local: SocketAddr,
        remote: SocketAddr,
        now: Instant,
    ) -> Result<(), Error> {
        let mprtp = self.mprtp.as_mut().ok_or(Error::ConfigurationError)?;
        mprtp.add_subflow(FlowId(flow_id), local, remote, now);
        Ok(())
    }

    fn push_event(&mut self, event: SessionEvent) {
        if self.events.len() >= EVENT_QUEUE_CAP {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Drains every queued notification for the application to consume.
    pub fn events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    /// Feeds one inbound RTP datagram through dispatch → database → loss →
    /// playout, per the receiver data flow in §2.
    pub fn on_rtp(&mut self, bytes: &[u8], now: Instant) -> Result<DeliveryDecision, Error> {
        if self.state == SessionState::Complete {
            return Err(Error::Shutdown);
        }

        let packet = RtpPacket::decode(bytes).map_err(Error::from)?;

        if packet.ssrc == self.local_ssrc {
            return Err(Error::SsrcCollision);
        }

        let flow_id = packet.extension.and_then(|(profile, ext)| {
            if profile != rtp_wire::mprtp::MPRTP_EXTENSION_PROFILE {
                return None;
            }
            rtp_wire::mprtp::MprtpSubflowHeader::decode(ext)
                .ok()
                .map(|(header, _id)| FlowId(header.flow_id))
        });

        let (is_new, member) = self.database.get_or_insert(packet.ssrc, packet.sequence_number, now);
        let was_validated = member.state == crate::member::MemberState::Validated;
        let received_before = member.received;

        let accepted = member.update_sequence(packet.sequence_number);
        let arrival_ticks = self.clock.ticks(now.saturating_duration_since(self.started));
        member.update_jitter(packet.timestamp, arrival_ticks);
        member.touch(now);
        self.stats.jitter = member.jitter;

        let decision = if !accepted && !was_validated {
            DeliveryDecision::Unvalidated
        } else if !accepted {
            DeliveryDecision::OutOfRange
        } else if member.received == received_before {
            DeliveryDecision::Duplicate
        } else {
            DeliveryDecision::Accepted
        };

        if decision == DeliveryDecision::Accepted {
            self.stats.packets_received += 1;
            self.stats.bytes_received += bytes.len() as u64;

            let esn = member.extended_max_seq();

            if let Some(flow) = flow_id {
                if let Some(mprtp) = &mut self.mprtp {
                    if let Some(subflow) = mprtp.subflow_mut(flow) {
                        subflow.highest_remote_seq = Some(packet.sequence_number);
                        subflow.last_activity = now;
                    }
                }
            }

            let loss_events = match (flow_id, &mut self.mprtp_loss) {
                (Some(flow), Some(cross)) => cross.on_packet_arrival(flow, now, esn, packet.ssrc),
                _ => self.loss.on_packet_arrival(packet.ssrc, now, esn),
            };
            for event in loss_events {
                if let LossEvent::FalsePositive(esn) = event {
                    let key = LossKey { ssrc: packet.ssrc, flow: flow_id };
                    self.feedback.try_cancel(key, esn as u16);
                }
            }

            self.playout.insert(
                PlayoutBufferNode {
                    sequence_number: esn,
                    rtp_timestamp: packet.timestamp,
                    arrival: now,
                    payload: packet.payload.to_vec(),
                },
                now,
            );
        } else if decision == DeliveryDecision::OutOfRange {
            self.feedback.note_missing(
                LossKey { ssrc: packet.ssrc, flow: flow_id },
                packet.sequence_number,
            );
        }

        if is_new {
            self.push_event(SessionEvent::MemberJoined(packet.ssrc));
        }

        Ok(decision)
    }

    /// Feeds one inbound (possibly compound) RTCP datagram through the
    /// database and early-feedback logic, per the receiver data flow.
    pub fn on_rtcp(&mut self, bytes: &[u8], now: Instant) -> Result<(), Error> {
        self.rtcp_scheduler.on_rtcp_packet_size(bytes.len());
        let packets = RtcpPacket::decode_compound(bytes).map_err(Error::from)?;

        for packet in packets {
            match packet {
                RtcpPacket::SenderReport {
                    ssrc,
                    ntp_seconds,
                    ntp_fraction,
                    ..
                } => {
                    let (is_new, member) = self.database.get_or_insert(ssrc, 0, now);
                    let middle32 = NtpTimestamp {
                        seconds: ntp_seconds,
                        fraction: ntp_fraction,
                    }
                    .middle_32();
                    member.last_sr_ntp_middle_32 = middle32;
                    member.last_sr_arrival = Some(now);
                    member.touch(now);
                    if is_new {
                        self.push_event(SessionEvent::MemberJoined(ssrc));
                    }
                }
                RtcpPacket::ReceiverReport { ssrc, reports } => {
                    let (is_new, member) = self.database.get_or_insert(ssrc, 0, now);
                    member.touch(now);
                    if is_new {
                        self.push_event(SessionEvent::MemberJoined(ssrc));
                    }

                    for report in reports {
                        if report.ssrc != self.local_ssrc {
                            continue;
                        }
                        let now_middle32 = NtpTimestamp::now().middle_32();
                        if let Some(rtt) = rtt_from_dlsr(now_middle32, report.lsr, report.dlsr) {
                            self.scheduler.on_ack(0, Some(rtt), now);
                            self.stats.rtt = Some(rtt);
                        }
                        self.stats.packets_lost = report.cumulative_lost as u64;
                    }

                    self.push_event(SessionEvent::ReceiverReportReceived(ssrc));
                }
                RtcpPacket::Bye { sources, .. } => {
                    for ssrc in sources {
                        self.database.mark_leaving(ssrc);
                    }
                }
                RtcpPacket::Nack { entries, .. } => {
                    if !entries.is_empty() {
                        self.scheduler.on_loss(now);
                    }
                }
                RtcpPacket::SourceDescription { .. }
                | RtcpPacket::App { .. }
                | RtcpPacket::ExtendedReport { .. } => {}
            }
        }

        Ok(())
    }

    /// Stamps and encodes one outbound RTP packet (SSRC, sequence number,
    /// RTP timestamp, marker), per the sender data flow, then asks the
    /// sending scheduler whether it may leave now.
    pub fn send_rtp(&mut self, payload: &[u8], marker: bool, now: Instant, out: &mut BytesMut) -> SendDecision {
        if self.state != SessionState::Active {
            return SendDecision::WaitUntil(now);
        }

        let seq = self.next_local_seq;
        self.next_local_seq = self.next_local_seq.wrapping_add(1);
        let elapsed_ticks = self.clock.ticks(now.saturating_duration_since(self.started));
        let timestamp = self.rtp_ts_base.wrapping_add(elapsed_ticks);

        let extension_buf;
        let extension = if let Some(mprtp) = &mut self.mprtp {
            if let Some(flow) = mprtp.select_subflow() {
                let subflow_seq = mprtp.subflow_mut(flow).map(|s| s.next_seq()).unwrap_or(0);
                let mut buf = BytesMut::new();
                rtp_wire::mprtp::MprtpSubflowHeader {
                    flow_id: flow.0,
                    subflow_sequence: subflow_seq,
                }
                .encode(0, &mut buf);
                extension_buf = buf;
                Some((rtp_wire::mprtp::MPRTP_EXTENSION_PROFILE, &extension_buf[..]))
            } else {
                None
            }
        } else {
            None
        };

        RtpPacket {
            marker,
            payload_type: 96,
            sequence_number: seq,
            timestamp,
            ssrc: self.local_ssrc,
            csrc: Vec::new(),
            extension,
            payload,
        }
        .encode(out);

        self.rtcp_scheduler.set_we_sent(true);
        self.we_sent_since_last_report = true;
        let decision = self.scheduler.poll_send(out.len(), now);
        if decision == SendDecision::Send {
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += out.len() as u64;
        }
        self.stats.cwnd_bytes = None;
        self.stats.sending_rate_bps = self.scheduler.current_rate_bps();

        decision
    }

    /// Builds the next compound RTCP report (SR or RR, plus any pending
    /// NACK feedback) if the scheduled interval has elapsed.
    pub fn maybe_build_rtcp(&mut self, now: Instant) -> Option<BytesMut> {
        if self.timers.pop_expired(now).into_iter().all(|id| id != self.rtcp_timer) {
            return None;
        }

        let mut out = BytesMut::new();
        let reports: Vec<_> = self
            .database
            .iter()
            .map(|(ssrc, _)| *ssrc)
            .collect();

        let mut blocks = Vec::new();
        for ssrc in reports {
            if let Some(member) = self.database.get_mut(ssrc) {
                let (fraction_lost, cumulative_lost) = member.loss_since_last_report();
                blocks.push(rtp_wire::rtcp::ReportBlock {
                    ssrc,
                    fraction_lost,
                    cumulative_lost,
                    highest_seq: member.extended_max_seq() as u32,
                    jitter: member.jitter as u32,
                    lsr: member.last_sr_ntp_middle_32,
                    dlsr: 0,
                });
            }
        }

        // RFC 3550 caps a single SR/RR at 31 report blocks; anything past
        // that overflows into additional RR packets of up to 31 each.
        let overflow = if blocks.len() > MAX_REPORT_BLOCKS {
            blocks.split_off(MAX_REPORT_BLOCKS)
        } else {
            Vec::new()
        };

        if self.we_sent_since_last_report {
            let ntp = NtpTimestamp::now();
            RtcpPacket::SenderReport {
                ssrc: self.local_ssrc,
                ntp_seconds: ntp.seconds,
                ntp_fraction: ntp.fraction,
                rtp_timestamp: self
                    .rtp_ts_base
                    .wrapping_add(self.clock.ticks(now.saturating_duration_since(self.started))),
                packet_count: self.stats.packets_sent as u32,
                octet_count: self.stats.bytes_sent as u32,
                reports: blocks,
            }
            .encode(&mut out);
        } else {
            RtcpPacket::ReceiverReport {
                ssrc: self.local_ssrc,
                reports: blocks,
            }
            .encode(&mut out);
        }
        self.we_sent_since_last_report = false;

        for chunk in overflow.chunks(MAX_REPORT_BLOCKS) {
            RtcpPacket::ReceiverReport {
                ssrc: self.local_ssrc,
                reports: chunk.to_vec(),
            }
            .encode(&mut out);
        }

        // SDES (CNAME mandatory) always follows the SR/RR(s) and precedes
        // any feedback or BYE, per the compound-packet ordering contract.
        RtcpPacket::SourceDescription {
            chunks: vec![(self.local_ssrc, self.local_cname.as_bytes())],
        }
        .encode(&mut out);

        for ssrc in self.database.iter().map(|(s, _)| *s).collect::<Vec<_>>() {
            let key = LossKey { ssrc, flow: None };
            if self.feedback.has_pending(key) {
                let entries: Vec<GenericNack> = self.feedback.drain_nack_blocks(key);
                if !entries.is_empty() {
                    RtcpPacket::Nack {
                        sender_ssrc: self.local_ssrc,
                        media_ssrc: ssrc,
                        entries,
                    }
                    .encode(&mut out);
                    self.stats.nacks_sent += 1;
                }
            }
        }

        if self.state == SessionState::ShuttingDown {
            RtcpPacket::Bye {
                sources: vec![self.local_ssrc],
                reason: None,
            }
            .encode(&mut out);
            self.state = SessionState::Complete;
            self.push_event(SessionEvent::SessionComplete);
        }

        self.rtcp_scheduler.on_rtcp_packet_size(out.len());
        self.rtcp_scheduler.set_we_sent(false);

        let members = self.database.len().max(1);
        let interval = self.rtcp_scheduler.next_interval(members, 1);
        // the timer that just fired was already consumed by the wheel; a
        // fresh one replaces it rather than being rescheduled in place.
        self.rtcp_timer = self.timers.schedule(now + interval);

        Some(out)
    }

    /// Releases every access unit whose playout deadline has passed.
    pub fn drain_playout(&mut self, now: Instant) -> Vec<PlayoutBufferNode> {
        self.playout.drain_ready(now)
    }

    /// Advances time: reaps timed-out or departed members and surfaces the
    /// corresponding notifications.
    pub fn tick(&mut self, now: Instant) {
        for (ssrc, esn) in self.loss.check_timeouts(now) {
            self.feedback.note_missing(LossKey { ssrc, flow: None }, esn as u16);
        }

        if let Some(cross) = &mut self.mprtp_loss {
            let remote_ssrc = cross.remote_ssrc();
            for (flow, esn) in cross.check_timeouts(now) {
                if let Some(ssrc) = remote_ssrc {
                    self.feedback
                        .note_missing(LossKey { ssrc, flow: Some(flow) }, esn as u16);
                }
            }
        }

        for event in self.database.tick(now) {
            match event {
                MemberEvent::Joined(ssrc) => self.push_event(SessionEvent::MemberJoined(ssrc)),
                MemberEvent::Left(ssrc) => {
                    self.loss.remove(ssrc);
                    self.push_event(SessionEvent::MemberLeft(ssrc));
                }
                MemberEvent::TimedOut(ssrc) => {
                    self.loss.remove(ssrc);
                    self.push_event(SessionEvent::MemberLeft(ssrc));
                }
            }
        }
    }

    /// Begins graceful shutdown: no further outbound RTP is admitted, and
    /// the next RTCP report carries a BYE before the session completes.
    pub fn shutdown(&mut self, now: Instant) {
        if self.state == SessionState::Active {
            self.state = SessionState::ShuttingDown;
            self.timers.cancel(self.rtcp_timer);
            self.rtcp_timer = self.timers.schedule(now);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }
}
