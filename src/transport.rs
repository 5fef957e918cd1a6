//! A demo UDP transport for [`rtp_session::Session`], grounded in the same
//! receive-loop shape used for this codebase's connectionless listeners:
//! read a datagram, hand it to the engine, write back whatever the engine
//! produces, log and continue rather than tearing the loop down on a
//! transient error.

use std::{io::ErrorKind, net::SocketAddr, sync::Arc, time::Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::net::UdpSocket;

use rtp_sdk::{Session, SessionEvent};
use rtp_session::port_allocator::PortAllocator;

use crate::config;

/// RTCP payload types occupy 200-204 in the range reserved by RFC 3550/4585;
/// the recv loop uses the second octet of an inbound datagram to tell an
/// RTP packet from a (possibly compound) RTCP one.
fn looks_like_rtcp(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && (200..=204).contains(&bytes[1])
}

/// Runs one session's worth of RTP/RTCP traffic against a bound UDP socket
/// until the process is asked to shut down.
pub async fn run(
    session_config: config::Session,
    port_allocator: Arc<Mutex<PortAllocator>>,
) -> anyhow::Result<()> {
    let bound = {
        let mut pool = port_allocator.lock();
        pool.allocate_udp(
            session_config.listen.ip(),
            Some(session_config.listen.port()),
            true,
        )?
    };
    bound.0.set_nonblocking(true)?;
    let socket = Arc::new(UdpSocket::from_std(bound.0)?);
    let remote: SocketAddr = session_config.remote;

    let started = Instant::now();
    let mut session = build_session(&session_config, started)?;

    log::info!(
        "session started: local_ssrc={}, listen={}, remote={}",
        session.local_ssrc(),
        session_config.listen,
        remote,
    );

    let mut buf = vec![0u8; 2048];
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(50));

    loop {
        tokio::select! {
            recv = socket.recv_from(&mut buf) => {
                let (size, addr) = match recv {
                    Ok(pair) => pair,
                    Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                    Err(e) => return Err(e.into()),
                };

                if addr != remote {
                    log::trace!("dropping datagram from unexpected peer: {addr}");
                    continue;
                }

                handle_datagram(&mut session, &buf[..size], Instant::now());
            }
            _ = tick.tick() => {
                let now = Instant::now();
                session.tick(now);

                for node in session.drain_playout(now) {
                    log::trace!(
                        "playout release: seq={}, rtp_ts={}, bytes={}",
                        node.sequence_number,
                        node.rtp_timestamp,
                        node.payload.len(),
                    );
                }

                if let Some(rtcp) = session.maybe_build_rtcp(now) {
                    if let Err(e) = socket.send_to(&rtcp, remote).await {
                        if e.kind() != ErrorKind::ConnectionReset {
                            return Err(e.into());
                        }
                    }
                }

                for event in session.events() {
                    log_event(event);
                }

                if session.is_complete() {
                    return Ok(());
                }
            }
        }
    }
}

fn build_session(session_config: &config::Session, now: Instant) -> anyhow::Result<Session> {
    let mut builder = rtp_sdk::SessionBuilder::default();
    builder
        .clock_rate(session_config.clock_rate)
        .bandwidth_bps(session_config.bandwidth_bps)
        .member_timeout(session_config.member_timeout());

    match session_config.playout {
        config::Playout::FixedDelay { delay_ms } => {
            builder.playout_fixed_delay(std::time::Duration::from_millis(delay_ms));
        }
        config::Playout::PtsBased { latency_ms } => {
            builder.playout_pts_based(std::time::Duration::from_millis(latency_ms));
        }
    }

    match session_config.scheduler {
        config::Scheduler::Immediate => {
            builder.scheduler_immediate();
        }
        config::Scheduler::Paced { target_bps } => {
            builder.scheduler_paced(target_bps);
        }
        config::Scheduler::AckWindow { mss } => {
            builder.scheduler_ack_window(mss);
        }
        config::Scheduler::NadaLike => {
            builder.scheduler_nada_like();
        }
    }

    if let Some(spec) = &session_config.mprtp_scheduler {
        builder.mprtp(spec.clone());
    }

    builder
        .build(now)
        .map_err(|e| anyhow::anyhow!("failed to build session: {e}"))
}

fn handle_datagram(session: &mut Session, bytes: &[u8], now: Instant) {
    if looks_like_rtcp(bytes) {
        if let Err(e) = session.on_rtcp(bytes, now) {
            log::debug!("rtcp decode failed: {e}");
        }
    } else {
        match session.on_rtp(bytes, now) {
            Ok(decision) => log::trace!("rtp delivered: {decision:?}"),
            Err(e) => log::debug!("rtp decode failed: {e}"),
        }
    }
}

fn log_event(event: SessionEvent) {
    match event {
        SessionEvent::MemberJoined(ssrc) => log::info!("member joined: ssrc={ssrc:08x}"),
        SessionEvent::MemberLeft(ssrc) => log::info!("member left: ssrc={ssrc:08x}"),
        SessionEvent::ReceiverReportReceived(ssrc) => {
            log::trace!("receiver report from ssrc={ssrc:08x}")
        }
        SessionEvent::SessionComplete => log::info!("session complete"),
    }
}

/// Encodes and sends one RTP payload over the session's outbound queue,
/// provided for callers embedding this transport (e.g. a media source
/// pushing encoded frames in). Not used by [`run`] itself, which only
/// exercises the receive side and the RTCP scheduler.
pub async fn send_rtp(
    socket: &UdpSocket,
    remote: SocketAddr,
    session: &mut Session,
    payload: &[u8],
    marker: bool,
    now: Instant,
) -> anyhow::Result<()> {
    let mut out = BytesMut::new();
    session.send_rtp(payload, marker, now, &mut out);
    if !out.is_empty() {
        socket.send_to(&out, remote).await?;
    }
    Ok(())
}
