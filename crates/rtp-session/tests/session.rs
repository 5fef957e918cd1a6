use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};

use bytes::BytesMut;

use rtp_session::core::{DeliveryDecision, PlayoutKind, SchedulerKind, SessionConfig, SessionEvent};
use rtp_session::loss::{BasicRtoEstimator, LossEvent, MovingAverage};
use rtp_session::playout::{PlayoutBuffer, PlayoutBufferNode, V1Perkins};
use rtp_session::scheduler::{AckWindow, SendingScheduler};
use rtp_session::Session;
use rtp_wire::rtp::RtpPacket;
use rtp_wire::rtcp::RtcpPacket;

fn encode_rtp(seq: u16, ssrc: u32, timestamp: u32) -> BytesMut {
    let mut bytes = BytesMut::new();
    RtpPacket {
        marker: false,
        payload_type: 96,
        sequence_number: seq,
        timestamp,
        ssrc,
        csrc: Vec::new(),
        extension: None,
        payload: b"payload",
    }
    .encode(&mut bytes);
    bytes
}

fn socket(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[test]
fn a_remote_ssrc_is_validated_after_two_consecutive_sequence_numbers() {
    let mut session = Session::new(SessionConfig::default(), Instant::now()).unwrap();
    let now = Instant::now();

    let first = session.on_rtp(&encode_rtp(1000, 0xdead_beef, 0), now).unwrap();
    assert_eq!(first, DeliveryDecision::Unvalidated);

    let second = session.on_rtp(&encode_rtp(1001, 0xdead_beef, 160), now).unwrap();
    assert_eq!(second, DeliveryDecision::Accepted);

    let events = session.events();
    assert!(events.contains(&SessionEvent::MemberJoined(0xdead_beef)));
    assert_eq!(session.stats().packets_received, 1);
}

#[test]
fn sequence_numbers_wrap_and_extend_without_losing_order() {
    let mut session = Session::new(SessionConfig::default(), Instant::now()).unwrap();
    let now = Instant::now();
    let ssrc = 0x1234_5678;

    // Two packets to clear probation before the interesting wrap sequence.
    session.on_rtp(&encode_rtp(65532, ssrc, 0), now).unwrap();
    session.on_rtp(&encode_rtp(65533, ssrc, 160), now).unwrap();

    for (seq, ts) in [(65534u16, 320u32), (65535, 480), (0, 640), (1, 800)] {
        let decision = session.on_rtp(&encode_rtp(seq, ssrc, ts), now).unwrap();
        assert_eq!(decision, DeliveryDecision::Accepted, "seq {seq} should be in-order");
    }

    let released = session.drain_playout(now + Duration::from_secs(1));
    let mut seen: Vec<u64> = released.iter().map(|node| node.sequence_number).collect();
    seen.sort_unstable();
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "extended sequence numbers must stay ordered across the wrap: {seen:?}");
}

#[test]
fn out_of_range_packets_are_classified_distinctly_from_accepted_ones() {
    let mut session = Session::new(SessionConfig::default(), Instant::now()).unwrap();
    let now = Instant::now();
    let ssrc = 0xaaaa_bbbb;

    session.on_rtp(&encode_rtp(100, ssrc, 0), now).unwrap();
    session.on_rtp(&encode_rtp(101, ssrc, 160), now).unwrap();

    // A huge forward jump is outside the max-dropout window and should not
    // be accepted into the ordered stream.
    let decision = session.on_rtp(&encode_rtp(40_000, ssrc, 320), now).unwrap();
    assert_eq!(decision, DeliveryDecision::OutOfRange);
}

#[test]
fn session_with_no_local_sends_builds_a_receiver_report() {
    let config = SessionConfig {
        session_bandwidth_bps: 1_000_000.0,
        ..SessionConfig::default()
    };
    let start = Instant::now();
    let mut session = Session::new(config, start).unwrap();

    let ssrc = 0x2222_3333;
    session.on_rtp(&encode_rtp(1, ssrc, 0), start).unwrap();
    session.on_rtp(&encode_rtp(2, ssrc, 160), start).unwrap();

    // Force the scheduled RTCP timer to be due.
    let later = start + Duration::from_secs(60);
    let report = session.maybe_build_rtcp(later).expect("interval has elapsed");
    let packets = RtcpPacket::decode_compound(&report).unwrap();

    assert!(matches!(packets[0], RtcpPacket::ReceiverReport { .. }));
}

#[test]
fn sending_rtp_since_the_last_report_produces_a_sender_report() {
    let config = SessionConfig {
        session_bandwidth_bps: 1_000_000.0,
        ..SessionConfig::default()
    };
    let start = Instant::now();
    let mut session = Session::new(config, start).unwrap();

    let mut out = BytesMut::new();
    session.send_rtp(b"hello", false, start, &mut out);

    let later = start + Duration::from_secs(60);
    let report = session.maybe_build_rtcp(later).expect("interval has elapsed");
    let packets = RtcpPacket::decode_compound(&report).unwrap();

    assert!(matches!(packets[0], RtcpPacket::SenderReport { .. }));
}

#[test]
fn rtcp_is_not_rebuilt_before_its_interval_elapses() {
    let start = Instant::now();
    let mut session = Session::new(SessionConfig::default(), start).unwrap();
    assert!(session.maybe_build_rtcp(start).is_none());
}

#[test]
fn shutdown_emits_a_bye_and_completes_the_session() {
    let start = Instant::now();
    let mut session = Session::new(SessionConfig::default(), start).unwrap();

    session.shutdown(start);
    let report = session
        .maybe_build_rtcp(start)
        .expect("shutdown should force an immediate report");
    let packets = RtcpPacket::decode_compound(&report).unwrap();

    assert!(packets.iter().any(|p| matches!(p, RtcpPacket::Bye { .. })));
    assert!(session.is_complete());
    assert!(session.events().contains(&SessionEvent::SessionComplete));
}

#[test]
fn a_playout_deadline_is_never_earlier_than_arrival() {
    let config = SessionConfig {
        playout: PlayoutKind::V2PtsBased {
            latency: Duration::from_millis(100),
        },
        ..SessionConfig::default()
    };
    let start = Instant::now();
    let mut session = Session::new(config, start).unwrap();
    let ssrc = 0x9999_0000;

    session.on_rtp(&encode_rtp(0, ssrc, 0), start).unwrap();
    session.on_rtp(&encode_rtp(1, ssrc, 160), start + Duration::from_millis(20)).unwrap();

    assert!(session.drain_playout(start + Duration::from_millis(90)).is_empty());
    assert!(!session.drain_playout(start + Duration::from_millis(260)).is_empty());
}

#[test]
fn mprtp_round_robin_alternates_across_registered_subflows() {
    let config = SessionConfig {
        mprtp_scheduler_spec: Some("round-robin".to_string()),
        ..SessionConfig::default()
    };
    let start = Instant::now();
    let mut session = Session::new(config, start).unwrap();

    session
        .add_mprtp_subflow(0, socket(10_000), socket(20_000), start)
        .unwrap();
    session
        .add_mprtp_subflow(1, socket(10_001), socket(20_001), start)
        .unwrap();

    let mut flow_ids = Vec::new();
    for _ in 0..4 {
        let mut out = BytesMut::new();
        session.send_rtp(b"x", false, start, &mut out);
        let packet = RtpPacket::decode(&out).unwrap();
        let (profile, ext) = packet.extension.expect("mprtp header must be attached");
        assert_eq!(profile, rtp_wire::mprtp::MPRTP_EXTENSION_PROFILE);
        let (header, _) = rtp_wire::mprtp::MprtpSubflowHeader::decode(ext).unwrap();
        flow_ids.push(header.flow_id);
    }

    assert_eq!(flow_ids, vec![0, 1, 0, 1]);
}

#[test]
fn an_idle_member_is_reaped_on_tick() {
    let config = SessionConfig {
        member_timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let start = Instant::now();
    let mut session = Session::new(config, start).unwrap();
    let ssrc = 0x7777_8888;

    session.on_rtp(&encode_rtp(1, ssrc, 0), start).unwrap();
    session.events();

    session.tick(start + Duration::from_millis(200));
    assert!(session.events().contains(&SessionEvent::MemberLeft(ssrc)));
}

#[test]
fn a_session_rejects_a_packet_claiming_its_own_local_ssrc() {
    let start = Instant::now();
    let mut session = Session::new(SessionConfig::default(), start).unwrap();
    let local = session.local_ssrc();

    let err = session.on_rtp(&encode_rtp(1, local, 0), start).unwrap_err();
    assert_eq!(err, rtp_session::Error::SsrcCollision);
}

#[test]
fn construction_rejects_a_zero_clock_rate() {
    let config = SessionConfig {
        clock_rate: 0,
        ..SessionConfig::default()
    };
    assert_eq!(
        Session::new(config, Instant::now()).unwrap_err(),
        rtp_session::Error::ConfigurationError
    );
}

#[test]
fn compound_rtcp_carries_an_sdes_cname_after_the_report() {
    let config = SessionConfig {
        session_bandwidth_bps: 1_000_000.0,
        cname: Some("alice@example.test".to_string()),
        ..SessionConfig::default()
    };
    let start = Instant::now();
    let mut session = Session::new(config, start).unwrap();

    let later = start + Duration::from_secs(60);
    let report = session.maybe_build_rtcp(later).expect("interval has elapsed");
    let packets = RtcpPacket::decode_compound(&report).unwrap();

    assert!(matches!(packets[0], RtcpPacket::ReceiverReport { .. }));
    let sdes = packets
        .iter()
        .find(|p| matches!(p, RtcpPacket::SourceDescription { .. }))
        .expect("SDES must be present in every compound report");
    match sdes {
        RtcpPacket::SourceDescription { chunks } => {
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].1, b"alice@example.test");
        }
        _ => unreachable!(),
    }
}

#[test]
fn a_session_without_an_explicit_cname_still_derives_one() {
    let start = Instant::now();
    let mut session = Session::new(SessionConfig::default(), start).unwrap();

    let report = session.maybe_build_rtcp(start + Duration::from_secs(60)).unwrap();
    let packets = RtcpPacket::decode_compound(&report).unwrap();
    assert!(packets.iter().any(|p| matches!(p, RtcpPacket::SourceDescription { .. })));
}

#[test]
fn a_report_with_more_than_thirty_one_members_overflows_into_extra_receiver_reports() {
    let config = SessionConfig {
        session_bandwidth_bps: 1_000_000.0,
        ..SessionConfig::default()
    };
    let start = Instant::now();
    let mut session = Session::new(config, start).unwrap();

    // 35 distinct sources: one more than two full 31-block groups need to overflow.
    for i in 0..35u32 {
        let ssrc = 0x5000_0000 + i;
        session.on_rtp(&encode_rtp(1, ssrc, 0), start).unwrap();
        session.on_rtp(&encode_rtp(2, ssrc, 160), start).unwrap();
    }

    let report = session.maybe_build_rtcp(start + Duration::from_secs(60)).unwrap();
    let packets = RtcpPacket::decode_compound(&report).unwrap();

    let total_blocks: usize = packets
        .iter()
        .map(|p| match p {
            RtcpPacket::SenderReport { reports, .. } | RtcpPacket::ReceiverReport { reports, .. } => reports.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(total_blocks, 35);

    let rr_count = packets
        .iter()
        .filter(|p| matches!(p, RtcpPacket::ReceiverReport { .. }))
        .count();
    assert_eq!(rr_count, 2, "31 + 4 members should split across two RR packets");
}

#[test]
fn a_duplicate_packet_is_flagged_instead_of_silently_overwriting_the_queue() {
    let mut buffer = V1Perkins::new(Duration::from_millis(50));
    let now = Instant::now();

    let node = PlayoutBufferNode {
        sequence_number: 7,
        rtp_timestamp: 1600,
        arrival: now,
        payload: b"first".to_vec(),
    };
    let (_, _, duplicate) = buffer.insert(node, now);
    assert!(!duplicate);
    assert_eq!(buffer.len(), 1);

    let redelivered = PlayoutBufferNode {
        sequence_number: 7,
        rtp_timestamp: 1600,
        arrival: now + Duration::from_millis(5),
        payload: b"retransmitted".to_vec(),
    };
    let (_, _, duplicate) = buffer.insert(redelivered, now + Duration::from_millis(5));
    assert!(duplicate);
    assert_eq!(buffer.len(), 1, "a duplicate must not be queued a second time");
}

#[test]
fn a_duplicate_is_still_caught_after_its_group_has_been_released() {
    let mut buffer = V1Perkins::new(Duration::from_millis(10));
    let now = Instant::now();

    buffer.insert(
        PlayoutBufferNode {
            sequence_number: 1,
            rtp_timestamp: 100,
            arrival: now,
            payload: Vec::new(),
        },
        now,
    );

    let released = buffer.next_due(now + Duration::from_millis(20));
    assert!(released.is_some());
    assert_eq!(buffer.len(), 0);

    let (_, _, duplicate) = buffer.insert(
        PlayoutBufferNode {
            sequence_number: 1,
            rtp_timestamp: 100,
            arrival: now + Duration::from_millis(25),
            payload: Vec::new(),
        },
        now + Duration::from_millis(25),
    );
    assert!(duplicate, "history ring must catch duplicates that already left the queue");
}

#[test]
fn a_predictable_gap_produces_a_lost_event_when_a_packet_goes_missing() {
    let mut est = BasicRtoEstimator::new(Box::new(MovingAverage::new(0.5)));
    let t0 = Instant::now();

    // Feed a steady 20ms cadence so the predictor has a tight mu/sigma.
    for i in 1..20u64 {
        est.on_packet_arrival(t0 + Duration::from_millis(i * 20), i);
    }

    // ESN 20 never arrives; well past its predicted deadline it should be declared lost.
    let lost = est.check_timeouts(t0 + Duration::from_millis(20 * 20 + 200));
    assert!(lost.contains(&20));
}

#[test]
fn a_late_arrival_after_being_declared_lost_is_reported_as_a_false_positive() {
    let mut est = BasicRtoEstimator::new(Box::new(MovingAverage::new(0.5)));
    let t0 = Instant::now();

    for i in 1..20u64 {
        est.on_packet_arrival(t0 + Duration::from_millis(i * 20), i);
    }

    let lost = est.check_timeouts(t0 + Duration::from_millis(20 * 20 + 200));
    assert!(lost.contains(&20));

    let events = est.on_packet_arrival(t0 + Duration::from_millis(20 * 20 + 500), 20);
    assert!(events.contains(&LossEvent::FalsePositive(20)));
}

#[test]
fn ack_window_backs_off_by_beta_instead_of_halving_on_loss() {
    let mut window = AckWindow::with_mss(1000);
    let now = Instant::now();

    // Grow cwnd out of slow start first so the loss-time value is predictable.
    for _ in 0..10 {
        window.on_ack(1000, Some(Duration::from_millis(50)), now);
    }
    let cwnd_before = window.cwnd_bytes();

    window.on_loss(now);
    let cwnd_after = window.cwnd_bytes();

    let ratio = cwnd_after as f64 / cwnd_before as f64;
    assert!((ratio - 0.8).abs() < 0.05, "expected ~0.8x backoff, got {ratio}");
}

#[test]
fn ack_window_reports_a_sending_rate_once_an_rtt_sample_is_seen() {
    let mut window = AckWindow::with_mss(1000);
    let now = Instant::now();

    assert!(window.current_rate_bps().is_none());
    window.on_ack(0, Some(Duration::from_millis(100)), now);
    assert!(window.current_rate_bps().is_some());
}

#[test]
fn an_ack_window_scheduled_session_has_no_sending_rate_before_any_rtt_sample() {
    let config = SessionConfig {
        session_bandwidth_bps: 1_000_000.0,
        scheduler: SchedulerKind::AckWindow { mss: 1000 },
        ..SessionConfig::default()
    };
    let start = Instant::now();
    let mut session = Session::new(config, start).unwrap();

    let mut out = BytesMut::new();
    session.send_rtp(b"hello", false, start, &mut out);
    assert!(session.stats().sending_rate_bps.is_none());
}
