use bytes::{BufMut, BytesMut};

use super::Error;

const VERSION: u8 = 2;

/// RTCP packet type field (RFC 3550 §12.1, RFC 4585 §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum PacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Bye = 203,
    App = 204,
    /// Generic RTP Feedback (RFC 4585 §6.2), carries NACK (FMT=1) among others.
    RtpFeedback = 205,
    /// Payload-Specific Feedback (RFC 4585 §6.3).
    PayloadFeedback = 206,
    /// Extended Report (RFC 3611).
    ExtendedReport = 207,
}

/// One report block inside a Sender or Receiver Report (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub highest_seq: u32,
    pub jitter: u32,
    pub lsr: u32,
    pub dlsr: u32,
}

impl ReportBlock {
    const LEN: usize = 24;

    fn encode(&self, bytes: &mut BytesMut) {
        bytes.put_u32(self.ssrc);
        bytes.put_u8(self.fraction_lost);
        // cumulative_lost is a signed 24-bit field.
        let lost = self.cumulative_lost.to_be_bytes();
        bytes.extend_from_slice(&lost[1..]);
        bytes.put_u32(self.highest_seq);
        bytes.put_u32(self.jitter);
        bytes.put_u32(self.lsr);
        bytes.put_u32(self.dlsr);
    }

    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::LEN {
            return Err(Error::TruncatedPacket);
        }

        Ok(Self {
            ssrc: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            fraction_lost: bytes[4],
            cumulative_lost: u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]),
            highest_seq: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
            jitter: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
            lsr: u32::from_be_bytes(bytes[16..20].try_into().unwrap()),
            dlsr: u32::from_be_bytes(bytes[20..24].try_into().unwrap()),
        })
    }
}

/// A generic NACK feedback message body (RFC 4585 §6.2.1): a PID and a
/// bitmask of the 16 sequence numbers following it that are also missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericNack {
    pub pid: u16,
    pub blp: u16,
}

/// A decoded RTCP packet. Only the fields relevant to the session engine
/// are exposed; unknown SDES items and APP payloads are carried as raw
/// bytes rather than expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket<'a> {
    SenderReport {
        ssrc: u32,
        ntp_seconds: u32,
        ntp_fraction: u32,
        rtp_timestamp: u32,
        packet_count: u32,
        octet_count: u32,
        reports: Vec<ReportBlock>,
    },
    ReceiverReport {
        ssrc: u32,
        reports: Vec<ReportBlock>,
    },
    SourceDescription {
        chunks: Vec<(u32, &'a [u8])>,
    },
    Bye {
        sources: Vec<u32>,
        reason: Option<&'a [u8]>,
    },
    App {
        ssrc: u32,
        name: [u8; 4],
        data: &'a [u8],
    },
    Nack {
        sender_ssrc: u32,
        media_ssrc: u32,
        entries: Vec<GenericNack>,
    },
    ExtendedReport {
        ssrc: u32,
        blocks: &'a [u8],
    },
}

impl<'a> RtcpPacket<'a> {
    /// Decodes exactly one RTCP packet, per the header at `bytes[0..4]`.
    /// Compound RTCP packets are decoded one packet at a time with
    /// [`decode_compound`].
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use rtp_wire::rtcp::RtcpPacket;
    ///
    /// let mut bytes = BytesMut::new();
    /// RtcpPacket::Bye { sources: vec![42], reason: None }.encode(&mut bytes);
    ///
    /// let (packet, _) = RtcpPacket::decode(&bytes).unwrap();
    /// match packet {
    ///     RtcpPacket::Bye { sources, .. } => assert_eq!(sources, vec![42]),
    ///     _ => panic!("expected Bye"),
    /// }
    /// ```
    pub fn decode(bytes: &'a [u8]) -> Result<(Self, usize), Error> {
        if bytes.len() < 4 {
            return Err(Error::TruncatedPacket);
        }

        let version = bytes[0] >> 6;
        if version != VERSION {
            return Err(Error::UnsupportedVersion);
        }

        let count_or_fmt = bytes[0] & 0x1f;
        let packet_type = PacketType::try_from(bytes[1]).map_err(|_| Error::UnknownPacketType)?;
        let length_words = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let total_len = (length_words + 1) * 4;

        if bytes.len() < total_len {
            return Err(Error::TruncatedPacket);
        }

        let body = &bytes[4..total_len];
        let packet = match packet_type {
            PacketType::SenderReport => {
                if body.len() < 20 {
                    return Err(Error::TruncatedPacket);
                }
                let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let ntp_seconds = u32::from_be_bytes(body[4..8].try_into().unwrap());
                let ntp_fraction = u32::from_be_bytes(body[8..12].try_into().unwrap());
                let rtp_timestamp = u32::from_be_bytes(body[12..16].try_into().unwrap());
                let packet_count = u32::from_be_bytes(body[16..20].try_into().unwrap());
                let octet_count = u32::from_be_bytes(body[20..24].try_into().unwrap());
                let reports = decode_report_blocks(&body[24..], count_or_fmt as usize)?;

                Self::SenderReport {
                    ssrc,
                    ntp_seconds,
                    ntp_fraction,
                    rtp_timestamp,
                    packet_count,
                    octet_count,
                    reports,
                }
            }
            PacketType::ReceiverReport => {
                if body.len() < 4 {
                    return Err(Error::TruncatedPacket);
                }
                let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let reports = decode_report_blocks(&body[4..], count_or_fmt as usize)?;
                Self::ReceiverReport { ssrc, reports }
            }
            PacketType::SourceDescription => {
                Self::SourceDescription {
                    chunks: decode_sdes_chunks(body, count_or_fmt as usize)?,
                }
            }
            PacketType::Bye => {
                let count = count_or_fmt as usize;
                if body.len() < count * 4 {
                    return Err(Error::TruncatedPacket);
                }
                let mut sources = Vec::with_capacity(count);
                for i in 0..count {
                    sources.push(u32::from_be_bytes(
                        body[i * 4..i * 4 + 4].try_into().unwrap(),
                    ));
                }
                let reason = if body.len() > count * 4 {
                    let reason_len = body[count * 4] as usize;
                    let start = count * 4 + 1;
                    Some(body.get(start..start + reason_len).ok_or(Error::TruncatedPacket)?)
                } else {
                    None
                };

                Self::Bye { sources, reason }
            }
            PacketType::App => {
                if body.len() < 8 {
                    return Err(Error::TruncatedPacket);
                }
                let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let name = body[4..8].try_into().unwrap();
                Self::App {
                    ssrc,
                    name,
                    data: &body[8..],
                }
            }
            PacketType::RtpFeedback => {
                if count_or_fmt != 1 {
                    return Err(Error::UnknownPacketType);
                }
                if body.len() < 8 {
                    return Err(Error::TruncatedPacket);
                }
                let sender_ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let media_ssrc = u32::from_be_bytes(body[4..8].try_into().unwrap());
                let mut entries = Vec::new();
                let mut offset = 8;
                while offset + 4 <= body.len() {
                    let pid = u16::from_be_bytes([body[offset], body[offset + 1]]);
                    let blp = u16::from_be_bytes([body[offset + 2], body[offset + 3]]);
                    entries.push(GenericNack { pid, blp });
                    offset += 4;
                }

                Self::Nack {
                    sender_ssrc,
                    media_ssrc,
                    entries,
                }
            }
            PacketType::PayloadFeedback => {
                if body.len() < 8 {
                    return Err(Error::TruncatedPacket);
                }
                let sender_ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let media_ssrc = u32::from_be_bytes(body[4..8].try_into().unwrap());
                Self::Nack {
                    sender_ssrc,
                    media_ssrc,
                    entries: Vec::new(),
                }
            }
            PacketType::ExtendedReport => {
                if body.len() < 4 {
                    return Err(Error::TruncatedPacket);
                }
                let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                Self::ExtendedReport {
                    ssrc,
                    blocks: &body[4..],
                }
            }
        };

        Ok((packet, total_len))
    }

    /// Decodes a compound RTCP packet (one or more individual packets
    /// concatenated, per RFC 3550 §6.1) into a vector of its members.
    pub fn decode_compound(mut bytes: &'a [u8]) -> Result<Vec<Self>, Error> {
        let mut packets = Vec::new();
        while !bytes.is_empty() {
            let (packet, consumed) = Self::decode(bytes)?;
            packets.push(packet);
            bytes = &bytes[consumed..];
        }
        Ok(packets)
    }

    /// Encodes this packet, appending to (not replacing) the contents of
    /// `bytes`, so compound RTCP packets can be built by encoding several
    /// packets into the same buffer in sequence.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use rtp_wire::rtcp::{RtcpPacket, ReportBlock};
    ///
    /// let mut bytes = BytesMut::new();
    /// RtcpPacket::ReceiverReport { ssrc: 1, reports: vec![ReportBlock::default()] }
    ///     .encode(&mut bytes);
    /// RtcpPacket::Bye { sources: vec![1], reason: None }.encode(&mut bytes);
    ///
    /// let packets = RtcpPacket::decode_compound(&bytes).unwrap();
    /// assert_eq!(packets.len(), 2);
    /// ```
    pub fn encode(&self, bytes: &mut BytesMut) {
        let start = bytes.len();
        bytes.put_u32(0); // placeholder for header, patched below.

        let (count_or_fmt, packet_type) = match self {
            Self::SenderReport { ssrc, ntp_seconds, ntp_fraction, rtp_timestamp, packet_count, octet_count, reports } => {
                bytes.put_u32(*ssrc);
                bytes.put_u32(*ntp_seconds);
                bytes.put_u32(*ntp_fraction);
                bytes.put_u32(*rtp_timestamp);
                bytes.put_u32(*packet_count);
                bytes.put_u32(*octet_count);
                for report in reports {
                    report.encode(bytes);
                }
                (reports.len() as u8, PacketType::SenderReport)
            }
            Self::ReceiverReport { ssrc, reports } => {
                bytes.put_u32(*ssrc);
                for report in reports {
                    report.encode(bytes);
                }
                (reports.len() as u8, PacketType::ReceiverReport)
            }
            Self::SourceDescription { chunks } => {
                for (ssrc, text) in chunks {
                    bytes.put_u32(*ssrc);
                    bytes.put_u8(1); // CNAME
                    bytes.put_u8(text.len() as u8);
                    bytes.extend_from_slice(text);
                    bytes.put_u8(0);
                }
                pad_to_word(bytes, start + 4);
                (chunks.len() as u8, PacketType::SourceDescription)
            }
            Self::Bye { sources, reason } => {
                for ssrc in sources {
                    bytes.put_u32(*ssrc);
                }
                if let Some(reason) = reason {
                    bytes.put_u8(reason.len() as u8);
                    bytes.extend_from_slice(reason);
                }
                pad_to_word(bytes, start + 4);
                (sources.len() as u8, PacketType::Bye)
            }
            Self::App { ssrc, name, data } => {
                bytes.put_u32(*ssrc);
                bytes.extend_from_slice(name);
                bytes.extend_from_slice(data);
                pad_to_word(bytes, start + 4);
                (0, PacketType::App)
            }
            Self::Nack { sender_ssrc, media_ssrc, entries } => {
                bytes.put_u32(*sender_ssrc);
                bytes.put_u32(*media_ssrc);
                for entry in entries {
                    bytes.put_u16(entry.pid);
                    bytes.put_u16(entry.blp);
                }
                (1, PacketType::RtpFeedback)
            }
            Self::ExtendedReport { ssrc, blocks } => {
                bytes.put_u32(*ssrc);
                bytes.extend_from_slice(blocks);
                pad_to_word(bytes, start + 4);
                (0, PacketType::ExtendedReport)
            }
        };

        let body_len = bytes.len() - start - 4;
        let length_words = (body_len / 4) as u16;
        let header = [
            (VERSION << 6) | (count_or_fmt & 0x1f),
            packet_type.into(),
            (length_words >> 8) as u8,
            (length_words & 0xff) as u8,
        ];
        bytes[start..start + 4].copy_from_slice(&header);
    }
}

fn pad_to_word(bytes: &mut BytesMut, section_start: usize) {
    let written = bytes.len() - section_start;
    let padding = (4 - (written % 4)) % 4;
    for _ in 0..padding {
        bytes.put_u8(0);
    }
}

fn decode_report_blocks(body: &[u8], count: usize) -> Result<Vec<ReportBlock>, Error> {
    let mut reports = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * ReportBlock::LEN;
        let end = start + ReportBlock::LEN;
        let block = body.get(start..end).ok_or(Error::TruncatedPacket)?;
        reports.push(ReportBlock::decode(block)?);
    }
    Ok(reports)
}

fn decode_sdes_chunks(body: &[u8], count: usize) -> Result<Vec<(u32, &[u8])>, Error> {
    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0;

    for _ in 0..count {
        if body.len() < offset + 4 {
            return Err(Error::TruncatedPacket);
        }
        let ssrc = u32::from_be_bytes(body[offset..offset + 4].try_into().unwrap());
        offset += 4;

        let item_start = offset;
        // item type 1 (CNAME) length-prefixed, terminated by a zero type byte.
        if body.len() < offset + 2 {
            return Err(Error::TruncatedPacket);
        }
        let len = body[offset + 1] as usize;
        let text = body
            .get(offset + 2..offset + 2 + len)
            .ok_or(Error::TruncatedPacket)?;
        offset += 2 + len;

        while offset < body.len() && body[offset] != 0 {
            offset += 1;
        }
        offset += 1;
        // round chunk up to a 4-byte boundary.
        let chunk_len = offset - (item_start - 4);
        offset += (4 - (chunk_len % 4)) % 4;

        chunks.push((ssrc, text));
    }

    Ok(chunks)
}
