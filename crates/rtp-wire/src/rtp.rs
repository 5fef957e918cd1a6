use bytes::{BufMut, BytesMut};

use super::Error;

const FIXED_HEADER_LEN: usize = 12;
const VERSION: u8 = 2;

/// A parsed RTP header and its borrowed payload, per RFC 3550 §5.1.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    /// RFC 8285 one-byte or two-byte header extension, if present: (profile,
    /// raw extension words).
    pub extension: Option<(u16, &'a [u8])>,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Decodes a single RTP packet from a UDP datagram payload.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use rtp_wire::rtp::RtpPacket;
    ///
    /// let mut bytes = BytesMut::with_capacity(64);
    /// RtpPacket {
    ///     marker: true,
    ///     payload_type: 96,
    ///     sequence_number: 42,
    ///     timestamp: 90_000,
    ///     ssrc: 0xdead_beef,
    ///     csrc: vec![],
    ///     extension: None,
    ///     payload: b"hello",
    /// }
    /// .encode(&mut bytes);
    ///
    /// let packet = RtpPacket::decode(&bytes).unwrap();
    /// assert_eq!(packet.sequence_number, 42);
    /// assert_eq!(packet.ssrc, 0xdead_beef);
    /// assert_eq!(packet.payload, b"hello");
    /// ```
    pub fn decode(bytes: &'a [u8]) -> Result<Self, Error> {
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(Error::TruncatedPacket);
        }

        let version = bytes[0] >> 6;
        if version != VERSION {
            return Err(Error::UnsupportedVersion);
        }

        let has_padding = (bytes[0] & 0x20) != 0;
        let has_extension = (bytes[0] & 0x10) != 0;
        let csrc_count = (bytes[0] & 0x0f) as usize;
        let marker = (bytes[1] & 0x80) != 0;
        let payload_type = bytes[1] & 0x7f;
        let sequence_number = u16::from_be_bytes([bytes[2], bytes[3]]);
        let timestamp = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let ssrc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        let mut offset = FIXED_HEADER_LEN;
        let csrc_len = csrc_count * 4;
        if bytes.len() < offset + csrc_len {
            return Err(Error::TruncatedPacket);
        }

        let mut csrc = Vec::with_capacity(csrc_count);
        for i in 0..csrc_count {
            let start = offset + i * 4;
            csrc.push(u32::from_be_bytes(
                bytes[start..start + 4].try_into().unwrap(),
            ));
        }
        offset += csrc_len;

        let mut extension = None;
        if has_extension {
            if bytes.len() < offset + 4 {
                return Err(Error::TruncatedPacket);
            }
            let profile = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let ext_words = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
            let ext_len = ext_words * 4;
            let ext_start = offset + 4;
            if bytes.len() < ext_start + ext_len {
                return Err(Error::TruncatedPacket);
            }
            extension = Some((profile, &bytes[ext_start..ext_start + ext_len]));
            offset = ext_start + ext_len;
        }

        let mut payload_end = bytes.len();
        if has_padding {
            let pad_len = *bytes.last().ok_or(Error::TruncatedPacket)? as usize;
            if pad_len == 0 || pad_len > payload_end - offset {
                return Err(Error::MalformedHeader);
            }
            payload_end -= pad_len;
        }

        if offset > payload_end {
            return Err(Error::MalformedHeader);
        }

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload: &bytes[offset..payload_end],
        })
    }

    /// Encodes this packet into `bytes`, replacing any previous contents.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use rtp_wire::rtp::RtpPacket;
    ///
    /// let mut bytes = BytesMut::new();
    /// RtpPacket {
    ///     marker: false,
    ///     payload_type: 111,
    ///     sequence_number: 1,
    ///     timestamp: 0,
    ///     ssrc: 7,
    ///     csrc: vec![1, 2],
    ///     extension: None,
    ///     payload: b"x",
    /// }
    /// .encode(&mut bytes);
    ///
    /// assert_eq!(bytes[0] >> 6, 2);
    /// assert_eq!(bytes[0] & 0x0f, 2);
    /// ```
    pub fn encode(&self, bytes: &mut BytesMut) {
        bytes.clear();

        let first = (VERSION << 6)
            | (if self.extension.is_some() { 0x10 } else { 0 })
            | (self.csrc.len() as u8 & 0x0f);
        bytes.put_u8(first);
        bytes.put_u8((self.marker as u8) << 7 | (self.payload_type & 0x7f));
        bytes.put_u16(self.sequence_number);
        bytes.put_u32(self.timestamp);
        bytes.put_u32(self.ssrc);

        for csrc in &self.csrc {
            bytes.put_u32(*csrc);
        }

        if let Some((profile, ext)) = self.extension {
            bytes.put_u16(profile);
            bytes.put_u16((ext.len() / 4) as u16);
            bytes.extend_from_slice(ext);
        }

        bytes.extend_from_slice(self.payload);
    }

    /// Header length in bytes, excluding the payload.
    pub fn header_len(&self) -> usize {
        FIXED_HEADER_LEN
            + self.csrc.len() * 4
            + self.extension.map(|(_, e)| 4 + e.len()).unwrap_or(0)
    }
}
