use bytes::{BufMut, BytesMut};

use super::Error;

/// The RFC 8285 one-byte header extension profile value reserved (by local
/// convention, not an IANA allocation) for MPRTP subflow data.
pub const MPRTP_EXTENSION_PROFILE: u16 = 0xbede;

/// MPRTP per-packet header extension: identifies which subflow carried this
/// packet and its subflow-local sequence number, so the receiver can run
/// loss detection independently per path before merging streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MprtpSubflowHeader {
    pub flow_id: u8,
    pub subflow_sequence: u16,
}

impl MprtpSubflowHeader {
    const LEN: usize = 3;

    /// Encodes the RFC 8285 one-byte extension element: a 1-byte
    /// `(id<<4)|len` tag followed by `len+1` data bytes.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use rtp_wire::mprtp::MprtpSubflowHeader;
    ///
    /// let mut bytes = BytesMut::new();
    /// MprtpSubflowHeader { flow_id: 2, subflow_sequence: 99 }.encode(1, &mut bytes);
    ///
    /// let (header, id) = MprtpSubflowHeader::decode(&bytes).unwrap();
    /// assert_eq!(id, 1);
    /// assert_eq!(header.flow_id, 2);
    /// assert_eq!(header.subflow_sequence, 99);
    /// ```
    pub fn encode(&self, extension_id: u8, bytes: &mut BytesMut) {
        bytes.put_u8((extension_id << 4) | ((Self::LEN - 1) as u8 & 0x0f));
        bytes.put_u8(self.flow_id);
        bytes.put_u16(self.subflow_sequence);
    }

    /// Decodes one RFC 8285 one-byte extension element, returning the
    /// parsed header and the extension id it was tagged with.
    pub fn decode(bytes: &[u8]) -> Result<(Self, u8), Error> {
        if bytes.is_empty() {
            return Err(Error::TruncatedPacket);
        }

        let id = bytes[0] >> 4;
        let len = (bytes[0] & 0x0f) as usize + 1;
        if bytes.len() < 1 + len || len < Self::LEN {
            return Err(Error::TruncatedPacket);
        }

        Ok((
            Self {
                flow_id: bytes[1],
                subflow_sequence: u16::from_be_bytes([bytes[2], bytes[3]]),
            },
            id,
        ))
    }
}
